//! Error types for Snippet Runner

use thiserror::Error;

/// Result type alias using Snippet Runner's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Snippet Runner
///
/// Provider failures are deliberately absent: they travel through the
/// fallback loop as [`crate::sandbox::ProviderError`] values and never
/// surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request rejected because a critical pattern matched
    #[error("Execution blocked: {} critical finding(s)", findings.len())]
    SecurityBlocked {
        /// Human-readable findings, criticals first
        findings: Vec<String>,
    },

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unauthorized access
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Audit/usage ledger error
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::Unauthorized(_)
                | Error::RateLimit(_)
                | Error::SecurityBlocked { .. }
        )
    }
}
