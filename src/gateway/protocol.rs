//! Gateway wire types
//!
//! Request bodies are [`crate::sandbox::ExecutionRequest`] directly; this
//! module holds what goes back out.

use serde::{Deserialize, Serialize};

use crate::orchestrator::ExecutionResult;
use crate::sandbox::SIMULATED_PROVIDER_ID;

// ============================================================================
// Execution
// ============================================================================

/// Body of a successful `POST /v1/execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// Exit code was zero
    pub success: bool,
    pub execution_id: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used_mb: Option<f64>,
    pub truncated: bool,
    pub security_warnings: Vec<String>,
    /// Provider that produced the output
    pub sandbox_region: String,
}

impl From<ExecutionResult> for ExecuteResponse {
    fn from(result: ExecutionResult) -> Self {
        ExecuteResponse {
            success: result.success(),
            execution_id: result.execution_id,
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
            execution_time_ms: result.execution_time_ms,
            memory_used_mb: result.memory_used_mb,
            truncated: result.truncated,
            security_warnings: result.security_warnings,
            sandbox_region: result.provider_id,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Body of every non-2xx response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Findings behind a security block
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_warnings: Vec<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorResponse {
            error: error.into(),
            security_warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.security_warnings = warnings;
        self
    }
}

// ============================================================================
// Providers
// ============================================================================

/// Body of `GET /v1/providers`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvidersResponse {
    /// Configured providers in fallback order
    pub providers: Vec<String>,
    /// Provider used when all of them fail
    pub fallback: String,
}

impl ProvidersResponse {
    pub fn new(providers: Vec<String>) -> Self {
        ProvidersResponse {
            providers,
            fallback: SIMULATED_PROVIDER_ID.to_string(),
        }
    }
}
