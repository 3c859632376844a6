//! Common provider trait and types
//!
//! Every execution backend, remote or simulated, implements
//! [`ExecutionProvider`]. Failures cross this boundary only as a
//! [`ProviderError`]: a transient/permanent classification plus a message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::limits::ResourceLimits;

/// Supported languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Shell,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Python, Language::JavaScript, Language::Shell];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Shell => "shell",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" | "python3" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "shell" | "bash" | "sh" => Ok(Language::Shell),
            _ => Err(Error::InvalidInput(format!(
                "Unsupported language: {}. Supported: python, javascript, shell",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inbound execution request, as received from a caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The code to execute
    #[serde(default)]
    pub code: String,
    /// Language name, validated by the orchestrator
    #[serde(default)]
    pub language: String,
    /// Standard input
    #[serde(default)]
    pub stdin: Option<String>,
    /// Caller-requested timeout; can only tighten the tier ceiling
    #[serde(default, rename = "timeout_ms")]
    pub requested_timeout_ms: Option<u64>,
    /// Caller correlation id
    #[serde(default)]
    pub task_id: Option<String>,
    /// Caller sandbox correlation id
    #[serde(default)]
    pub sandbox_id: Option<String>,
}

impl ExecutionRequest {
    /// Create a new execution request
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        ExecutionRequest {
            code: code.into(),
            language: language.into(),
            ..Default::default()
        }
    }

    /// Set stdin
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Set the requested timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.requested_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the task correlation id
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// Work handed to a single provider attempt
#[derive(Debug, Clone)]
pub struct ExecutionJob {
    /// Correlation id of the whole execution
    pub execution_id: String,
    /// Source to run; already wrapped when the provider needs it
    pub code: String,
    pub language: Language,
    pub limits: ResourceLimits,
    /// `None` when stdin has been embedded by the wrapper
    pub stdin: Option<String>,
    /// The scanner reported at least one warning for this code
    pub flagged: bool,
}

/// Provider-specific representation of how the program ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// Numeric process exit code
    Code(i32),
    /// Killed by a signal, e.g. "SIGKILL"
    Signal(String),
    /// Textual status such as "ok", "error", "timeout"
    Status(String),
    /// Provider did not say
    Unknown,
}

/// Raw result of a successful provider attempt
#[derive(Debug, Clone)]
pub struct ProviderOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit: ExitStatus,
    /// Provider-measured run time, if reported
    pub execution_time_ms: Option<u64>,
    pub memory_used_mb: Option<f64>,
    /// Warnings reported by the provider itself
    pub warnings: Vec<String>,
}

impl ProviderOutput {
    /// Output of a program that exited normally
    pub fn exited(stdout: impl Into<String>, stderr: impl Into<String>, code: i32) -> Self {
        ProviderOutput {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit: ExitStatus::Code(code),
            execution_time_ms: None,
            memory_used_mb: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// How a provider attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Timeout, connection failure, remote 5xx
    Transient,
    /// Malformed request, unsupported language
    Permanent,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// The only error type allowed across the provider boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        ProviderError {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ProviderError {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        let message = format!("HTTP {}: {}", status.as_u16(), snippet);
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ProviderError::transient(message)
        } else {
            ProviderError::permanent(message)
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.message)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ProviderError::permanent(format!("Undecodable response: {}", err));
        }
        if let Some(status) = err.status() {
            return ProviderError::from_status(status, &err.to_string());
        }
        if err.is_builder() {
            return ProviderError::permanent(format!("Malformed request: {}", err));
        }
        // Timeouts, connection resets and everything else on the wire
        ProviderError::transient(err.to_string())
    }
}

/// Isolation a provider offers on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// Kernel-level sandbox on the provider side; code is sent as-is
    Kernel,
    /// No kernel sandbox; code must be wrapped before sending
    WrapperOnly,
}

/// Trait for execution backends
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// Stable identity, reported to callers as `sandbox_region`
    fn id(&self) -> &str;

    fn isolation(&self) -> Isolation {
        Isolation::Kernel
    }

    /// Check if a language is supported
    fn supports_language(&self, language: Language) -> bool {
        Language::ALL.contains(&language)
    }

    /// Run a job once. Implementations must not retry internally.
    async fn execute(&self, job: &ExecutionJob) -> std::result::Result<ProviderOutput, ProviderError>;

    /// Best-effort cancellation of an abandoned attempt
    async fn cancel(&self, _execution_id: &str) {}
}
