//! Security module - Static screening and isolation wrappers
//!
//! - `scanner`: pattern-based findings per language (warning or critical)
//! - `patterns`: the curated pattern catalogue
//! - `wrapper`: in-language resource ceilings and built-in removal for
//!   providers that lack kernel isolation

mod patterns;
mod scanner;
mod wrapper;

pub use scanner::{has_critical, SecurityScanner, MAX_LINE_LENGTH, MIN_BASE64_RUN};
pub use wrapper::CodeWrapper;

use serde::{Deserialize, Serialize};

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Recorded and reported, execution continues
    Warning,
    /// Execution is refused outright
    Critical,
}

/// A single static-analysis finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub description: String,
    pub severity: Severity,
}

impl SecurityFinding {
    pub fn new(description: impl Into<String>, severity: Severity) -> Self {
        SecurityFinding {
            description: description.into(),
            severity,
        }
    }

    /// Caller-facing message
    pub fn message(&self) -> String {
        match self.severity {
            Severity::Critical => format!("Critical pattern detected: {}", self.description),
            Severity::Warning => format!("Warning: {}", self.description),
        }
    }
}

impl std::fmt::Display for SecurityFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_messages() {
        let critical = SecurityFinding::new("Fork bomb", Severity::Critical);
        assert_eq!(critical.message(), "Critical pattern detected: Fork bomb");

        let warning = SecurityFinding::new("Network download", Severity::Warning);
        assert_eq!(warning.to_string(), "Warning: Network download");
    }
}
