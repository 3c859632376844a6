//! Configuration validation
//!
//! Validates configuration and reports issues.

use secrecy::ExposeSecret;
use serde::Serialize;

use super::types::provider::ProviderRole;
use super::types::{AuthMode, Config};

/// Result of configuration validation
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_provider_config(config, result);
    result = validate_limits_config(config, result);
    result = validate_auth_config(config, result);

    result
}

fn validate_provider_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let mut configured = 0;

    for role in ProviderRole::ALL {
        let Some(provider) = config.providers.get(role) else {
            continue;
        };
        let path = format!("providers.{}", role);

        if !provider.is_configured() {
            result = result.with_warning(
                ValidationIssue::new(&path, "Endpoint or API key missing; provider will be skipped")
                    .with_suggestion(format!(
                        "Set {prefix}_URL and {prefix}_API_KEY",
                        prefix = role.env_prefix()
                    )),
            );
            continue;
        }

        match url::Url::parse(provider.base_url()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => configured += 1,
            Ok(url) => {
                result = result.with_error(ValidationIssue::new(
                    format!("{}.endpoint", path),
                    format!("Unsupported URL scheme '{}'", url.scheme()),
                ));
            }
            Err(e) => {
                result = result.with_error(ValidationIssue::new(
                    format!("{}.endpoint", path),
                    format!("Invalid URL: {}", e),
                ));
            }
        }
    }

    if configured == 0 {
        result = result.with_warning(
            ValidationIssue::new(
                "providers",
                "No sandbox provider configured. Every execution will be simulated.",
            )
            .with_suggestion("Configure providers.primary, providers.secondary or providers.tertiary"),
        );
    }

    if config.providers.simulated.local_runtime {
        result = result.with_warning(ValidationIssue::new(
            "providers.simulated.local_runtime",
            "Local runtime runs unflagged snippets on this host without kernel isolation",
        ));
    }

    result
}

fn validate_limits_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if let Err(e) = config.limits.tiers.check_monotonic() {
        result = result.with_error(
            ValidationIssue::new("limits.tiers", e.to_string())
                .with_suggestion("Each limit must be non-zero and must not shrink from free to pro to enterprise"),
        );
    }

    let rate = &config.limits.rate;
    if rate.enabled {
        if rate.window.is_zero() {
            result = result.with_error(ValidationIssue::new("limits.rate.window", "Window must be non-zero"));
        }
        if rate.free > rate.pro || rate.pro > rate.enterprise {
            result = result.with_warning(ValidationIssue::new(
                "limits.rate",
                "Higher tiers have a smaller execution budget than lower tiers",
            ));
        }
    }

    result
}

fn validate_auth_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    match config.auth.mode {
        AuthMode::None => {
            result = result.with_warning(ValidationIssue::new(
                "auth.mode",
                "Authentication disabled; every caller is anonymous",
            ));
        }
        AuthMode::Token => {
            let usable = config
                .auth
                .tokens
                .iter()
                .filter(|entry| !entry.token.expose_secret().trim().is_empty())
                .count();
            if usable == 0 {
                result = result.with_error(
                    ValidationIssue::new("auth.tokens", "No API tokens configured; every request will be rejected")
                        .with_suggestion("Add entries to auth.tokens or set auth.mode to \"none\" for local use"),
                );
            }
            if config.auth.tokens.iter().any(|entry| entry.user_id.trim().is_empty()) {
                result = result.with_error(ValidationIssue::new("auth.tokens", "Token entry without a user_id"));
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteProviderConfig;
    use crate::identity::TokenEntry;
    use crate::limits::Tier;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.auth.tokens.push(TokenEntry::new("tok", "alice", Tier::Pro));
        config.providers.secondary = Some(RemoteProviderConfig::new("https://piston.example/api/v2", "k"));
        config
    }

    #[test]
    fn test_valid_config() {
        let result = validate_config(&valid_config());
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_default_config_needs_tokens() {
        let result = validate_config(&Config::default());
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.path == "auth.tokens"));
        assert!(result.warnings.iter().any(|w| w.path == "providers"));
    }

    #[test]
    fn test_bad_endpoint() {
        let mut config = valid_config();
        config.providers.primary = Some(RemoteProviderConfig::new("not a url", "k"));
        config.providers.tertiary = Some(RemoteProviderConfig::new("ftp://functions.example", "k"));
        let result = validate_config(&config);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().all(|e| e.path.ends_with(".endpoint")));
    }

    #[test]
    fn test_unconfigured_slot_is_warning() {
        let mut config = valid_config();
        config.providers.primary = Some(RemoteProviderConfig::new("https://sandbox.example", ""));
        let result = validate_config(&config);
        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.path == "providers.primary"));
    }

    #[test]
    fn test_non_monotonic_tiers() {
        let mut config = valid_config();
        config.limits.tiers.free.timeout_ms = config.limits.tiers.enterprise.timeout_ms + 1;
        let result = validate_config(&config);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.path == "limits.tiers"));
    }

    #[test]
    fn test_auth_disabled_is_warning() {
        let mut config = valid_config();
        config.auth.mode = AuthMode::None;
        config.auth.tokens.clear();
        let result = validate_config(&config);
        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.path == "auth.mode"));
    }
}
