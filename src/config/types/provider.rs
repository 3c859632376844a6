//! Provider configuration types
//!
//! Endpoints and credentials for the remote execution providers, plus the
//! simulated fallback's options.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Session sandbox API
    pub primary: Option<RemoteProviderConfig>,
    /// Piston-compatible engine
    pub secondary: Option<RemoteProviderConfig>,
    /// Function runner
    pub tertiary: Option<RemoteProviderConfig>,
    /// Simulated fallback
    #[serde(default)]
    pub simulated: SimulatedConfig,
    /// Added to the tier timeout to bound each attempt
    #[serde(default = "default_attempt_overhead", with = "humantime_serde")]
    pub attempt_overhead: Duration,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            primary: None,
            secondary: None,
            tertiary: None,
            simulated: SimulatedConfig::default(),
            attempt_overhead: default_attempt_overhead(),
        }
    }
}

impl ProvidersConfig {
    /// Slot lookup by role
    pub fn get(&self, role: ProviderRole) -> Option<&RemoteProviderConfig> {
        match role {
            ProviderRole::Primary => self.primary.as_ref(),
            ProviderRole::Secondary => self.secondary.as_ref(),
            ProviderRole::Tertiary => self.tertiary.as_ref(),
        }
    }

    /// Mutable slot, created empty if missing
    pub fn slot_mut(&mut self, role: ProviderRole) -> &mut RemoteProviderConfig {
        let slot = match role {
            ProviderRole::Primary => &mut self.primary,
            ProviderRole::Secondary => &mut self.secondary,
            ProviderRole::Tertiary => &mut self.tertiary,
        };
        slot.get_or_insert_with(RemoteProviderConfig::default)
    }
}

fn default_attempt_overhead() -> Duration {
    Duration::from_secs(5)
}

fn default_secret() -> SecretString {
    SecretString::from(String::new())
}

/// Position of a remote provider in the fallback order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderRole {
    Primary,
    Secondary,
    Tertiary,
}

impl ProviderRole {
    /// Priority order
    pub const ALL: [ProviderRole; 3] = [
        ProviderRole::Primary,
        ProviderRole::Secondary,
        ProviderRole::Tertiary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderRole::Primary => "primary",
            ProviderRole::Secondary => "secondary",
            ProviderRole::Tertiary => "tertiary",
        }
    }

    /// Id reported when the config does not name one
    pub fn default_id(&self) -> &'static str {
        match self {
            ProviderRole::Primary => "session-sandbox",
            ProviderRole::Secondary => "piston",
            ProviderRole::Tertiary => "function-runner",
        }
    }

    /// Whether the backend sandboxes code itself unless told otherwise
    pub fn default_native_isolation(&self) -> bool {
        !matches!(self, ProviderRole::Tertiary)
    }

    /// Prefix of this role's environment overrides
    pub fn env_prefix(&self) -> &'static str {
        match self {
            ProviderRole::Primary => "PRIMARY_SANDBOX",
            ProviderRole::Secondary => "SECONDARY_SANDBOX",
            ProviderRole::Tertiary => "TERTIARY_SANDBOX",
        }
    }
}

impl std::fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Remote provider endpoint and credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProviderConfig {
    /// Base URL
    #[serde(default)]
    pub endpoint: String,
    /// API key
    #[serde(skip_serializing, default = "default_secret")]
    pub api_key: SecretString,
    /// Reported provider id (`sandbox_region`)
    pub id: Option<String>,
    /// Whether the backend sandboxes code on its own
    pub native_isolation: Option<bool>,
}

impl Default for RemoteProviderConfig {
    fn default() -> Self {
        RemoteProviderConfig {
            endpoint: String::new(),
            api_key: default_secret(),
            id: None,
            native_isolation: None,
        }
    }
}

impl RemoteProviderConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        RemoteProviderConfig {
            endpoint: endpoint.into(),
            api_key: SecretString::from(api_key.into()),
            ..Default::default()
        }
    }

    /// Both an endpoint and a credential are present
    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty() && !self.api_key.expose_secret().trim().is_empty()
    }

    /// Endpoint without a trailing slash
    pub fn base_url(&self) -> &str {
        self.endpoint.trim().trim_end_matches('/')
    }
}

/// Simulated fallback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// Run snippets with a local interpreter when one is installed
    #[serde(default)]
    pub local_runtime: bool,
    /// Working directory for local runs
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        SimulatedConfig {
            local_runtime: false,
            work_dir: default_work_dir(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("snippet-runner")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_configured_requires_both_fields() {
        assert!(RemoteProviderConfig::new("https://sandbox.example", "key").is_configured());
        assert!(!RemoteProviderConfig::new("", "key").is_configured());
        assert!(!RemoteProviderConfig::new("https://sandbox.example", "  ").is_configured());
    }

    #[test]
    fn test_base_url_strips_trailing_slash() {
        let config = RemoteProviderConfig::new("https://sandbox.example/api/ ", "key");
        assert_eq!(config.base_url(), "https://sandbox.example/api");
    }

    #[test]
    fn test_role_defaults() {
        assert!(ProviderRole::Primary.default_native_isolation());
        assert!(ProviderRole::Secondary.default_native_isolation());
        assert!(!ProviderRole::Tertiary.default_native_isolation());
    }

    #[test]
    fn test_deserialize_with_durations() {
        let config: ProvidersConfig = serde_json::from_str(
            r#"{"primary":{"endpoint":"https://a","api_key":"k"},"attempt_overhead":"2s"}"#,
        )
        .unwrap();
        assert_eq!(config.attempt_overhead, Duration::from_secs(2));
        assert!(config.get(ProviderRole::Primary).unwrap().is_configured());
        assert!(config.get(ProviderRole::Secondary).is_none());
        assert!(!config.simulated.local_runtime);
    }
}
