//! Configuration types module
//!
//! Re-exports all configuration types.

pub mod limits;
pub mod provider;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::identity::TokenEntry;
use crate::limits::Tier;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Caller authentication
    #[serde(default)]
    pub auth: AuthConfig,

    /// Tier limits and rate limits
    #[serde(default)]
    pub limits: limits::LimitsConfig,

    /// Execution providers
    #[serde(default)]
    pub providers: provider::ProvidersConfig,

    /// Usage ledger
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_port() -> u16 {
    18790
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Authentication mode
    #[serde(default)]
    pub mode: AuthMode,
    /// Accepted bearer tokens
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
    /// Tier given to callers when `mode` is `none`
    #[serde(default = "default_anonymous_tier")]
    pub anonymous_tier: Tier,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            mode: AuthMode::default(),
            tokens: Vec::new(),
            anonymous_tier: default_anonymous_tier(),
        }
    }
}

fn default_anonymous_tier() -> Tier {
    Tier::Free
}

/// Authentication mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No authentication (local only)
    None,
    /// Bearer tokens from `auth.tokens`
    #[default]
    Token,
}

/// Usage ledger configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// JSON-lines ledger file; records stay in memory when unset
    pub path: Option<PathBuf>,
}
