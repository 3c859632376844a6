//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

use super::types::provider::ProviderRole;
use super::types::Config;
use crate::error::{Error, Result};

/// A snapshot of the configuration file
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Path to the config file
    pub path: PathBuf,
    /// Whether the file exists
    pub exists: bool,
    /// Parsed configuration
    pub config: Option<Config>,
    /// Read or parse problems
    pub issues: Vec<String>,
}

/// Load configuration with layered precedence:
/// 1. Config file if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    load_config_layered(&super::paths::config_path())
}

/// Same layering as [`load_config`], from an explicit file
pub fn load_config_layered(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        load_config_from_path(path)?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads a `.env` file first when present. Env vars have the highest
/// precedence: defaults < file < env.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

fn apply_overrides_from(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    // Sandbox provider overrides
    for role in ProviderRole::ALL {
        let prefix = role.env_prefix();
        if let Some(url) = var(&format!("{}_URL", prefix)) {
            config.providers.slot_mut(role).endpoint = url;
        }
        if let Some(key) = var(&format!("{}_API_KEY", prefix)) {
            config.providers.slot_mut(role).api_key = SecretString::from(key);
        }
    }
    if let Some(v) = var("SIMULATED_LOCAL_RUNTIME") {
        config.providers.simulated.local_runtime = v == "true" || v == "1";
    }

    // Gateway overrides
    if let Some(port) = var("GATEWAY_PORT") {
        if let Ok(port) = port.parse() {
            config.gateway.port = port;
        }
    }
    if let Some(bind) = var("GATEWAY_BIND") {
        config.gateway.bind = bind;
    }

    // Audit overrides
    if let Some(path) = var("AUDIT_LOG_PATH") {
        config.audit.path = Some(PathBuf::from(path));
    }
}

/// Save configuration to a file
///
/// Secrets are never written back.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}

/// Read a configuration file into a snapshot
pub fn read_config_snapshot(path: &Path) -> ConfigSnapshot {
    if !path.exists() {
        return ConfigSnapshot {
            path: path.to_path_buf(),
            exists: false,
            config: None,
            issues: vec!["Configuration file does not exist".to_string()],
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigSnapshot {
            path: path.to_path_buf(),
            exists: true,
            config: Some(config),
            issues: Vec::new(),
        },
        Err(e) => ConfigSnapshot {
            path: path.to_path_buf(),
            exists: true,
            config: None,
            issues: vec![e.to_string()],
        },
    }
}
