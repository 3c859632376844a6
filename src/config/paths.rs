//! Configuration paths
//!
//! Utilities for resolving configuration file paths.

use std::path::PathBuf;

/// Get the configuration directory
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SNIPPET_RUNNER_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::config_dir()
        .map(|d| d.join("snippet-runner"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".config").join("snippet-runner"))
                .unwrap_or_else(|| PathBuf::from(".snippet-runner"))
        })
}

/// Get the main configuration file path
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SNIPPET_RUNNER_CONFIG") {
        return PathBuf::from(path);
    }

    config_dir().join("config.json")
}

/// Get the state directory (usage ledger)
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SNIPPET_RUNNER_STATE_DIR") {
        return PathBuf::from(dir);
    }

    dirs::data_dir()
        .map(|d| d.join("snippet-runner"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".local").join("share").join("snippet-runner"))
                .unwrap_or_else(|| PathBuf::from(".snippet-runner"))
        })
}

/// Default location of the JSON-lines usage ledger
pub fn audit_log_path() -> PathBuf {
    state_dir().join("audit.jsonl")
}
