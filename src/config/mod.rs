//! Configuration module
//!
//! - types/mod.rs: Core configuration types (Config, GatewayConfig, AuthConfig, etc.)
//! - types/provider.rs: Execution provider endpoints and the simulated fallback
//! - types/limits.rs: Tier ceilings and rate limits
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

// Re-export core config types
pub use types::{AuditConfig, AuthConfig, AuthMode, Config, GatewayConfig};

// Re-export limit types
pub use types::limits::LimitsConfig;

// Re-export provider types
pub use types::provider::{ProviderRole, ProvidersConfig, RemoteProviderConfig, SimulatedConfig};

// Re-export IO and utilities
pub use io::{
    apply_env_overrides, load_config, load_config_from_path, load_config_layered, read_config_snapshot,
    save_config, ConfigSnapshot,
};
pub use paths::{audit_log_path, config_dir, config_path, state_dir};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
