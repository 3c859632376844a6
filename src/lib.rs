//! # Snippet Runner
//!
//! A tiered, policy-enforcing gateway for running untrusted code snippets.
//!
//! ## Features
//!
//! - **Static screening:** per-language pattern scan that blocks or flags code
//! - **Tiered limits:** monotone timeout, memory, CPU and output ceilings per tier
//! - **Provider fallback:** session sandbox, Piston-compatible engine and
//!   function runner tried in order, with a simulated last resort
//! - **Usage ledger:** one append-only record per execution

pub mod audit;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod limits;
pub mod orchestrator;
pub mod sandbox;
pub mod security;

pub use config::Config;
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
