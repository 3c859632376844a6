//! Sandbox module - Execution providers
//!
//! Provides three remote tiers plus a last-resort fallback:
//! - Primary: session sandbox API (create, execute, destroy)
//! - Secondary: Piston-compatible engine
//! - Tertiary: function runner, wrapper-only unless configured otherwise
//! - Simulated: static evaluation or an opt-in local interpreter

mod executor;
mod function;
mod local;
mod piston;
mod session;
mod simulated;

pub use executor::{
    ExecutionJob, ExecutionProvider, ExecutionRequest, ExitStatus, FailureKind, Isolation,
    Language, ProviderError, ProviderOutput,
};
pub use function::FunctionRunnerProvider;
pub use local::LocalRuntime;
pub use piston::PistonProvider;
pub use session::SessionSandboxProvider;
pub use simulated::{simulate, SimulatedProvider, Simulation, SIMULATED_PROVIDER_ID};

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{ProviderRole, ProvidersConfig};
use crate::error::Result;

/// Shared HTTP client settings for remote adapters
fn http_client() -> Result<Client> {
    let client = Client::builder()
        .user_agent(concat!("snippet-runner/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Send a request and decode a JSON body, classifying every failure
async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> std::result::Result<T, ProviderError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(status, &body));
    }
    Ok(response.json::<T>().await?)
}

/// Build the remote providers in priority order. A role with no endpoint or
/// credential is left out.
pub fn create_providers(config: &ProvidersConfig) -> Result<Vec<Arc<dyn ExecutionProvider>>> {
    let mut providers: Vec<Arc<dyn ExecutionProvider>> = Vec::new();

    for role in ProviderRole::ALL {
        let Some(remote) = config.get(role).filter(|c| c.is_configured()) else {
            warn!("{} provider is not configured, skipping", role);
            continue;
        };

        let provider: Arc<dyn ExecutionProvider> = match role {
            ProviderRole::Primary => Arc::new(SessionSandboxProvider::new(remote)?),
            ProviderRole::Secondary => Arc::new(PistonProvider::new(remote)?),
            ProviderRole::Tertiary => Arc::new(FunctionRunnerProvider::new(remote)?),
        };
        info!(
            "Registered {} provider '{}' ({:?} isolation)",
            role,
            provider.id(),
            provider.isolation()
        );
        providers.push(provider);
    }

    if providers.is_empty() {
        warn!("No remote providers configured; every execution will be simulated");
    }

    Ok(providers)
}

/// Build the fallback provider
pub fn create_fallback(config: &ProvidersConfig) -> SimulatedProvider {
    let provider = SimulatedProvider::new();
    if config.simulated.local_runtime {
        info!(
            "Simulated fallback may use local interpreters in {}",
            config.simulated.work_dir.display()
        );
        provider.with_local_runtime(LocalRuntime::new(config.simulated.work_dir.clone()))
    } else {
        provider
    }
}
