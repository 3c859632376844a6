//! Gateway module - HTTP front door
//!
//! ```text
//!   POST /v1/execute ──► auth ──► rate limit ──► ExecutionOrchestrator
//!   GET  /v1/providers
//!   GET  /health
//! ```
//!
//! Dropping a request future (caller disconnect) drops the in-flight
//! provider attempt with it.

mod handlers;
pub mod protocol;

pub use handlers::AppError;
pub use protocol::{ErrorResponse, ExecuteResponse, ProvidersResponse};

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;

use crate::audit::UsageLedger;
use crate::config::{AuthMode, Config};
use crate::error::Result;
use crate::identity::{IdentityProvider, StaticIdentity, TierResolver};
use crate::limits::{RateLimiter, Tier};
use crate::orchestrator::ExecutionOrchestrator;

/// Shared, read-only request context
#[derive(Clone)]
pub struct GatewayState {
    pub orchestrator: Arc<ExecutionOrchestrator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub identity: Arc<dyn IdentityProvider>,
    pub tiers: Arc<dyn TierResolver>,
    pub auth_mode: AuthMode,
    /// Tier of callers when authentication is off
    pub anonymous_tier: Tier,
}

impl GatewayState {
    pub fn new(
        orchestrator: Arc<ExecutionOrchestrator>,
        rate_limiter: Arc<RateLimiter>,
        identity: Arc<dyn IdentityProvider>,
        tiers: Arc<dyn TierResolver>,
    ) -> Self {
        GatewayState {
            orchestrator,
            rate_limiter,
            identity,
            tiers,
            auth_mode: AuthMode::Token,
            anonymous_tier: Tier::Free,
        }
    }

    /// Accept every caller as `anonymous` at `tier`
    pub fn without_auth(mut self, tier: Tier) -> Self {
        self.auth_mode = AuthMode::None;
        self.anonymous_tier = tier;
        self
    }

    /// Wire the orchestrator, limiter and static token table from config
    pub fn from_config(config: &Config, ledger: Arc<dyn UsageLedger>) -> Result<Self> {
        let orchestrator = Arc::new(ExecutionOrchestrator::from_config(config, ledger)?);
        let rate_limiter = Arc::new(RateLimiter::new(config.limits.rate.clone()));
        let identity = Arc::new(StaticIdentity::new(&config.auth.tokens));

        let mut state = GatewayState::new(orchestrator, rate_limiter, identity.clone(), identity);
        if config.auth.mode == AuthMode::None {
            state = state.without_auth(config.auth.anonymous_tier);
        }
        Ok(state)
    }
}

/// Build the gateway router
pub fn build_router(state: GatewayState) -> Router {
    let api = Router::new()
        .route("/execute", post(handlers::execute))
        .route("/providers", get(handlers::list_providers));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/v1", api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
}
