//! Per-caller execution rate limiting
//!
//! Fixed-window counters kept in a moka cache. Each caller's counter is
//! created on first use and expires `window` after creation, which is the
//! reset policy: the next request after expiry starts a fresh window.

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::Tier;
use crate::error::{Error, Result};

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Disable to skip rate limiting entirely
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Window length
    #[serde(with = "humantime_serde", default = "default_window")]
    pub window: Duration,
    /// Executions per window for free callers
    #[serde(default = "default_free")]
    pub free: u32,
    /// Executions per window for pro callers
    #[serde(default = "default_pro")]
    pub pro: u32,
    /// Executions per window for enterprise callers
    #[serde(default = "default_enterprise")]
    pub enterprise: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            enabled: true,
            window: default_window(),
            free: default_free(),
            pro: default_pro(),
            enterprise: default_enterprise(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_window() -> Duration {
    Duration::from_secs(60)
}

fn default_free() -> u32 {
    20
}

fn default_pro() -> u32 {
    120
}

fn default_enterprise() -> u32 {
    1200
}

impl RateLimitConfig {
    pub fn budget_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.free,
            Tier::Pro => self.pro,
            Tier::Enterprise => self.enterprise,
        }
    }
}

/// Injected, shareable rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Cache<String, Arc<AtomicU32>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let windows = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(config.window)
            .build();

        RateLimiter { config, windows }
    }

    /// Count one execution for `user_id`, failing once the tier budget for
    /// the current window is spent.
    pub async fn check(&self, user_id: &str, tier: Tier) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let budget = self.config.budget_for(tier);
        let counter = self
            .windows
            .get_with(user_id.to_string(), async { Arc::new(AtomicU32::new(0)) })
            .await;

        let used = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if used > budget {
            return Err(Error::RateLimit(format!(
                "{} executions per {}s allowed for the {} tier",
                budget,
                self.config.window.as_secs(),
                tier
            )));
        }
        Ok(())
    }
}
