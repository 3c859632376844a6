//! Limit configuration types

use serde::{Deserialize, Serialize};

use crate::limits::{RateLimitConfig, TierTable};

/// Tier ceilings and request budgets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Resource ceilings per tier
    #[serde(default)]
    pub tiers: TierTable,
    /// Executions per window per tier
    #[serde(default)]
    pub rate: RateLimitConfig,
}
