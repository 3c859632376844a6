//! Resource limits - Per-tier execution ceilings
//!
//! Maps a caller's subscription tier to an immutable [`ResourceLimits`]
//! record. The table is read-only after construction and shared across
//! requests without locking.

mod rate;

pub use rate::{RateLimitConfig, RateLimiter};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Subscription tier of a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    /// All tiers, lowest first
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Pro, Tier::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            _ => Err(Error::InvalidInput(format!(
                "Unknown tier: {}. Valid: free, pro, enterprise",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resource ceilings applied to one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall-clock budget in milliseconds
    pub timeout_ms: u64,
    /// Memory ceiling in megabytes
    pub memory_mb: u64,
    /// Relative CPU weight
    pub cpu_shares: u32,
    /// Maximum captured stdout size
    pub max_output_bytes: usize,
}

impl ResourceLimits {
    /// True if every field of `self` is <= the matching field of `other`
    pub fn is_within(&self, other: &ResourceLimits) -> bool {
        self.timeout_ms <= other.timeout_ms
            && self.memory_mb <= other.memory_mb
            && self.cpu_shares <= other.cpu_shares
            && self.max_output_bytes <= other.max_output_bytes
    }

    /// Apply a caller-requested timeout. Only tightens.
    pub fn with_requested_timeout(mut self, requested_ms: Option<u64>) -> Self {
        if let Some(requested) = requested_ms {
            if requested < self.timeout_ms {
                self.timeout_ms = requested;
            }
        }
        self
    }
}

/// Limits for every tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable {
    #[serde(default = "default_free")]
    pub free: ResourceLimits,
    #[serde(default = "default_pro")]
    pub pro: ResourceLimits,
    #[serde(default = "default_enterprise")]
    pub enterprise: ResourceLimits,
}

impl Default for TierTable {
    fn default() -> Self {
        TierTable {
            free: default_free(),
            pro: default_pro(),
            enterprise: default_enterprise(),
        }
    }
}

fn default_free() -> ResourceLimits {
    ResourceLimits {
        timeout_ms: 10_000,
        memory_mb: 128,
        cpu_shares: 256,
        max_output_bytes: 64 * 1024,
    }
}

fn default_pro() -> ResourceLimits {
    ResourceLimits {
        timeout_ms: 30_000,
        memory_mb: 512,
        cpu_shares: 512,
        max_output_bytes: 1024 * 1024,
    }
}

fn default_enterprise() -> ResourceLimits {
    ResourceLimits {
        timeout_ms: 120_000,
        memory_mb: 2048,
        cpu_shares: 1024,
        max_output_bytes: 10 * 1024 * 1024,
    }
}

impl TierTable {
    pub fn get(&self, tier: Tier) -> &ResourceLimits {
        match tier {
            Tier::Free => &self.free,
            Tier::Pro => &self.pro,
            Tier::Enterprise => &self.enterprise,
        }
    }

    /// Check that no field shrinks from one tier to the next, and that no
    /// field is zero.
    pub fn check_monotonic(&self) -> Result<()> {
        for tier in Tier::ALL {
            let limits = self.get(tier);
            if limits.timeout_ms == 0
                || limits.memory_mb == 0
                || limits.cpu_shares == 0
                || limits.max_output_bytes == 0
            {
                return Err(Error::Config(format!(
                    "Tier '{}' has a zero resource limit",
                    tier
                )));
            }
        }
        for pair in Tier::ALL.windows(2) {
            let (lower, upper) = (pair[0], pair[1]);
            if !self.get(lower).is_within(self.get(upper)) {
                return Err(Error::Config(format!(
                    "Tier '{}' must not exceed tier '{}' on any limit",
                    lower, upper
                )));
            }
        }
        Ok(())
    }
}

/// Pure lookup from tier to limits
#[derive(Debug, Clone)]
pub struct ResourceLimitPolicy {
    table: TierTable,
}

impl Default for ResourceLimitPolicy {
    fn default() -> Self {
        ResourceLimitPolicy {
            table: TierTable::default(),
        }
    }
}

impl ResourceLimitPolicy {
    /// Build a policy, rejecting tables that are not monotone across tiers.
    pub fn new(table: TierTable) -> Result<Self> {
        table.check_monotonic()?;
        Ok(ResourceLimitPolicy { table })
    }

    pub fn limits_for(&self, tier: Tier) -> ResourceLimits {
        *self.table.get(tier)
    }

    /// Tier limits with an optional caller timeout applied. A caller can
    /// tighten its own ceiling but never loosen it.
    pub fn effective_limits(&self, tier: Tier, requested_timeout_ms: Option<u64>) -> ResourceLimits {
        self.limits_for(tier)
            .with_requested_timeout(requested_timeout_ms)
    }

    pub fn table(&self) -> &TierTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_monotonic() {
        let policy = ResourceLimitPolicy::default();
        let free = policy.limits_for(Tier::Free);
        let pro = policy.limits_for(Tier::Pro);
        let enterprise = policy.limits_for(Tier::Enterprise);

        assert!(free.timeout_ms <= pro.timeout_ms && pro.timeout_ms <= enterprise.timeout_ms);
        assert!(free.memory_mb <= pro.memory_mb && pro.memory_mb <= enterprise.memory_mb);
        assert!(free.cpu_shares <= pro.cpu_shares && pro.cpu_shares <= enterprise.cpu_shares);
        assert!(
            free.max_output_bytes <= pro.max_output_bytes
                && pro.max_output_bytes <= enterprise.max_output_bytes
        );
        assert!(TierTable::default().check_monotonic().is_ok());
    }

    #[test]
    fn test_non_monotonic_table_rejected() {
        let mut table = TierTable::default();
        table.pro.memory_mb = table.free.memory_mb - 1;
        assert!(matches!(ResourceLimitPolicy::new(table), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let mut table = TierTable::default();
        table.free.max_output_bytes = 0;
        assert!(ResourceLimitPolicy::new(table).is_err());
    }

    #[test]
    fn test_requested_timeout_can_only_tighten() {
        let policy = ResourceLimitPolicy::default();
        let ceiling = policy.limits_for(Tier::Free).timeout_ms;

        let looser = policy.effective_limits(Tier::Free, Some(ceiling * 10));
        assert_eq!(looser.timeout_ms, ceiling);

        let equal = policy.effective_limits(Tier::Free, Some(ceiling));
        assert_eq!(equal.timeout_ms, ceiling);

        let tighter = policy.effective_limits(Tier::Free, Some(500));
        assert_eq!(tighter.timeout_ms, 500);

        let unset = policy.effective_limits(Tier::Pro, None);
        assert_eq!(unset, policy.limits_for(Tier::Pro));
    }

    #[test]
    fn test_requested_timeout_leaves_other_fields() {
        let policy = ResourceLimitPolicy::default();
        let limits = policy.effective_limits(Tier::Enterprise, Some(1));
        let base = policy.limits_for(Tier::Enterprise);
        assert_eq!(limits.memory_mb, base.memory_mb);
        assert_eq!(limits.max_output_bytes, base.max_output_bytes);
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("free".parse::<Tier>().unwrap(), Tier::Free);
        assert_eq!("PRO".parse::<Tier>().unwrap(), Tier::Pro);
        assert!("platinum".parse::<Tier>().is_err());
        assert!(Tier::Free < Tier::Pro && Tier::Pro < Tier::Enterprise);
    }
}
