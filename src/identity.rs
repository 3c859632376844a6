//! Identity and entitlement
//!
//! Authentication and tier lookup are separate seams: a deployment can
//! verify tokens one way and look up billing tiers another.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::limits::Tier;

/// Resolves a bearer token to a user id
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Option<String>;
}

/// Resolves a user id to an entitlement tier
#[async_trait]
pub trait TierResolver: Send + Sync {
    async fn tier_for(&self, user_id: &str) -> Tier;
}

/// A configured API token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    #[serde(skip_serializing, default = "empty_token")]
    pub token: SecretString,
    pub user_id: String,
    #[serde(default = "default_tier")]
    pub tier: Tier,
}

fn empty_token() -> SecretString {
    SecretString::from(String::new())
}

fn default_tier() -> Tier {
    Tier::Free
}

impl TokenEntry {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>, tier: Tier) -> Self {
        TokenEntry {
            token: SecretString::from(token.into()),
            user_id: user_id.into(),
            tier,
        }
    }
}

/// Token table loaded from config; serves both seams
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    tokens: HashMap<String, String>,
    tiers: HashMap<String, Tier>,
}

impl StaticIdentity {
    pub fn new(entries: &[TokenEntry]) -> Self {
        let mut identity = StaticIdentity::default();
        for entry in entries {
            let token = entry.token.expose_secret().trim();
            if token.is_empty() {
                continue;
            }
            identity
                .tokens
                .insert(token.to_string(), entry.user_id.clone());
            identity.tiers.insert(entry.user_id.clone(), entry.tier);
        }
        identity
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn authenticate(&self, token: &str) -> Option<String> {
        self.tokens.get(token.trim()).cloned()
    }
}

#[async_trait]
impl TierResolver for StaticIdentity {
    async fn tier_for(&self, user_id: &str) -> Tier {
        self.tiers.get(user_id).copied().unwrap_or(Tier::Free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> StaticIdentity {
        StaticIdentity::new(&[
            TokenEntry::new("tok-free", "alice", Tier::Free),
            TokenEntry::new("tok-ent", "bob", Tier::Enterprise),
            TokenEntry::new("  ", "nobody", Tier::Pro),
        ])
    }

    #[tokio::test]
    async fn test_authenticate() {
        let identity = identity();
        assert_eq!(identity.authenticate("tok-ent").await.as_deref(), Some("bob"));
        assert_eq!(identity.authenticate("wrong").await, None);
        assert_eq!(identity.authenticate("").await, None);
    }

    #[tokio::test]
    async fn test_tier_lookup_defaults_to_free() {
        let identity = identity();
        assert_eq!(identity.tier_for("bob").await, Tier::Enterprise);
        assert_eq!(identity.tier_for("stranger").await, Tier::Free);
        assert_eq!(identity.tier_for("nobody").await, Tier::Free);
    }

    #[test]
    fn test_token_entry_deserializes() {
        let entry: TokenEntry =
            serde_json::from_str(r#"{"token":"t","user_id":"u","tier":"pro"}"#).unwrap();
        assert_eq!(entry.tier, Tier::Pro);
        let defaulted: TokenEntry = serde_json::from_str(r#"{"token":"t","user_id":"u"}"#).unwrap();
        assert_eq!(defaulted.tier, Tier::Free);
    }
}
