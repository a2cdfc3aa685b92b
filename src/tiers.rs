//! API-key subscription tiers.
//!
//! Tiers are static configuration resolved from an API key's prefix;
//! nothing here is derived state.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A named subscription level with a daily quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyTier {
    /// Tier name (e.g. `free`, `pro`, `enterprise`).
    pub name: String,
    /// Key prefix that maps onto this tier.
    pub key_prefix: String,
    /// Requests allowed per day. `-1` means unlimited.
    pub requests_per_day: i64,
    /// Features unlocked at this tier, echoed in payment-required bodies.
    #[serde(default)]
    pub features: Vec<String>,
}

/// Resolves API keys to tiers by prefix.
#[derive(Debug, Clone)]
pub struct TierRegistry {
    tiers: Vec<ApiKeyTier>,
}

impl TierRegistry {
    /// Build a registry from configured tiers.
    #[must_use]
    pub fn new(tiers: Vec<ApiKeyTier>) -> Self {
        Self { tiers }
    }

    /// The stock tier table.
    #[must_use]
    pub fn default_tiers() -> Vec<ApiKeyTier> {
        vec![
            ApiKeyTier {
                name: "free".to_string(),
                key_prefix: "cda_free_".to_string(),
                requests_per_day: 100,
                features: vec!["premium-endpoints".to_string()],
            },
            ApiKeyTier {
                name: "pro".to_string(),
                key_prefix: "cda_pro_".to_string(),
                requests_per_day: 10_000,
                features: vec![
                    "premium-endpoints".to_string(),
                    "historical-data".to_string(),
                    "data-export".to_string(),
                ],
            },
            ApiKeyTier {
                name: "enterprise".to_string(),
                key_prefix: "cda_ent_".to_string(),
                requests_per_day: -1,
                features: vec![
                    "premium-endpoints".to_string(),
                    "historical-data".to_string(),
                    "data-export".to_string(),
                    "priority-support".to_string(),
                ],
            },
        ]
    }

    /// Resolve an API key to its tier. `None` means the key is not one
    /// this gateway issues.
    #[must_use]
    pub fn resolve(&self, api_key: &str) -> Option<&ApiKeyTier> {
        self.tiers
            .iter()
            .filter(|t| api_key.starts_with(t.key_prefix.as_str()))
            .max_by_key(|t| t.key_prefix.len())
    }

    /// Number of configured tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Whether no tiers are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl Default for TierRegistry {
    fn default() -> Self {
        Self::new(Self::default_tiers())
    }
}

/// Short digest of an API key, safe to log.
#[must_use]
pub fn key_fingerprint(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    hex::encode(&digest[..4])
}
