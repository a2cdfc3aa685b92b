//! Priced-endpoint catalog.
//!
//! Immutable table mapping endpoint paths to their price, category and
//! rate-limit parameters. Loaded once from configuration at startup.

use serde::{Deserialize, Serialize};

/// Decimal places of the settlement asset (USDC).
pub const ATOMIC_DECIMALS: u32 = 6;

/// Atomic units per whole USD at [`ATOMIC_DECIMALS`] precision.
const ATOMIC_PER_USD: f64 = 1_000_000.0;

/// Category of a priced endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointCategory {
    /// Market data (coin listings, prices, historical series).
    Market,
    /// DeFi protocol data.
    Defi,
    /// Portfolio aggregation.
    Portfolio,
    /// News feeds.
    News,
    /// Analytics and data export.
    Analytics,
}

/// Entitlement granted on successful payment for a pass product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassGrant {
    /// How long the pass lasts, in seconds.
    pub duration_secs: u64,
    /// Tier name recorded on the pass.
    pub tier: String,
}

/// A single priced endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRecord {
    /// Endpoint path pattern (exact path or prefix).
    pub endpoint: String,
    /// Price in USD. Must be non-negative.
    pub price_usd: f64,
    /// Endpoint category.
    pub category: EndpointCategory,
    /// Requests allowed per minute for pay-per-request callers.
    /// `-1` means unlimited.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: i64,
    /// Human-readable description, shown in payment requirements.
    pub description: String,
    /// Content type of the gated resource.
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// Present only for access-pass products.
    #[serde(default)]
    pub pass: Option<PassGrant>,
}

impl PricingRecord {
    /// Price converted to atomic token units (round-half-up at
    /// [`ATOMIC_DECIMALS`] places).
    ///
    /// This conversion must match the unit convention the facilitator and
    /// clients use; drift here rejects every payment as underpaid.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn required_atomic_amount(&self) -> u64 {
        (self.price_usd.max(0.0) * ATOMIC_PER_USD).round() as u64
    }

    /// Whether a successful payment for this endpoint grants an access pass.
    #[must_use]
    pub fn grants_pass(&self) -> bool {
        self.pass.is_some()
    }
}

fn default_requests_per_minute() -> i64 {
    60
}

fn default_mime_type() -> String {
    "application/json".to_string()
}

/// Ordered pricing table with a deterministic matcher.
///
/// Lookup tries an exact path match first, then the longest configured
/// prefix. Ordering in the table does not affect the result, so two
/// entries sharing a prefix resolve unambiguously.
#[derive(Debug, Clone)]
pub struct PricingCatalog {
    records: Vec<PricingRecord>,
}

impl PricingCatalog {
    /// Build a catalog from configured records.
    #[must_use]
    pub fn new(records: Vec<PricingRecord>) -> Self {
        Self { records }
    }

    /// Find the pricing record for a request path.
    ///
    /// Exact match wins; otherwise the record with the longest matching
    /// prefix is returned. `None` means the path is not priced.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&PricingRecord> {
        if let Some(exact) = self.records.iter().find(|r| r.endpoint == path) {
            return Some(exact);
        }
        self.records
            .iter()
            .filter(|r| path.starts_with(r.endpoint.as_str()))
            .max_by_key(|r| r.endpoint.len())
    }

    /// Atomic amount required for a request path, if it is priced.
    #[must_use]
    pub fn required_atomic_amount(&self, path: &str) -> Option<u64> {
        self.lookup(path).map(PricingRecord::required_atomic_amount)
    }

    /// Number of configured records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the catalog has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn record(endpoint: &str, price_usd: f64) -> PricingRecord {
        PricingRecord {
            endpoint: endpoint.to_string(),
            price_usd,
            category: EndpointCategory::Market,
            requests_per_minute: 60,
            description: format!("test record for {endpoint}"),
            mime_type: default_mime_type(),
            pass: None,
        }
    }

    #[test]
    fn atomic_amount_round_half_up() {
        assert_eq!(record("/a", 0.01).required_atomic_amount(), 10_000);
        assert_eq!(record("/a", 0.02).required_atomic_amount(), 20_000);
        assert_eq!(record("/a", 1.0).required_atomic_amount(), 1_000_000);
        assert_eq!(record("/a", 0.123_456).required_atomic_amount(), 123_456);
        assert_eq!(record("/a", 0.0).required_atomic_amount(), 0);
    }

    #[test]
    fn negative_price_clamps_to_zero() {
        assert_eq!(record("/a", -0.5).required_atomic_amount(), 0);
    }

    #[test]
    fn exact_match_beats_prefix() {
        let catalog = PricingCatalog::new(vec![
            record("/api/v1/coins", 0.01),
            record("/api/v1/coins/history", 0.05),
        ]);
        let hit = catalog.lookup("/api/v1/coins/history").expect("match");
        assert!((hit.price_usd - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn longest_prefix_wins_regardless_of_order() {
        let catalog = PricingCatalog::new(vec![
            record("/api/v1", 0.01),
            record("/api/v1/coins", 0.02),
        ]);
        let hit = catalog.lookup("/api/v1/coins/bitcoin").expect("match");
        assert_eq!(hit.endpoint, "/api/v1/coins");

        // Same table, reversed order: same answer.
        let catalog = PricingCatalog::new(vec![
            record("/api/v1/coins", 0.02),
            record("/api/v1", 0.01),
        ]);
        let hit = catalog.lookup("/api/v1/coins/bitcoin").expect("match");
        assert_eq!(hit.endpoint, "/api/v1/coins");
    }

    #[test]
    fn unpriced_path_is_not_found() {
        let catalog = PricingCatalog::new(vec![record("/api/v1/coins", 0.01)]);
        assert!(catalog.lookup("/api/news").is_none());
        assert!(catalog.required_atomic_amount("/api/news").is_none());
    }
}
