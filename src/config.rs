//! Configuration for paygate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::catalog::{EndpointCategory, PassGrant, PricingRecord};
use crate::payment::FacilitatorConfig;
use crate::tiers::{ApiKeyTier, TierRegistry};

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Socket address to serve on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Chain identifier payments settle on.
    #[serde(default = "default_network")]
    pub network: String,

    /// Settlement token contract address.
    #[serde(default = "default_asset")]
    pub asset: String,

    /// Address payments must be made out to.
    #[serde(default = "default_pay_to")]
    pub pay_to: String,

    /// Unpriced endpoint suggested to callers without credentials.
    #[serde(default = "default_free_alternative")]
    pub free_alternative: Option<String>,

    /// Longest validity window clients should sign, in seconds.
    #[serde(default = "default_max_timeout_seconds")]
    pub max_timeout_seconds: u64,

    /// Pass holders get this multiple of an endpoint's per-minute limit.
    #[serde(default = "default_pass_limit_multiplier")]
    pub pass_limit_multiplier: i64,

    /// Seconds between expiry sweeps of the rate-limit and pass tables.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Request body limit in KiB.
    #[serde(default = "default_body_limit_kb")]
    pub body_limit_kb: usize,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Facilitator settings.
    #[serde(default)]
    pub facilitator: FacilitatorSettings,

    /// Payment verification settings.
    #[serde(default)]
    pub verify: VerifySettings,

    /// Priced endpoints.
    #[serde(default = "default_pricing")]
    pub pricing: Vec<PricingRecord>,

    /// API-key tiers.
    #[serde(default = "TierRegistry::default_tiers")]
    pub tiers: Vec<ApiKeyTier>,
}

/// Facilitator connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilitatorSettings {
    /// Base URL of the facilitator service.
    #[serde(default = "default_facilitator_url")]
    pub url: String,

    /// Timeout for verify calls, in seconds.
    #[serde(default = "default_facilitator_timeout_secs")]
    pub timeout_secs: u64,
}

impl FacilitatorSettings {
    /// Client configuration for these settings.
    #[must_use]
    pub fn client_config(&self) -> FacilitatorConfig {
        FacilitatorConfig {
            url: self.url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl Default for FacilitatorSettings {
    fn default() -> Self {
        Self {
            url: default_facilitator_url(),
            timeout_secs: default_facilitator_timeout_secs(),
        }
    }
}

/// Payment verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySettings {
    /// Protocol version accepted from clients.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,

    /// Accept structurally-plausible proofs when the facilitator is
    /// unreachable. Leave off outside controlled environments.
    #[serde(default)]
    pub allow_degraded_trust: bool,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            allow_degraded_trust: false,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            network: default_network(),
            asset: default_asset(),
            pay_to: default_pay_to(),
            free_alternative: default_free_alternative(),
            max_timeout_seconds: default_max_timeout_seconds(),
            pass_limit_multiplier: default_pass_limit_multiplier(),
            sweep_interval_secs: default_sweep_interval_secs(),
            body_limit_kb: default_body_limit_kb(),
            log_level: default_log_level(),
            facilitator: FacilitatorSettings::default(),
            verify: VerifySettings::default(),
            pricing: default_pricing(),
            tiers: TierRegistry::default_tiers(),
        }
    }
}

fn default_listen() -> SocketAddr {
    use std::net::{IpAddr, Ipv4Addr};
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8402)
}

fn default_network() -> String {
    "base".to_string()
}

fn default_asset() -> String {
    // USDC on Base mainnet.
    "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string()
}

fn default_pay_to() -> String {
    "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".to_string()
}

fn default_free_alternative() -> Option<String> {
    Some("/api/news".to_string())
}

const fn default_max_timeout_seconds() -> u64 {
    300
}

const fn default_pass_limit_multiplier() -> i64 {
    10
}

const fn default_sweep_interval_secs() -> u64 {
    60
}

const fn default_body_limit_kb() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_facilitator_url() -> String {
    "https://x402.org/facilitator".to_string()
}

const fn default_facilitator_timeout_secs() -> u64 {
    10
}

const fn default_protocol_version() -> u32 {
    2
}

fn default_pricing() -> Vec<PricingRecord> {
    vec![
        PricingRecord {
            endpoint: "/api/v1/coins".to_string(),
            price_usd: 0.01,
            category: EndpointCategory::Market,
            requests_per_minute: 60,
            description: "Premium coin listings with live market data".to_string(),
            mime_type: "application/json".to_string(),
            pass: None,
        },
        PricingRecord {
            endpoint: "/api/v1/historical".to_string(),
            price_usd: 0.05,
            category: EndpointCategory::Market,
            requests_per_minute: 30,
            description: "Historical price series".to_string(),
            mime_type: "application/json".to_string(),
            pass: None,
        },
        PricingRecord {
            endpoint: "/api/v1/defi".to_string(),
            price_usd: 0.02,
            category: EndpointCategory::Defi,
            requests_per_minute: 60,
            description: "DeFi protocol analytics".to_string(),
            mime_type: "application/json".to_string(),
            pass: None,
        },
        PricingRecord {
            endpoint: "/api/v1/portfolio".to_string(),
            price_usd: 0.02,
            category: EndpointCategory::Portfolio,
            requests_per_minute: 60,
            description: "Portfolio aggregation with prices".to_string(),
            mime_type: "application/json".to_string(),
            pass: None,
        },
        PricingRecord {
            endpoint: "/api/v1/export".to_string(),
            price_usd: 0.10,
            category: EndpointCategory::Analytics,
            requests_per_minute: 10,
            description: "Bulk data export".to_string(),
            mime_type: "application/json".to_string(),
            pass: None,
        },
        PricingRecord {
            endpoint: "/api/v1/pass/day".to_string(),
            price_usd: 0.25,
            category: EndpointCategory::Analytics,
            requests_per_minute: 10,
            description: "24-hour elevated access pass".to_string(),
            mime_type: "application/json".to_string(),
            pass: Some(PassGrant {
                duration_secs: 86_400,
                tier: "day-pass".to_string(),
            }),
        },
    ]
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check invariants that cannot be expressed in the type system.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::Error::Config`] describing the first problem.
    pub fn validate(&self) -> crate::Result<()> {
        if self.pay_to.is_empty() || !self.pay_to.starts_with("0x") {
            return Err(crate::Error::Config(format!(
                "pay_to must be a 0x-prefixed address, got {:?}",
                self.pay_to
            )));
        }
        if self.facilitator.url.is_empty() {
            return Err(crate::Error::Config(
                "facilitator.url must not be empty".to_string(),
            ));
        }
        if let Some(bad) = self.pricing.iter().find(|r| r.price_usd < 0.0) {
            return Err(crate::Error::Config(format!(
                "negative price for endpoint {}",
                bad.endpoint
            )));
        }
        if self.pass_limit_multiplier < 1 {
            return Err(crate::Error::Config(
                "pass_limit_multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
