//! Command-line interface definition.

use clap::Parser;
use paygate::config::GatewayConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Hybrid payment and API-key access-control gateway for priced HTTP APIs.
#[derive(Parser, Debug)]
#[command(name = "paygate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address to serve on.
    #[arg(long, short, env = "PAYGATE_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Address payments must be made out to.
    #[arg(long, env = "PAYGATE_PAY_TO")]
    pub pay_to: Option<String>,

    /// Facilitator base URL.
    #[arg(long, env = "PAYGATE_FACILITATOR_URL")]
    pub facilitator_url: Option<String>,

    /// Accept structurally-plausible proofs when the facilitator is
    /// unreachable. Non-production use only.
    #[arg(long, env = "PAYGATE_ALLOW_DEGRADED_TRUST")]
    pub allow_degraded_trust: bool,

    /// Seconds between expiry sweeps.
    #[arg(long, env = "PAYGATE_SWEEP_INTERVAL")]
    pub sweep_interval_secs: Option<u64>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Convert CLI arguments into a `GatewayConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<GatewayConfig> {
        // Start with default config or load from file
        let mut config = if let Some(ref path) = self.config {
            GatewayConfig::from_file(path)?
        } else {
            GatewayConfig::default()
        };

        // Override with CLI arguments
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(pay_to) = self.pay_to {
            config.pay_to = pay_to;
        }
        if let Some(url) = self.facilitator_url {
            config.facilitator.url = url;
        }
        if self.allow_degraded_trust {
            config.verify.allow_degraded_trust = true;
        }
        if let Some(secs) = self.sweep_interval_secs {
            config.sweep_interval_secs = secs;
        }
        config.log_level = self.log_level;

        Ok(config)
    }
}
