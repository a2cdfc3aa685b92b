//! # paygate
//!
//! A hybrid payment / API-key access-control gateway for priced HTTP APIs.
//!
//! Every request to a priced endpoint is decided by the
//! [`HybridAuthGate`](gate::HybridAuthGate), which combines:
//! - API-key subscription tiers with daily quotas
//! - x402 micropayment proofs settled via a remote facilitator
//! - Time-bounded wallet access passes purchased per payment
//! - Fixed-window rate limiting across both identifier spaces
//!
//! Callers without a usable credential receive a protocol-exact
//! HTTP 402 describing how to pay.
//!
//! ## Architecture
//!
//! The gate is pure orchestration over dependency-injected parts: the
//! rate limiter and pass store are traits, so the in-memory tables can be
//! swapped for a shared networked store without touching decision logic.
//! The facilitator is a trait for the same reason.
//!
//! ## Example
//!
//! ```rust,no_run
//! use paygate::config::GatewayConfig;
//! use paygate::event::create_event_channel;
//! use paygate::http::{run_server, AppState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::default();
//!     let (events, _rx) = create_event_channel();
//!     let state = AppState::from_config(&config, events)?;
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     run_server(&config, state, shutdown_rx).await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod catalog;
mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod gate;
pub mod http;
pub mod limiter;
pub mod pass;
pub mod payment;
pub mod response;
pub mod sweep;
pub mod tiers;

pub use catalog::{EndpointCategory, PassGrant, PricingCatalog, PricingRecord};
pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use event::{create_event_channel, GatewayEvent, GatewayEventsChannel, GatewayEventsSender};
pub use gate::{Credentials, Decision, HybridAuthGate, Passthrough, TerminalResponse};
pub use limiter::{ClientId, MemoryRateLimiter, RateDecision, RateLimiter};
pub use pass::{MemoryPassStore, PassCheck, PassStore};
pub use payment::{
    Facilitator, FacilitatorConfig, FacilitatorOutcome, HttpFacilitator, PaymentPayload,
    PaymentVerifier, RejectReason, Verification, VerifierConfig,
};
pub use response::{PaymentRequirements, ResponseBuilder};
pub use tiers::{ApiKeyTier, TierRegistry};
