//! Settlement facilitator client.
//!
//! The facilitator is a remote service that cryptographically verifies and
//! settles payment proofs on behalf of the gateway. This module only
//! defines what the gateway sends and how it interprets the reply; the
//! facilitator's internal verification algorithm is its own business.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::payment::proof::PaymentPayload;

/// Configuration for the facilitator client.
#[derive(Debug, Clone)]
pub struct FacilitatorConfig {
    /// Base URL of the facilitator service.
    pub url: String,
    /// Timeout for the verify call. A hung facilitator must not stall
    /// request handling.
    pub timeout: Duration,
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self {
            url: "https://x402.org/facilitator".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of asking the facilitator to confirm a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FacilitatorOutcome {
    /// The facilitator verified and settled the payment.
    Confirmed {
        /// Settlement identifier, when the facilitator returns one.
        settlement_id: Option<String>,
    },
    /// The facilitator examined the payment and refused it.
    Rejected {
        /// Facilitator-supplied detail.
        detail: String,
    },
    /// The facilitator could not be reached in time.
    Unreachable {
        /// Transport-level detail.
        detail: String,
    },
}

/// Confirms payment proofs against a settlement service.
#[async_trait]
pub trait Facilitator: Send + Sync {
    /// Submit `payment` for `resource` and report the outcome.
    ///
    /// `expected_amount` is the atomic amount the resource requires; the
    /// facilitator settles against it.
    async fn confirm(
        &self,
        payment: &PaymentPayload,
        resource: &str,
        expected_amount: u64,
    ) -> FacilitatorOutcome;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyReply {
    confirmed: bool,
    #[serde(default)]
    settlement_id: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

/// HTTP [`Facilitator`] implementation.
pub struct HttpFacilitator {
    config: FacilitatorConfig,
    client: reqwest::Client,
}

impl HttpFacilitator {
    /// Create a client for the configured facilitator.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client fails to build.
    pub fn new(config: FacilitatorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Facilitator(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn verify_url(&self) -> String {
        format!("{}/verify", self.config.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Facilitator for HttpFacilitator {
    async fn confirm(
        &self,
        payment: &PaymentPayload,
        resource: &str,
        expected_amount: u64,
    ) -> FacilitatorOutcome {
        let body = serde_json::json!({
            "paymentPayload": payment,
            "resource": resource,
            "expectedAmount": expected_amount.to_string(),
        });

        debug!("Submitting payment for {resource} to facilitator");
        let request = self.client.post(self.verify_url()).json(&body).send();

        let response = match tokio::time::timeout(self.config.timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("Facilitator call failed: {e}");
                return FacilitatorOutcome::Unreachable {
                    detail: e.to_string(),
                };
            }
            Err(_) => {
                warn!("Facilitator call timed out");
                return FacilitatorOutcome::Unreachable {
                    detail: "verify call timed out".to_string(),
                };
            }
        };

        let status = response.status();
        if status.is_server_error() {
            return FacilitatorOutcome::Unreachable {
                detail: format!("facilitator returned {status}"),
            };
        }
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| status.to_string());
            return FacilitatorOutcome::Rejected { detail };
        }

        match response.json::<VerifyReply>().await {
            Ok(reply) if reply.confirmed => FacilitatorOutcome::Confirmed {
                settlement_id: reply.settlement_id,
            },
            Ok(reply) => FacilitatorOutcome::Rejected {
                detail: reply
                    .detail
                    .unwrap_or_else(|| "payment not confirmed".to_string()),
            },
            Err(e) => FacilitatorOutcome::Unreachable {
                detail: format!("unparseable facilitator reply: {e}"),
            },
        }
    }
}
