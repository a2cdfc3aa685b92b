//! Per-request access decisions.
//!
//! Every request to a priced endpoint passes through [`HybridAuthGate`],
//! which tries the caller's credentials in a fixed order:
//!
//! 1. API key — resolve tier, check the daily window
//! 2. Wallet with an active access pass — check the elevated minute window
//! 3. Payment proof — verify, optionally grant a pass, check the minute window
//! 4. Nothing usable — answer 402 with payment requirements
//!
//! The outcome is either "proceed" or a fully-formed terminal response;
//! callers must never run the real handler after a terminal response.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{PricingCatalog, PricingRecord};
use crate::clock::unix_ms;
use crate::config::GatewayConfig;
use crate::event::{GatewayEvent, GatewayEventsSender};
use crate::limiter::{ClientId, RateDecision, RateLimiter};
use crate::pass::PassStore;
use crate::payment::{Facilitator, PaymentVerifier, RejectReason, VerifierConfig};
use crate::response::{
    ResponseBuilder, RATELIMIT_LIMIT_HEADER, RATELIMIT_REMAINING_HEADER, RATELIMIT_RESET_HEADER,
};
use crate::tiers::{key_fingerprint, TierRegistry};

/// One-minute window for pay-per-request and pass-holder limits.
pub const MINUTE_MS: i64 = 60_000;

/// Twenty-four-hour window for subscription tiers.
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Credentials extracted from an incoming request. Any combination may be
/// present; they are evaluated in the fixed branch order.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// API key from header or query parameter.
    pub api_key: Option<String>,
    /// Wallet address from header.
    pub wallet: Option<String>,
    /// Raw `X-PAYMENT` header value.
    pub payment: Option<String>,
}

/// A fully-formed response that terminates the request.
#[derive(Debug, Clone)]
pub struct TerminalResponse {
    /// HTTP status code.
    pub status: u16,
    /// Headers to attach.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: serde_json::Value,
}

/// Pass-through marker: the real handler should run.
#[derive(Debug, Clone)]
pub struct Passthrough {
    /// Rate-limit state to surface as informational headers, when the
    /// caller is on a bounded window.
    pub rate: Option<RateDecision>,
}

impl Passthrough {
    /// Informational rate-limit headers for a successful response.
    #[must_use]
    pub fn rate_headers(&self) -> Vec<(String, String)> {
        match self.rate {
            Some(rate) if rate.limit >= 0 => vec![
                (RATELIMIT_LIMIT_HEADER.to_string(), rate.limit.to_string()),
                (
                    RATELIMIT_REMAINING_HEADER.to_string(),
                    rate.remaining.to_string(),
                ),
                (
                    RATELIMIT_RESET_HEADER.to_string(),
                    (rate.reset_at_ms / 1000).to_string(),
                ),
            ],
            _ => Vec::new(),
        }
    }
}

/// Outcome of a gate decision.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Run the real handler.
    Proceed(Passthrough),
    /// Return this response and stop.
    Deny(Box<TerminalResponse>),
}

impl Decision {
    fn deny(response: TerminalResponse) -> Self {
        Self::Deny(Box::new(response))
    }
}

/// The per-request decision engine.
pub struct HybridAuthGate {
    catalog: PricingCatalog,
    tiers: TierRegistry,
    limiter: Arc<dyn RateLimiter>,
    passes: Arc<dyn PassStore>,
    verifier: PaymentVerifier,
    responses: ResponseBuilder,
    pass_limit_multiplier: i64,
    free_alternative: Option<String>,
    advertised_features: Vec<String>,
    pay_to: String,
    events: GatewayEventsSender,
}

impl HybridAuthGate {
    /// Assemble the gate from configuration and injected collaborators.
    ///
    /// The limiter and pass store are dependency-injected so an in-memory
    /// map and a shared networked store are interchangeable without
    /// touching any decision logic here.
    pub fn new(
        config: &GatewayConfig,
        facilitator: Arc<dyn Facilitator>,
        limiter: Arc<dyn RateLimiter>,
        passes: Arc<dyn PassStore>,
        events: GatewayEventsSender,
    ) -> Self {
        let verifier = PaymentVerifier::new(
            VerifierConfig {
                protocol_version: config.verify.protocol_version,
                allow_degraded_trust: config.verify.allow_degraded_trust,
            },
            facilitator,
        );
        let responses = ResponseBuilder::new(
            config.network.clone(),
            config.asset.clone(),
            config.pay_to.clone(),
            config.max_timeout_seconds,
        );

        // Distinct features across tiers, in tier order.
        let mut advertised_features = Vec::new();
        for tier in &config.tiers {
            for feature in &tier.features {
                if !advertised_features.contains(feature) {
                    advertised_features.push(feature.clone());
                }
            }
        }

        Self {
            catalog: PricingCatalog::new(config.pricing.clone()),
            tiers: TierRegistry::new(config.tiers.clone()),
            limiter,
            passes,
            verifier,
            responses,
            pass_limit_multiplier: config.pass_limit_multiplier.max(1),
            free_alternative: config.free_alternative.clone(),
            advertised_features,
            pay_to: config.pay_to.clone(),
            events,
        }
    }

    /// The pricing catalog this gate enforces.
    #[must_use]
    pub fn catalog(&self) -> &PricingCatalog {
        &self.catalog
    }

    /// The tier registry this gate resolves keys against.
    #[must_use]
    pub fn tiers(&self) -> &TierRegistry {
        &self.tiers
    }

    /// Decide whether a request to `path` may proceed.
    pub async fn authorize(&self, path: &str, credentials: &Credentials) -> Decision {
        let Some(record) = self.catalog.lookup(path) else {
            // Unpriced endpoint: nothing to enforce.
            return Decision::Proceed(Passthrough { rate: None });
        };

        if let Some(api_key) = &credentials.api_key {
            return self.authorize_api_key(api_key).await;
        }

        if let Some(wallet) = &credentials.wallet {
            let pass = self.passes.check(wallet).await;
            if pass.valid {
                return self.authorize_pass_holder(wallet, record).await;
            }
            debug!("No active pass for wallet {wallet}");
            // Expired or absent pass: a supplied payment proof may still
            // open the payment branch below.
        }

        if let Some(payment) = &credentials.payment {
            return self.authorize_payment(payment, path, record).await;
        }

        self.payment_required(record, path)
    }

    /// Branch 1: subscription API key against its daily quota.
    async fn authorize_api_key(&self, api_key: &str) -> Decision {
        let Some(tier) = self.tiers.resolve(api_key) else {
            warn!("Unknown API key {}", key_fingerprint(api_key));
            return Decision::deny(TerminalResponse {
                status: 401,
                headers: Vec::new(),
                body: serde_json::json!({
                    "error": "invalid_api_key",
                    "message": "The supplied API key is not recognized.",
                }),
            });
        };

        let id = ClientId::api_key(api_key);
        let rate = self
            .limiter
            .check(&id, tier.requests_per_day, DAY_MS)
            .await;
        if !rate.allowed {
            let _ = self.events.send(GatewayEvent::RateLimited {
                identifier: id.storage_key(),
            });
            return Decision::deny(self.rate_limited(
                rate,
                "daily_quota_exhausted",
                Some(format!(
                    "Tier {} allows {} requests per day. Upgrade your tier for a higher quota.",
                    tier.name, tier.requests_per_day
                )),
            ));
        }

        debug!(
            "API key {} ({}) allowed, {} remaining today",
            key_fingerprint(api_key),
            tier.name,
            rate.remaining
        );
        Decision::Proceed(Passthrough { rate: Some(rate) })
    }

    /// Branch 2: wallet holding an active access pass.
    async fn authorize_pass_holder(&self, wallet: &str, record: &PricingRecord) -> Decision {
        let elevated = elevated_limit(record.requests_per_minute, self.pass_limit_multiplier);
        let id = ClientId::wallet(wallet);
        let rate = self.limiter.check(&id, elevated, MINUTE_MS).await;
        if !rate.allowed {
            let _ = self.events.send(GatewayEvent::RateLimited {
                identifier: id.storage_key(),
            });
            return Decision::deny(self.rate_limited(rate, "rate_limit_exceeded", None));
        }
        Decision::Proceed(Passthrough { rate: Some(rate) })
    }

    /// Branch 3: x402 payment proof.
    async fn authorize_payment(
        &self,
        payment: &str,
        path: &str,
        record: &PricingRecord,
    ) -> Decision {
        let required = record.required_atomic_amount();
        let verification = match self
            .verifier
            .verify(payment, required, path, &self.pay_to)
            .await
        {
            Ok(verification) => verification,
            Err(reason) => {
                let _ = self.events.send(GatewayEvent::PaymentRejected {
                    reason: reason.code().to_string(),
                    resource: path.to_string(),
                });
                return Decision::deny(self.payment_invalid(record, path, &reason));
            }
        };

        let _ = self.events.send(GatewayEvent::PaymentSettled {
            wallet: verification.wallet.clone(),
            resource: path.to_string(),
            amount: verification.amount_paid,
        });

        if let Some(grant) = &record.pass {
            self.passes
                .grant(&verification.wallet, grant.duration_secs, &grant.tier)
                .await;
            info!(
                "Granted {} pass to {} for {}s",
                grant.tier, verification.wallet, grant.duration_secs
            );
            let _ = self.events.send(GatewayEvent::PassGranted {
                wallet: verification.wallet.clone(),
                tier: grant.tier.clone(),
            });
        }

        let id = ClientId::wallet(&verification.wallet);
        let rate = self
            .limiter
            .check(&id, record.requests_per_minute, MINUTE_MS)
            .await;
        if !rate.allowed {
            let _ = self.events.send(GatewayEvent::RateLimited {
                identifier: id.storage_key(),
            });
            return Decision::deny(self.rate_limited(
                rate,
                "rate_limit_exceeded",
                Some("Purchase an access pass for elevated per-minute limits.".to_string()),
            ));
        }

        Decision::Proceed(Passthrough { rate: Some(rate) })
    }

    /// Branch 4: no usable credential at all.
    fn payment_required(&self, record: &PricingRecord, path: &str) -> Decision {
        let body = self.responses.payment_required_body(
            record,
            path,
            &self.advertised_features,
            self.free_alternative.as_deref(),
        );
        Decision::deny(self.with_payment_headers(record, path, 402, body))
    }

    /// A 402 for a proof that failed verification, carrying the stable
    /// reason code alongside the requirements.
    fn payment_invalid(
        &self,
        record: &PricingRecord,
        path: &str,
        reason: &RejectReason,
    ) -> TerminalResponse {
        let mut body = self.responses.payment_required_body(
            record,
            path,
            &self.advertised_features,
            self.free_alternative.as_deref(),
        );
        body["error"] = serde_json::Value::from("payment_invalid");
        body["reason"] = serde_json::Value::from(reason.code());
        body["message"] = serde_json::Value::from(reason.to_string());
        self.with_payment_headers(record, path, 402, body)
    }

    fn with_payment_headers(
        &self,
        record: &PricingRecord,
        path: &str,
        status: u16,
        body: serde_json::Value,
    ) -> TerminalResponse {
        let requirements = self.responses.requirements_for(record, path);
        let headers = match self
            .responses
            .payment_required_headers(record, &requirements)
        {
            Ok(headers) => headers,
            Err(e) => {
                // Requirements are plain data; serialization failure would
                // be a bug. Degrade to a headerless 402 rather than panic.
                let _ = self.events.send(GatewayEvent::Error {
                    message: format!("failed to encode payment requirements: {e}"),
                });
                Vec::new()
            }
        };
        TerminalResponse {
            status,
            headers,
            body,
        }
    }

    /// A 429 with limit/reset headers and a retry hint.
    fn rate_limited(
        &self,
        rate: RateDecision,
        error: &str,
        upgrade: Option<String>,
    ) -> TerminalResponse {
        let reset_secs = rate.reset_at_ms / 1000;
        let retry_after = rate.retry_after_secs(unix_ms());
        TerminalResponse {
            status: 429,
            headers: vec![
                (RATELIMIT_LIMIT_HEADER.to_string(), rate.limit.to_string()),
                (RATELIMIT_REMAINING_HEADER.to_string(), "0".to_string()),
                (RATELIMIT_RESET_HEADER.to_string(), reset_secs.to_string()),
                ("Retry-After".to_string(), retry_after.to_string()),
            ],
            body: serde_json::json!({
                "error": error,
                "message": "Rate limit exceeded. Retry after the window resets.",
                "limit": rate.limit,
                "reset_at": reset_secs,
                "upgrade": upgrade,
            }),
        }
    }
}

/// Elevated per-minute limit for pass holders. Unlimited stays unlimited.
fn elevated_limit(base: i64, multiplier: i64) -> i64 {
    if base < 0 {
        -1
    } else {
        base.saturating_mul(multiplier)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::limiter::MemoryRateLimiter;
    use crate::pass::MemoryPassStore;
    use crate::payment::{FacilitatorOutcome, PaymentPayload};
    use async_trait::async_trait;

    struct Scripted(FacilitatorOutcome);

    #[async_trait]
    impl Facilitator for Scripted {
        async fn confirm(
            &self,
            _payment: &PaymentPayload,
            _resource: &str,
            _expected_amount: u64,
        ) -> FacilitatorOutcome {
            self.0.clone()
        }
    }

    fn gate_with(outcome: FacilitatorOutcome) -> (HybridAuthGate, Arc<MemoryRateLimiter>, Arc<MemoryPassStore>) {
        let limiter = Arc::new(MemoryRateLimiter::new());
        let passes = Arc::new(MemoryPassStore::new());
        let (events, _rx) = crate::event::create_event_channel();
        let gate = HybridAuthGate::new(
            &GatewayConfig::default(),
            Arc::new(Scripted(outcome)),
            limiter.clone(),
            passes.clone(),
            events,
        );
        (gate, limiter, passes)
    }

    fn confirmed() -> FacilitatorOutcome {
        FacilitatorOutcome::Confirmed {
            settlement_id: Some("settle-1".to_string()),
        }
    }

    #[tokio::test]
    async fn unpriced_path_proceeds_without_rate_state() {
        let (gate, _, _) = gate_with(confirmed());
        let decision = gate.authorize("/api/news", &Credentials::default()).await;
        match decision {
            Decision::Proceed(pass) => assert!(pass.rate.is_none()),
            Decision::Deny(_) => panic!("free endpoint must not be gated"),
        }
    }

    #[tokio::test]
    async fn no_credentials_gets_protocol_exact_402() {
        let (gate, _, _) = gate_with(confirmed());
        let decision = gate.authorize("/api/v1/coins", &Credentials::default()).await;
        let Decision::Deny(response) = decision else {
            panic!("expected denial");
        };
        assert_eq!(response.status, 402);
        assert_eq!(
            response.body["requirements"]["accepts"][0]["maxAmountRequired"],
            "10000"
        );
        assert_eq!(response.body["free_alternative"], "/api/news");
        assert!(response
            .headers
            .iter()
            .any(|(name, _)| name == crate::response::PAYMENT_REQUIRED_HEADER));
    }

    #[tokio::test]
    async fn unknown_api_key_is_terminal_401() {
        let (gate, _, _) = gate_with(confirmed());
        let credentials = Credentials {
            api_key: Some("sk_live_wrong".to_string()),
            ..Credentials::default()
        };
        let Decision::Deny(response) = gate.authorize("/api/v1/coins", &credentials).await else {
            panic!("expected denial");
        };
        assert_eq!(response.status, 401);
        assert_eq!(response.body["error"], "invalid_api_key");
    }

    #[tokio::test]
    async fn api_key_quota_exhaustion_suggests_upgrade() {
        let (gate, _, _) = gate_with(confirmed());
        let credentials = Credentials {
            api_key: Some("cda_free_tester".to_string()),
            ..Credentials::default()
        };

        for _ in 0..100 {
            match gate.authorize("/api/v1/coins", &credentials).await {
                Decision::Proceed(_) => {}
                Decision::Deny(r) => panic!("denied early: {:?}", r.body),
            }
        }
        let Decision::Deny(response) = gate.authorize("/api/v1/coins", &credentials).await else {
            panic!("expected 429");
        };
        assert_eq!(response.status, 429);
        assert_eq!(response.body["error"], "daily_quota_exhausted");
        assert!(response.body["upgrade"].as_str().expect("hint").contains("Upgrade"));
        assert!(response
            .headers
            .iter()
            .any(|(name, _)| name == "Retry-After"));
    }

    #[tokio::test]
    async fn enterprise_key_is_unlimited() {
        let (gate, limiter, _) = gate_with(confirmed());
        let credentials = Credentials {
            api_key: Some("cda_ent_tester".to_string()),
            ..Credentials::default()
        };
        for _ in 0..500 {
            match gate.authorize("/api/v1/coins", &credentials).await {
                Decision::Proceed(pass) => {
                    assert_eq!(pass.rate.expect("rate").limit, -1);
                    assert!(pass.rate_headers().is_empty());
                }
                Decision::Deny(_) => panic!("unlimited tier must not be limited"),
            }
        }
        assert!(limiter.is_empty());
    }

    #[tokio::test]
    async fn pass_holder_gets_elevated_minute_limit() {
        let (gate, _, passes) = gate_with(confirmed());
        passes.grant("0xHolder", 3_600, "day-pass").await;

        let credentials = Credentials {
            wallet: Some("0xholder".to_string()),
            ..Credentials::default()
        };
        // /api/v1/export allows 10/min; the default multiplier is 10.
        for _ in 0..100 {
            match gate.authorize("/api/v1/export", &credentials).await {
                Decision::Proceed(_) => {}
                Decision::Deny(r) => panic!("denied early: {:?}", r.body),
            }
        }
        let Decision::Deny(response) = gate.authorize("/api/v1/export", &credentials).await else {
            panic!("expected 429");
        };
        assert_eq!(response.status, 429);
    }

    #[tokio::test]
    async fn wallet_without_pass_or_proof_gets_402() {
        let (gate, _, _) = gate_with(confirmed());
        let credentials = Credentials {
            wallet: Some("0xnopass".to_string()),
            ..Credentials::default()
        };
        let Decision::Deny(response) = gate.authorize("/api/v1/coins", &credentials).await else {
            panic!("expected 402");
        };
        assert_eq!(response.status, 402);
        assert_eq!(response.body["error"], "payment_required");
    }

    #[tokio::test]
    async fn rejected_proof_grants_nothing_and_counts_nothing() {
        let (gate, limiter, passes) = gate_with(FacilitatorOutcome::Rejected {
            detail: "bad signature".to_string(),
        });
        let proof = crate::payment::test_header(250_000);
        let credentials = Credentials {
            payment: Some(proof),
            ..Credentials::default()
        };

        let Decision::Deny(response) = gate.authorize("/api/v1/pass/day", &credentials).await
        else {
            panic!("expected 402");
        };
        assert_eq!(response.status, 402);
        assert_eq!(response.body["error"], "payment_invalid");
        assert_eq!(response.body["reason"], "FacilitatorRejected");
        assert!(passes.is_empty());
        assert!(limiter.is_empty());
    }

    #[tokio::test]
    async fn settled_pass_purchase_grants_and_then_wallet_alone_suffices() {
        let (gate, _, passes) = gate_with(confirmed());
        let proof = crate::payment::test_header(250_000);
        let paying = Credentials {
            payment: Some(proof),
            ..Credentials::default()
        };

        match gate.authorize("/api/v1/pass/day", &paying).await {
            Decision::Proceed(pass) => assert!(pass.rate.is_some()),
            Decision::Deny(r) => panic!("payment should settle: {:?}", r.body),
        }
        assert_eq!(passes.len(), 1);

        // The wallet from the proof now holds a pass.
        let wallet_only = Credentials {
            wallet: Some(crate::payment::TEST_WALLET.to_string()),
            ..Credentials::default()
        };
        match gate.authorize("/api/v1/coins", &wallet_only).await {
            Decision::Proceed(_) => {}
            Decision::Deny(r) => panic!("pass holder denied: {:?}", r.body),
        }
    }
}
