//! Payment proof verification.
//!
//! Runs the structural and semantic checks the gateway can do locally,
//! then delegates settlement confirmation to the facilitator.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::unix_ms;
use crate::payment::facilitator::{Facilitator, FacilitatorOutcome};
use crate::payment::proof::PaymentPayload;

/// Protocol version this gateway speaks.
pub const SUPPORTED_VERSION: u32 = 2;

/// The only supported payment scheme.
pub const EXACT_SCHEME: &str = "exact";

/// Configuration for the payment verifier.
///
/// ## Security: fail-closed default
///
/// `allow_degraded_trust` defaults to `false`. When the facilitator is
/// unreachable the proof is rejected, because the gateway cannot verify
/// the signature itself. Setting it to `true` accepts proofs whose
/// signature merely looks plausible (non-empty, `0x`-prefixed) — an
/// unverified trust decision. **Use degraded trust only in controlled,
/// non-production environments.**
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Protocol version accepted from clients.
    pub protocol_version: u32,
    /// Accept structurally-plausible proofs when the facilitator is
    /// unreachable.
    pub allow_degraded_trust: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            protocol_version: SUPPORTED_VERSION,
            allow_degraded_trust: false,
        }
    }
}

/// Why a payment proof was rejected.
///
/// `code()` values are stable; client SDKs branch on them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// The header could not be decoded into a proof.
    #[error("payment header could not be decoded")]
    MalformedPayload,

    /// The client speaks a different protocol version.
    #[error("unsupported protocol version {found}")]
    UnsupportedVersion {
        /// Version the client sent.
        found: u32,
    },

    /// The proof uses a scheme other than `"exact"`.
    #[error("unsupported payment scheme {found:?}")]
    UnsupportedScheme {
        /// Scheme the client sent.
        found: String,
    },

    /// The authorized amount does not cover the price.
    #[error("authorized amount {paid} is below required {required}")]
    InsufficientAmount {
        /// Amount the client authorized.
        paid: u128,
        /// Amount the resource requires.
        required: u128,
    },

    /// The authorization pays someone other than the configured address.
    #[error("authorization pays the wrong recipient")]
    WrongRecipient,

    /// The authorization validity window has not opened yet.
    #[error("authorization is not yet valid")]
    NotYetValid,

    /// The authorization validity window has closed.
    #[error("authorization has expired")]
    Expired,

    /// The facilitator examined and refused the payment.
    #[error("facilitator rejected the payment: {detail}")]
    FacilitatorRejected {
        /// Facilitator-supplied detail.
        detail: String,
    },

    /// The facilitator could not be reached and degraded trust is off.
    #[error("facilitator unreachable: {detail}")]
    FacilitatorUnreachable {
        /// Transport-level detail.
        detail: String,
    },
}

impl RejectReason {
    /// Stable machine-readable code for this reason.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedPayload => "MalformedPayload",
            Self::UnsupportedVersion { .. } => "UnsupportedVersion",
            Self::UnsupportedScheme { .. } => "UnsupportedScheme",
            Self::InsufficientAmount { .. } => "InsufficientAmount",
            Self::WrongRecipient => "WrongRecipient",
            Self::NotYetValid => "NotYetValid",
            Self::Expired => "Expired",
            Self::FacilitatorRejected { .. } => "FacilitatorRejected",
            Self::FacilitatorUnreachable { .. } => "FacilitatorUnreachable",
        }
    }
}

/// A successfully verified payment.
#[derive(Debug, Clone)]
pub struct Verification {
    /// Paying wallet address (authorization `from`).
    pub wallet: String,
    /// Amount the client authorized, in atomic units.
    pub amount_paid: u128,
    /// Settlement identifier from the facilitator, when confirmed.
    pub settlement_id: Option<String>,
    /// `false` when accepted under degraded trust without confirmation.
    pub confirmed: bool,
}

/// Verifies payment proofs against a required price and the facilitator.
///
/// Checks run in a fixed order and short-circuit on the first failure.
/// The verifier has no local state; its one side effect is the outbound
/// facilitator call.
pub struct PaymentVerifier {
    config: VerifierConfig,
    facilitator: Arc<dyn Facilitator>,
}

impl PaymentVerifier {
    /// Create a verifier delegating settlement to `facilitator`.
    pub fn new(config: VerifierConfig, facilitator: Arc<dyn Facilitator>) -> Self {
        Self {
            config,
            facilitator,
        }
    }

    /// Verify the `X-PAYMENT` header value against a required amount.
    ///
    /// # Errors
    ///
    /// Returns the first [`RejectReason`] encountered, in check order.
    pub async fn verify(
        &self,
        header_value: &str,
        required_atomic: u64,
        resource: &str,
        pay_to: &str,
    ) -> Result<Verification, RejectReason> {
        self.verify_at(header_value, required_atomic, resource, pay_to, unix_ms() / 1000)
            .await
    }

    /// [`verify`](Self::verify) against an explicit clock (unix seconds).
    ///
    /// # Errors
    ///
    /// Same as [`verify`](Self::verify).
    pub async fn verify_at(
        &self,
        header_value: &str,
        required_atomic: u64,
        resource: &str,
        pay_to: &str,
        now_secs: i64,
    ) -> Result<Verification, RejectReason> {
        let payment = PaymentPayload::from_header(header_value).map_err(|e| {
            debug!("Payment header rejected: {e}");
            RejectReason::MalformedPayload
        })?;

        if payment.x402_version != self.config.protocol_version {
            return Err(RejectReason::UnsupportedVersion {
                found: payment.x402_version,
            });
        }

        if payment.scheme != EXACT_SCHEME {
            return Err(RejectReason::UnsupportedScheme {
                found: payment.scheme,
            });
        }

        let authorization = &payment.payload.authorization;
        let paid = authorization
            .amount_atomic()
            .ok_or(RejectReason::MalformedPayload)?;
        let required = u128::from(required_atomic);
        if paid < required {
            return Err(RejectReason::InsufficientAmount { paid, required });
        }

        if !authorization.to.eq_ignore_ascii_case(pay_to) {
            return Err(RejectReason::WrongRecipient);
        }

        if now_secs < authorization.valid_after {
            return Err(RejectReason::NotYetValid);
        }
        if now_secs > authorization.valid_before {
            return Err(RejectReason::Expired);
        }

        let wallet = authorization.from.clone();
        let signature = payment.payload.signature.clone();

        match self
            .facilitator
            .confirm(&payment, resource, required_atomic)
            .await
        {
            FacilitatorOutcome::Confirmed { settlement_id } => {
                info!("Payment settled for {resource} from {wallet}");
                Ok(Verification {
                    wallet,
                    amount_paid: paid,
                    settlement_id,
                    confirmed: true,
                })
            }
            FacilitatorOutcome::Rejected { detail } => {
                Err(RejectReason::FacilitatorRejected { detail })
            }
            FacilitatorOutcome::Unreachable { detail } => {
                if self.config.allow_degraded_trust && signature_is_plausible(&signature) {
                    warn!(
                        "Facilitator unreachable ({detail}); accepting unconfirmed payment \
                         from {wallet} under degraded trust"
                    );
                    Ok(Verification {
                        wallet,
                        amount_paid: paid,
                        settlement_id: None,
                        confirmed: false,
                    })
                } else {
                    Err(RejectReason::FacilitatorUnreachable { detail })
                }
            }
        }
    }
}

/// Shape check used only under degraded trust. This is not a signature
/// verification; the real check belongs to the facilitator.
fn signature_is_plausible(signature: &str) -> bool {
    signature.len() > 2 && signature.starts_with("0x")
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::payment::facilitator::FacilitatorOutcome;
    use crate::payment::test_payload;
    use async_trait::async_trait;

    /// Facilitator double that always returns a scripted outcome.
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

    const NOW: i64 = 1_710_000_100;
    const PAY_TO: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";

    fn verifier(outcome: FacilitatorOutcome) -> PaymentVerifier {
        PaymentVerifier::new(VerifierConfig::default(), Arc::new(Scripted(outcome)))
    }

    fn confirming() -> PaymentVerifier {
        verifier(FacilitatorOutcome::Confirmed {
            settlement_id: Some("settle-1".to_string()),
        })
    }

    fn header(payload: &PaymentPayload) -> String {
        payload.to_header().expect("encode")
    }

    #[tokio::test]
    async fn well_formed_proof_verifies() {
        let result = confirming()
            .verify_at(&header(&test_payload()), 20_000, "/api/v1/coins", PAY_TO, NOW)
            .await
            .expect("valid");
        assert_eq!(result.wallet, test_payload().payload.authorization.from);
        assert_eq!(result.amount_paid, 20_000);
        assert_eq!(result.settlement_id.as_deref(), Some("settle-1"));
        assert!(result.confirmed);
    }

    #[tokio::test]
    async fn garbage_header_is_malformed() {
        let err = confirming()
            .verify_at("%%%", 20_000, "/r", PAY_TO, NOW)
            .await
            .expect_err("rejected");
        assert_eq!(err.code(), "MalformedPayload");
    }

    #[tokio::test]
    async fn non_integer_amount_is_malformed() {
        let mut payload = test_payload();
        payload.payload.authorization.amount = "0.02".to_string();
        let err = confirming()
            .verify_at(&header(&payload), 20_000, "/r", PAY_TO, NOW)
            .await
            .expect_err("rejected");
        assert_eq!(err, RejectReason::MalformedPayload);
    }

    #[tokio::test]
    async fn version_mismatch_rejected() {
        let mut payload = test_payload();
        payload.x402_version = 1;
        let err = confirming()
            .verify_at(&header(&payload), 20_000, "/r", PAY_TO, NOW)
            .await
            .expect_err("rejected");
        assert_eq!(err, RejectReason::UnsupportedVersion { found: 1 });
    }

    #[tokio::test]
    async fn scheme_mismatch_rejected() {
        let mut payload = test_payload();
        payload.scheme = "upto".to_string();
        let err = confirming()
            .verify_at(&header(&payload), 20_000, "/r", PAY_TO, NOW)
            .await
            .expect_err("rejected");
        assert_eq!(err.code(), "UnsupportedScheme");
    }

    #[tokio::test]
    async fn one_unit_short_is_insufficient() {
        let mut payload = test_payload();
        payload.payload.authorization.amount = "19999".to_string();
        let err = confirming()
            .verify_at(&header(&payload), 20_000, "/r", PAY_TO, NOW)
            .await
            .expect_err("rejected");
        assert_eq!(
            err,
            RejectReason::InsufficientAmount {
                paid: 19_999,
                required: 20_000
            }
        );
    }

    #[tokio::test]
    async fn overpayment_is_accepted() {
        let mut payload = test_payload();
        payload.payload.authorization.amount = "25000".to_string();
        let result = confirming()
            .verify_at(&header(&payload), 20_000, "/r", PAY_TO, NOW)
            .await
            .expect("valid");
        assert_eq!(result.amount_paid, 25_000);
    }

    #[tokio::test]
    async fn recipient_comparison_ignores_case() {
        let mixed_case = PAY_TO.to_ascii_uppercase().replacen("0X", "0x", 1);
        let result = confirming()
            .verify_at(&header(&test_payload()), 20_000, "/r", &mixed_case, NOW)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn wrong_recipient_rejected() {
        let mut payload = test_payload();
        payload.payload.authorization.to =
            "0x0000000000000000000000000000000000000001".to_string();
        let err = confirming()
            .verify_at(&header(&payload), 20_000, "/r", PAY_TO, NOW)
            .await
            .expect_err("rejected");
        assert_eq!(err, RejectReason::WrongRecipient);
    }

    #[tokio::test]
    async fn validity_window_is_enforced() {
        let payload = test_payload();
        let early = payload.payload.authorization.valid_after - 1;
        let err = confirming()
            .verify_at(&header(&payload), 20_000, "/r", PAY_TO, early)
            .await
            .expect_err("rejected");
        assert_eq!(err, RejectReason::NotYetValid);

        let late = payload.payload.authorization.valid_before + 1;
        let err = confirming()
            .verify_at(&header(&payload), 20_000, "/r", PAY_TO, late)
            .await
            .expect_err("rejected");
        assert_eq!(err, RejectReason::Expired);
    }

    #[tokio::test]
    async fn facilitator_rejection_propagates_detail() {
        let verifier = verifier(FacilitatorOutcome::Rejected {
            detail: "nonce replayed".to_string(),
        });
        let err = verifier
            .verify_at(&header(&test_payload()), 20_000, "/r", PAY_TO, NOW)
            .await
            .expect_err("rejected");
        assert_eq!(err.code(), "FacilitatorRejected");
    }

    #[tokio::test]
    async fn unreachable_facilitator_fails_closed_by_default() {
        let verifier = verifier(FacilitatorOutcome::Unreachable {
            detail: "timeout".to_string(),
        });
        let err = verifier
            .verify_at(&header(&test_payload()), 20_000, "/r", PAY_TO, NOW)
            .await
            .expect_err("rejected");
        assert_eq!(err.code(), "FacilitatorUnreachable");
    }

    #[tokio::test]
    async fn degraded_trust_accepts_plausible_signature_unconfirmed() {
        let verifier = PaymentVerifier::new(
            VerifierConfig {
                allow_degraded_trust: true,
                ..VerifierConfig::default()
            },
            Arc::new(Scripted(FacilitatorOutcome::Unreachable {
                detail: "timeout".to_string(),
            })),
        );
        let result = verifier
            .verify_at(&header(&test_payload()), 20_000, "/r", PAY_TO, NOW)
            .await
            .expect("accepted");
        assert!(!result.confirmed);
        assert!(result.settlement_id.is_none());
    }

    #[tokio::test]
    async fn degraded_trust_still_rejects_empty_signature() {
        let verifier = PaymentVerifier::new(
            VerifierConfig {
                allow_degraded_trust: true,
                ..VerifierConfig::default()
            },
            Arc::new(Scripted(FacilitatorOutcome::Unreachable {
                detail: "timeout".to_string(),
            })),
        );
        let mut payload = test_payload();
        payload.payload.signature = String::new();
        let err = verifier
            .verify_at(&header(&payload), 20_000, "/r", PAY_TO, NOW)
            .await
            .expect_err("rejected");
        assert_eq!(err.code(), "FacilitatorUnreachable");
    }
}
