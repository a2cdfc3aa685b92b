//! Payment verification system for paygate.
//!
//! This module implements x402 proof handling:
//! 1. Decode the `X-PAYMENT` header into a structured proof
//! 2. Check version, scheme, amount, recipient and validity window locally
//! 3. Delegate settlement confirmation to the remote facilitator
//!
//! # Architecture
//!
//! ```text
//! X-PAYMENT header received
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Decode base64/JSON  │──▶ MalformedPayload
//! └─────────┬───────────┘
//!           ▼
//! ┌─────────────────────┐
//! │ Local checks        │──▶ UnsupportedVersion / UnsupportedScheme /
//! │ (order is fixed)    │    InsufficientAmount / WrongRecipient /
//! └─────────┬───────────┘    NotYetValid / Expired
//!           ▼
//! ┌─────────────────────┐
//! │ Facilitator verify  │──▶ FacilitatorRejected
//! └─────────┬───────────┘
//!           │
//!    ┌──────┴──────┐
//!    │             │
//! CONFIRMED   UNREACHABLE
//!    │             │
//!    ▼             ▼
//! Verification  fail closed (or degraded trust, if configured)
//! ```

mod facilitator;
mod proof;
mod verifier;

pub use facilitator::{Facilitator, FacilitatorConfig, FacilitatorOutcome, HttpFacilitator};
pub use proof::{Authorization, ExactPayload, PaymentPayload, ProofDecodeError};
pub use verifier::{
    PaymentVerifier, RejectReason, Verification, VerifierConfig, EXACT_SCHEME, SUPPORTED_VERSION,
};

/// Wallet address used by in-crate test proofs.
#[cfg(test)]
pub(crate) const TEST_WALLET: &str = "0x857b06519E91e3A54538791bDbb0E22373e36b66";

/// An `X-PAYMENT` header for `amount`, valid around the real clock.
#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) fn test_header(amount: u64) -> String {
    let now_secs = crate::clock::unix_ms() / 1000;
    let mut payload = test_payload();
    payload.payload.authorization.amount = amount.to_string();
    payload.payload.authorization.valid_after = now_secs - 60;
    payload.payload.authorization.valid_before = now_secs + 300;
    payload.to_header().expect("encode test header")
}

/// A well-formed proof used across this module's tests.
#[cfg(test)]
pub(crate) fn test_payload() -> PaymentPayload {
    PaymentPayload {
        x402_version: SUPPORTED_VERSION,
        scheme: EXACT_SCHEME.to_string(),
        network: "base".to_string(),
        payload: ExactPayload {
            signature: "0xdeadbeef".to_string(),
            authorization: Authorization {
                from: "0x857b06519E91e3A54538791bDbb0E22373e36b66".to_string(),
                to: "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".to_string(),
                asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
                amount: "20000".to_string(),
                nonce: "1710000000000".to_string(),
                valid_after: 1_710_000_000,
                valid_before: 1_710_000_300,
            },
        },
    }
}
