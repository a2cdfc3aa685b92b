//! Wire types for the x402 payment proof.
//!
//! Proofs arrive in the `X-PAYMENT` request header as base64-encoded JSON.
//! They are untrusted input: decoded, checked, and never persisted.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while decoding a payment header.
#[derive(Debug, Error)]
pub enum ProofDecodeError {
    /// The header value was not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded bytes were not the expected JSON structure.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded x402 payment proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Protocol version the client speaks.
    pub x402_version: u32,
    /// Payment scheme (only `"exact"` is supported).
    pub scheme: String,
    /// Chain identifier (e.g. `"base"`).
    pub network: String,
    /// Scheme-specific payload.
    pub payload: ExactPayload,
}

/// Payload of the `"exact"` scheme: a signed transfer authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPayload {
    /// EIP-712 signature over the authorization.
    pub signature: String,
    /// The transfer authorization itself.
    pub authorization: Authorization,
}

/// EIP-3009 style transfer authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// Paying wallet address.
    pub from: String,
    /// Receiving wallet address.
    pub to: String,
    /// Token contract address.
    pub asset: String,
    /// Amount in atomic units, as a decimal string.
    pub amount: String,
    /// Client-chosen replay nonce.
    pub nonce: String,
    /// Unix seconds before which the authorization is not valid.
    pub valid_after: i64,
    /// Unix seconds after which the authorization is no longer valid.
    pub valid_before: i64,
}

impl Authorization {
    /// Amount parsed as an integer. Amounts are always compared in this
    /// representation, never as floats. `None` if the string is not a
    /// non-negative integer.
    #[must_use]
    pub fn amount_atomic(&self) -> Option<u128> {
        self.amount.parse().ok()
    }
}

impl PaymentPayload {
    /// Decode a proof from its `X-PAYMENT` header value.
    ///
    /// # Errors
    ///
    /// Returns [`ProofDecodeError`] when the value is not base64 or the
    /// decoded bytes are not the expected JSON shape.
    pub fn from_header(value: &str) -> Result<Self, ProofDecodeError> {
        let bytes = BASE64.decode(value.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Encode this proof as an `X-PAYMENT` header value.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_header(&self) -> Result<String, serde_json::Error> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }
}
