//! Payment-required response construction.
//!
//! Builds the protocol-exact 402 body and header set. The same shapes are
//! reused anywhere the payment-requirements wire format is needed (the
//! no-credential rejection, tier-upgrade hints), only the resource and
//! description strings change.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::catalog::PricingRecord;
use crate::error::{Error, Result};
use crate::payment::{EXACT_SCHEME, SUPPORTED_VERSION};

/// Request header carrying an x402 payment proof.
pub const PAYMENT_HEADER: &str = "X-PAYMENT";
/// Response header carrying base64-encoded payment requirements.
pub const PAYMENT_REQUIRED_HEADER: &str = "X-PAYMENT-REQUIRED";
/// Request header carrying an API key.
pub const API_KEY_HEADER: &str = "X-API-Key";
/// Request header carrying a wallet address.
pub const WALLET_HEADER: &str = "X-Wallet-Address";
/// Response header: price of the requested resource.
pub const PRICE_HEADER: &str = "X-Payment-Price";
/// Response header: request correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
/// Response header: applied rate limit.
pub const RATELIMIT_LIMIT_HEADER: &str = "X-RateLimit-Limit";
/// Response header: requests remaining in the window.
pub const RATELIMIT_REMAINING_HEADER: &str = "X-RateLimit-Remaining";
/// Response header: unix seconds at which the window resets.
pub const RATELIMIT_RESET_HEADER: &str = "X-RateLimit-Reset";

/// One accepted way to pay for a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedPayment {
    /// Payment scheme.
    pub scheme: String,
    /// Chain identifier.
    pub network: String,
    /// Token contract address.
    pub asset: String,
    /// Address payments must be made out to.
    pub pay_to: String,
    /// Required amount in atomic units, as a decimal string.
    pub max_amount_required: String,
    /// The resource being paid for.
    pub resource: String,
    /// Human-readable description.
    pub description: String,
    /// Content type of the gated resource.
    pub mime_type: String,
    /// Longest validity window a client should sign, in seconds.
    pub max_timeout_seconds: u64,
}

/// The full payment-requirements object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Protocol version.
    pub x402_version: u32,
    /// Accepted payment methods (currently always one entry).
    pub accepts: Vec<AcceptedPayment>,
}

/// Builds payment-required bodies and headers for this gateway's
/// payout configuration.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    network: String,
    asset: String,
    pay_to: String,
    max_timeout_seconds: u64,
}

impl ResponseBuilder {
    /// Create a builder for the configured payout target.
    #[must_use]
    pub fn new(network: String, asset: String, pay_to: String, max_timeout_seconds: u64) -> Self {
        Self {
            network,
            asset,
            pay_to,
            max_timeout_seconds,
        }
    }

    /// Requirements for an arbitrary priced resource.
    #[must_use]
    pub fn requirements(
        &self,
        amount_atomic: u64,
        resource: &str,
        description: &str,
        mime_type: &str,
    ) -> PaymentRequirements {
        PaymentRequirements {
            x402_version: SUPPORTED_VERSION,
            accepts: vec![AcceptedPayment {
                scheme: EXACT_SCHEME.to_string(),
                network: self.network.clone(),
                asset: self.asset.clone(),
                pay_to: self.pay_to.clone(),
                max_amount_required: amount_atomic.to_string(),
                resource: resource.to_string(),
                description: description.to_string(),
                mime_type: mime_type.to_string(),
                max_timeout_seconds: self.max_timeout_seconds,
            }],
        }
    }

    /// Requirements for a catalog record at a concrete request path.
    #[must_use]
    pub fn requirements_for(&self, record: &PricingRecord, resource: &str) -> PaymentRequirements {
        self.requirements(
            record.required_atomic_amount(),
            resource,
            &record.description,
            &record.mime_type,
        )
    }

    /// The canonical 402 body.
    ///
    /// `features` come from the caller's tier context; `free_alternative`
    /// is an optional unpriced endpoint to point the caller at.
    #[must_use]
    pub fn payment_required_body(
        &self,
        record: &PricingRecord,
        resource: &str,
        features: &[String],
        free_alternative: Option<&str>,
    ) -> serde_json::Value {
        let requirements = self.requirements_for(record, resource);
        json!({
            "error": "payment_required",
            "message": format!(
                "Payment of ${} is required for {resource}. \
                 Provide an X-PAYMENT header or an API key.",
                record.price_usd
            ),
            "price_usd": record.price_usd,
            "price_atomic": record.required_atomic_amount().to_string(),
            "features": features,
            "free_alternative": free_alternative,
            "requirements": requirements,
        })
    }

    /// Header set accompanying a 402: price, correlation id, and a
    /// base64 copy of the requirements for clients that read headers
    /// instead of bodies.
    ///
    /// # Errors
    ///
    /// Returns an error if the requirements fail to serialize.
    pub fn payment_required_headers(
        &self,
        record: &PricingRecord,
        requirements: &PaymentRequirements,
    ) -> Result<Vec<(String, String)>> {
        let encoded = BASE64.encode(
            serde_json::to_vec(requirements)
                .map_err(|e| Error::Serialization(e.to_string()))?,
        );
        Ok(vec![
            (PRICE_HEADER.to_string(), format!("${}", record.price_usd)),
            (REQUEST_ID_HEADER.to_string(), request_id()),
            (PAYMENT_REQUIRED_HEADER.to_string(), encoded),
        ])
    }
}

/// Fresh request-correlation id.
#[must_use]
pub fn request_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::EndpointCategory;

    fn builder() -> ResponseBuilder {
        ResponseBuilder::new(
            "base".to_string(),
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
            "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".to_string(),
            300,
        )
    }

    fn record() -> PricingRecord {
        PricingRecord {
            endpoint: "/api/v1/coins".to_string(),
            price_usd: 0.02,
            category: EndpointCategory::Market,
            requests_per_minute: 60,
            description: "Premium coin listings".to_string(),
            mime_type: "application/json".to_string(),
            pass: None,
        }
    }

    #[test]
    fn body_carries_atomic_amount_as_string() {
        let body = builder().payment_required_body(&record(), "/api/v1/coins", &[], None);
        assert_eq!(body["error"], "payment_required");
        assert_eq!(body["price_atomic"], "20000");
        assert_eq!(
            body["requirements"]["accepts"][0]["maxAmountRequired"],
            "20000"
        );
        assert_eq!(body["requirements"]["x402Version"], 2);
        assert_eq!(body["requirements"]["accepts"][0]["mimeType"], "application/json");
    }

    #[test]
    fn body_includes_free_alternative_when_configured() {
        let body =
            builder().payment_required_body(&record(), "/api/v1/coins", &[], Some("/api/news"));
        assert_eq!(body["free_alternative"], "/api/news");

        let body = builder().payment_required_body(&record(), "/api/v1/coins", &[], None);
        assert!(body["free_alternative"].is_null());
    }

    #[test]
    fn requirements_header_round_trips() {
        let b = builder();
        let requirements = b.requirements_for(&record(), "/api/v1/coins");
        let headers = b
            .payment_required_headers(&record(), &requirements)
            .expect("headers");

        let encoded = &headers
            .iter()
            .find(|(name, _)| name == PAYMENT_REQUIRED_HEADER)
            .expect("payment-required header")
            .1;
        let decoded: PaymentRequirements = serde_json::from_slice(
            &BASE64.decode(encoded).expect("base64"),
        )
        .expect("json");
        assert_eq!(decoded.accepts[0].max_amount_required, "20000");
        assert_eq!(decoded.accepts[0].pay_to, requirements.accepts[0].pay_to);

        assert!(headers.iter().any(|(name, v)| name == PRICE_HEADER && v == "$0.02"));
        assert!(headers.iter().any(|(name, _)| name == REQUEST_ID_HEADER));
    }

    #[test]
    fn reusable_for_other_resources() {
        let requirements = builder().requirements(
            250_000,
            "/api/v1/pass/day",
            "24-hour unlimited access pass",
            "application/json",
        );
        assert_eq!(requirements.accepts[0].max_amount_required, "250000");
        assert_eq!(requirements.accepts[0].resource, "/api/v1/pass/day");
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(request_id(), request_id());
        assert_eq!(request_id().len(), 32);
    }
}
