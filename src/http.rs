//! HTTP surface for the gateway.
//!
//! Exposes [`HybridAuthGate`] as axum middleware, mounts the demo routes,
//! and runs the server with graceful shutdown. The data behind the priced
//! endpoints is out of scope here; handlers are stubs that stand in for
//! the real providers.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::info;

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::event::GatewayEventsSender;
use crate::gate::{Credentials, Decision, HybridAuthGate, TerminalResponse, DAY_MS};
use crate::limiter::{ClientId, MemoryRateLimiter, RateLimiter};
use crate::pass::{MemoryPassStore, PassStore};
use crate::payment::HttpFacilitator;
use crate::response::{API_KEY_HEADER, PAYMENT_HEADER, WALLET_HEADER};

/// Shared state handed to the middleware and handlers.
#[derive(Clone)]
pub struct AppState {
    gate: Arc<HybridAuthGate>,
    limiter: Arc<dyn RateLimiter>,
    passes: Arc<dyn PassStore>,
}

impl AppState {
    /// Build the default in-memory state for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the facilitator client fails to build.
    pub fn from_config(config: &GatewayConfig, events: GatewayEventsSender) -> Result<Self> {
        let facilitator = Arc::new(HttpFacilitator::new(config.facilitator.client_config())?);
        let limiter: Arc<dyn RateLimiter> = Arc::new(MemoryRateLimiter::new());
        let passes: Arc<dyn PassStore> = Arc::new(MemoryPassStore::new());
        let gate = Arc::new(HybridAuthGate::new(
            config,
            facilitator,
            Arc::clone(&limiter),
            Arc::clone(&passes),
            events,
        ));
        Ok(Self {
            gate,
            limiter,
            passes,
        })
    }

    /// State around an existing gate and stores (used by tests and by
    /// deployments that inject shared stores).
    #[must_use]
    pub fn new(
        gate: Arc<HybridAuthGate>,
        limiter: Arc<dyn RateLimiter>,
        passes: Arc<dyn PassStore>,
    ) -> Self {
        Self {
            gate,
            limiter,
            passes,
        }
    }

    /// The decision engine.
    #[must_use]
    pub fn gate(&self) -> &Arc<HybridAuthGate> {
        &self.gate
    }

    /// The rate limiter (for the sweeper and usage reporting).
    #[must_use]
    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    /// The pass store (for the sweeper).
    #[must_use]
    pub fn passes(&self) -> &Arc<dyn PassStore> {
        &self.passes
    }
}

/// Axum middleware enforcing the gate's decision on every request.
pub async fn require_access(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let credentials = extract_credentials(request.headers(), request.uri());
    let path = request.uri().path().to_string();

    match state.gate.authorize(&path, &credentials).await {
        Decision::Proceed(pass) => {
            let mut response = next.run(request).await;
            append_headers(response.headers_mut(), pass.rate_headers());
            response
        }
        Decision::Deny(terminal) => terminal_into_response(*terminal),
    }
}

/// Pull credentials out of headers and the query string.
fn extract_credentials(headers: &HeaderMap, uri: &Uri) -> Credentials {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    };

    Credentials {
        api_key: header_value(API_KEY_HEADER).or_else(|| query_param(uri, "api_key")),
        wallet: header_value(WALLET_HEADER),
        payment: header_value(PAYMENT_HEADER),
    }
}

/// First value of `name` in the query string, if any.
fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn terminal_into_response(terminal: TerminalResponse) -> Response {
    let status =
        StatusCode::from_u16(terminal.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(terminal.body)).into_response();
    append_headers(response.headers_mut(), terminal.headers);
    response
}

fn append_headers(target: &mut HeaderMap, headers: Vec<(String, String)>) {
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            target.insert(name, value);
        }
    }
}

/// Build the demo router: free endpoints, priced stubs, usage and health.
#[must_use]
pub fn router(state: AppState, body_limit_kb: usize) -> Router {
    let priced = Router::new()
        .route("/api/v1/coins", get(premium_stub))
        .route("/api/v1/coins/{id}", get(premium_stub))
        .route("/api/v1/historical", get(premium_stub))
        .route("/api/v1/defi", get(premium_stub))
        .route("/api/v1/portfolio", get(premium_stub))
        .route("/api/v1/export", get(premium_stub))
        .route("/api/v1/pass/day", get(pass_purchased))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_access,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/api/news", get(free_news))
        .route("/api/v1/usage", get(usage))
        .merge(priced)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit_kb * 1024))
}

/// Serve the router until the shutdown signal flips.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn run_server(
    config: &GatewayConfig,
    state: AppState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let app = router(state, config.body_limit_kb);
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .map_err(|e| Error::Startup(format!("failed to bind {}: {e}", config.listen)))?;
    info!("paygate listening on {}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.changed().await.ok();
            info!("shutting down gracefully");
        })
        .await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Free endpoint advertised as the no-credential alternative. Real feed
/// aggregation lives upstream; this returns a static sample.
async fn free_news() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "articles": [],
        "notice": "Free endpoint. Premium endpoints require an API key or x402 payment.",
    }))
}

async fn premium_stub() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "data": [],
        "notice": "Premium data placeholder.",
    }))
}

async fn pass_purchased() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "message": "Access pass active. Send your wallet address on future requests.",
    }))
}

/// Usage report for an API key: tier, quota, and the current daily window
/// (read without counting a request).
async fn usage(State(state): State<AppState>, request: Request) -> Response {
    let credentials = extract_credentials(request.headers(), request.uri());
    let Some(api_key) = credentials.api_key else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "missing_api_key",
                "message": "Usage reporting requires an API key.",
            })),
        )
            .into_response();
    };

    let Some(tier) = state.gate.tiers().resolve(&api_key).cloned() else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "invalid_api_key",
                "message": "The supplied API key is not recognized.",
            })),
        )
            .into_response();
    };

    let rate = state
        .limiter
        .peek(&ClientId::api_key(&api_key), tier.requests_per_day, DAY_MS)
        .await;

    let used = if rate.limit >= 0 {
        serde_json::Value::from(rate.limit - rate.remaining)
    } else {
        serde_json::Value::Null
    };
    Json(serde_json::json!({
        "tier": tier.name,
        "limit": rate.limit,
        "used": used,
        "remaining": rate.remaining,
        "reset_at": rate.reset_at_ms / 1000,
        "features": tier.features,
    }))
    .into_response()
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn query_param_finds_first_match() {
        let uri: Uri = "/api/v1/coins?per_page=5&api_key=cda_free_x"
            .parse()
            .expect("uri");
        assert_eq!(query_param(&uri, "api_key").as_deref(), Some("cda_free_x"));
        assert_eq!(query_param(&uri, "per_page").as_deref(), Some("5"));
        assert!(query_param(&uri, "missing").is_none());
    }

    #[test]
    fn credentials_prefer_header_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, "cda_pro_header".parse().expect("value"));
        headers.insert(WALLET_HEADER, "0xAbC".parse().expect("value"));
        let uri: Uri = "/api/v1/coins?api_key=cda_free_query".parse().expect("uri");

        let credentials = extract_credentials(&headers, &uri);
        assert_eq!(credentials.api_key.as_deref(), Some("cda_pro_header"));
        assert_eq!(credentials.wallet.as_deref(), Some("0xAbC"));
        assert!(credentials.payment.is_none());
    }

    #[test]
    fn terminal_response_keeps_status_and_headers() {
        let response = terminal_into_response(TerminalResponse {
            status: 402,
            headers: vec![("X-Payment-Price".to_string(), "$0.01".to_string())],
            body: serde_json::json!({"error": "payment_required"}),
        });
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            response
                .headers()
                .get("X-Payment-Price")
                .and_then(|v| v.to_str().ok()),
            Some("$0.01")
        );
    }
}
