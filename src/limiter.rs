//! Fixed-window rate limiting.
//!
//! One limiter serves two very different windows: a 60-second window for
//! pay-per-request and pass-holder bursts, and a 24-hour window for
//! subscription tiers. Window length is always a parameter.
//!
//! The check-and-increment is a single read-modify-write under one lock;
//! concurrent checks against the same identifier can never admit more than
//! the configured limit in one window.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::unix_ms;

/// A rate-limited caller identity, namespaced by credential kind.
///
/// API keys and wallet addresses share the limiter but live in separate
/// key spaces, so a wallet can never collide with a key of the same text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientId {
    /// A subscription API key.
    ApiKey(String),
    /// A wallet address (stored lowercased).
    Wallet(String),
}

impl ClientId {
    /// Identity for an API key.
    #[must_use]
    pub fn api_key(key: &str) -> Self {
        Self::ApiKey(key.to_string())
    }

    /// Identity for a wallet address. Addresses are case-insensitive on
    /// chain, so the identity is lowercased.
    #[must_use]
    pub fn wallet(address: &str) -> Self {
        Self::Wallet(address.to_ascii_lowercase())
    }

    /// Namespaced storage key.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::ApiKey(k) => format!("key:{k}"),
            Self::Wallet(w) => format!("wallet:{w}"),
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The limit that applied (`-1` for unlimited).
    pub limit: i64,
    /// Requests left in the window (`-1` for unlimited).
    pub remaining: i64,
    /// Unix milliseconds at which the window resets (`0` for unlimited).
    pub reset_at_ms: i64,
}

impl RateDecision {
    /// Decision for an unlimited identity. No bookkeeping is performed.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            allowed: true,
            limit: -1,
            remaining: -1,
            reset_at_ms: 0,
        }
    }

    /// Seconds until the window resets, measured from `now_ms`.
    /// Never negative.
    #[must_use]
    pub fn retry_after_secs(&self, now_ms: i64) -> i64 {
        ((self.reset_at_ms - now_ms).max(0) + 999) / 1000
    }
}

/// Fixed-window request counting, keyed by [`ClientId`].
///
/// Implementations must make `check` atomic per identifier: two concurrent
/// checks must never both observe the same pre-increment count. A networked
/// implementation satisfies this with an atomic increment primitive.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request against `id` in a window of `window_ms`.
    ///
    /// Denied checks do not mutate the counter. `limit == -1` is always
    /// allowed and performs no bookkeeping.
    async fn check(&self, id: &ClientId, limit: i64, window_ms: i64) -> RateDecision;

    /// Report the current window for `id` without counting a request.
    async fn peek(&self, id: &ClientId, limit: i64, window_ms: i64) -> RateDecision;

    /// Drop windows whose reset time has passed. Returns how many were
    /// removed.
    async fn sweep(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: i64,
    reset_at_ms: i64,
}

/// In-memory [`RateLimiter`] backed by a single locked map.
///
/// Process-local: horizontally scaled deployments count independently per
/// process. Back the trait with a shared store for cross-process limits.
#[derive(Clone, Default)]
pub struct MemoryRateLimiter {
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

impl MemoryRateLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live windows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    /// Whether no windows are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.lock().is_empty()
    }

    /// `check` against an explicit clock.
    pub fn check_at(&self, id: &ClientId, limit: i64, window_ms: i64, now_ms: i64) -> RateDecision {
        if limit < 0 {
            return RateDecision::unlimited();
        }

        let mut windows = self.windows.lock();
        let key = id.storage_key();
        match windows.get_mut(&key) {
            Some(window) if now_ms <= window.reset_at_ms => {
                if window.count >= limit {
                    RateDecision {
                        allowed: false,
                        limit,
                        remaining: 0,
                        reset_at_ms: window.reset_at_ms,
                    }
                } else {
                    window.count += 1;
                    RateDecision {
                        allowed: true,
                        limit,
                        remaining: limit - window.count,
                        reset_at_ms: window.reset_at_ms,
                    }
                }
            }
            _ => {
                // Absent or rolled over: start a fresh window at count 1.
                let reset_at_ms = now_ms + window_ms;
                windows.insert(
                    key,
                    Window {
                        count: 1,
                        reset_at_ms,
                    },
                );
                RateDecision {
                    allowed: true,
                    limit,
                    remaining: limit - 1,
                    reset_at_ms,
                }
            }
        }
    }

    /// `peek` against an explicit clock.
    #[must_use]
    pub fn peek_at(&self, id: &ClientId, limit: i64, window_ms: i64, now_ms: i64) -> RateDecision {
        if limit < 0 {
            return RateDecision::unlimited();
        }

        let windows = self.windows.lock();
        match windows.get(&id.storage_key()) {
            Some(window) if now_ms <= window.reset_at_ms => RateDecision {
                allowed: window.count < limit,
                limit,
                remaining: (limit - window.count).max(0),
                reset_at_ms: window.reset_at_ms,
            },
            _ => RateDecision {
                allowed: true,
                limit,
                remaining: limit,
                reset_at_ms: now_ms + window_ms,
            },
        }
    }

    /// `sweep` against an explicit clock.
    pub fn sweep_at(&self, now_ms: i64) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, w| now_ms <= w.reset_at_ms);
        before - windows.len()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check(&self, id: &ClientId, limit: i64, window_ms: i64) -> RateDecision {
        self.check_at(id, limit, window_ms, unix_ms())
    }

    async fn peek(&self, id: &ClientId, limit: i64, window_ms: i64) -> RateDecision {
        self.peek_at(id, limit, window_ms, unix_ms())
    }

    async fn sweep(&self) -> usize {
        self.sweep_at(unix_ms())
    }
}
