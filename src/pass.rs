//! Wallet access passes.
//!
//! A pass is a time-bounded entitlement granted to a wallet after a
//! successful payment for a pass product. Expired records are deleted
//! lazily on check and in bulk by the periodic sweep.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::unix_ms;

/// Result of a pass lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassCheck {
    /// Whether the wallet currently holds an unexpired pass.
    pub valid: bool,
    /// Tier recorded on the pass, when valid.
    pub tier: Option<String>,
    /// Expiry in unix milliseconds, when valid.
    pub expires_at_ms: Option<i64>,
}

impl PassCheck {
    fn invalid() -> Self {
        Self {
            valid: false,
            tier: None,
            expires_at_ms: None,
        }
    }
}

/// Storage of active access passes, keyed by wallet address.
///
/// Wallet addresses are case-insensitive; implementations must fold case
/// so `0xAbC` and `0xabc` address the same record.
#[async_trait]
pub trait PassStore: Send + Sync {
    /// Record a pass for `wallet`, expiring `duration_secs` from now.
    ///
    /// Unconditionally replaces any existing record: a repurchase before
    /// expiry restarts the clock rather than extending it, and can leave
    /// the wallet with less total entitlement than doing nothing.
    async fn grant(&self, wallet: &str, duration_secs: u64, tier: &str);

    /// Look up the wallet's pass, deleting it if expired.
    async fn check(&self, wallet: &str) -> PassCheck;

    /// Drop expired records. Returns how many were removed.
    async fn sweep(&self) -> usize;
}

#[derive(Debug, Clone)]
struct Pass {
    tier: String,
    expires_at_ms: i64,
}

/// In-memory [`PassStore`] backed by a single locked map.
#[derive(Clone, Default)]
pub struct MemoryPassStore {
    passes: Arc<Mutex<HashMap<String, Pass>>>,
}

impl MemoryPassStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored passes, including any not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.passes.lock().len()
    }

    /// Whether no passes are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.lock().is_empty()
    }

    /// `grant` against an explicit clock.
    #[allow(clippy::cast_possible_wrap)]
    pub fn grant_at(&self, wallet: &str, duration_secs: u64, tier: &str, now_ms: i64) {
        let pass = Pass {
            tier: tier.to_string(),
            expires_at_ms: now_ms + (duration_secs as i64) * 1000,
        };
        self.passes
            .lock()
            .insert(wallet.to_ascii_lowercase(), pass);
    }

    /// `check` against an explicit clock.
    pub fn check_at(&self, wallet: &str, now_ms: i64) -> PassCheck {
        let key = wallet.to_ascii_lowercase();
        let mut passes = self.passes.lock();
        match passes.get(&key) {
            Some(pass) if now_ms <= pass.expires_at_ms => PassCheck {
                valid: true,
                tier: Some(pass.tier.clone()),
                expires_at_ms: Some(pass.expires_at_ms),
            },
            Some(_) => {
                passes.remove(&key);
                PassCheck::invalid()
            }
            None => PassCheck::invalid(),
        }
    }

    /// `sweep` against an explicit clock.
    pub fn sweep_at(&self, now_ms: i64) -> usize {
        let mut passes = self.passes.lock();
        let before = passes.len();
        passes.retain(|_, p| now_ms <= p.expires_at_ms);
        before - passes.len()
    }
}

#[async_trait]
impl PassStore for MemoryPassStore {
    async fn grant(&self, wallet: &str, duration_secs: u64, tier: &str) {
        self.grant_at(wallet, duration_secs, tier, unix_ms());
    }

    async fn check(&self, wallet: &str) -> PassCheck {
        self.check_at(wallet, unix_ms())
    }

    async fn sweep(&self) -> usize {
        self.sweep_at(unix_ms())
    }
}
