//! Periodic expiry sweep.
//!
//! Lazy expiry on check keeps decisions correct; this task exists only to
//! bound memory by clearing records nobody asks about anymore. Cadence is
//! a hygiene knob, not a correctness one.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::limiter::RateLimiter;
use crate::pass::PassStore;

/// Spawn the background sweep loop. Runs until the shutdown watch flips.
pub fn spawn_sweeper(
    limiter: Arc<dyn RateLimiter>,
    passes: Arc<dyn PassStore>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep(interval) => {
                    let windows = limiter.sweep().await;
                    let expired = passes.sweep().await;
                    if windows > 0 || expired > 0 {
                        debug!("Sweep removed {windows} rate windows and {expired} passes");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::unix_ms;
    use crate::limiter::{ClientId, MemoryRateLimiter};
    use crate::pass::MemoryPassStore;

    #[tokio::test]
    async fn sweeper_clears_expired_records_and_stops_on_shutdown() {
        let limiter = Arc::new(MemoryRateLimiter::new());
        let passes = Arc::new(MemoryPassStore::new());

        // Entries that expired well before the sweep runs.
        let past = unix_ms() - 120_000;
        limiter.check_at(&ClientId::wallet("0xold"), 10, 1_000, past);
        passes.grant_at("0xold", 1, "day-pass", past);
        // One live entry that must survive.
        passes.grant_at("0xlive", 3_600, "day-pass", unix_ms());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_sweeper(
            limiter.clone(),
            passes.clone(),
            Duration::from_millis(20),
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(limiter.is_empty());
        assert_eq!(passes.len(), 1);

        shutdown_tx.send(true).expect("send shutdown");
        handle.await.expect("sweeper exits");
    }
}
