//! Gateway event system.

use tokio::sync::broadcast;

/// Events emitted by the gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Gateway has started successfully.
    Started,

    /// Gateway is shutting down.
    ShuttingDown,

    /// A payment settled for a priced resource.
    PaymentSettled {
        /// Paying wallet address.
        wallet: String,
        /// Resource that was paid for.
        resource: String,
        /// Amount paid, in atomic units.
        amount: u128,
    },

    /// A payment proof was rejected.
    PaymentRejected {
        /// Stable rejection code.
        reason: String,
        /// Resource the proof was presented for.
        resource: String,
    },

    /// An access pass was granted.
    PassGranted {
        /// Holding wallet address.
        wallet: String,
        /// Tier recorded on the pass.
        tier: String,
    },

    /// A caller hit its rate limit.
    RateLimited {
        /// Namespaced identifier that was limited.
        identifier: String,
    },

    /// Error occurred.
    Error {
        /// Error message.
        message: String,
    },
}

/// Channel for receiving gateway events.
pub type GatewayEventsChannel = broadcast::Receiver<GatewayEvent>;

/// Sender for gateway events.
pub type GatewayEventsSender = broadcast::Sender<GatewayEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (GatewayEventsSender, GatewayEventsChannel) {
    broadcast::channel(256)
}
