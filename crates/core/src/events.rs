//! Typed outbound events.
//!
//! Delivered over an explicit channel handed in at construction; external
//! notification collaborators consume the receiving end. Nothing here is an
//! implicit process-wide bus.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use sentinel_api::{AccountId, AssetId, PositionId, SettlementOutcome};

/// Events the subsystem surfaces to its owner.
#[derive(Debug, Clone)]
pub enum SentinelEvent {
    /// The poller hit its consecutive-failure budget and stopped itself.
    /// Liquidation protection is offline until an operator restarts it.
    PollerSuspended {
        consecutive_failures: u32,
        at: DateTime<Utc>,
    },

    LiquidationSucceeded {
        position: PositionId,
        owner: AccountId,
        asset: AssetId,
        attempts: u32,
        outcome: SettlementOutcome,
        at: DateTime<Utc>,
    },

    /// Local retries exhausted; a retry task was handed to the durable
    /// queue.
    LiquidationFailed {
        position: PositionId,
        owner: AccountId,
        asset: AssetId,
        attempts: u32,
        reason: String,
        at: DateTime<Utc>,
    },

    /// Another holder owned the lock; the breach will resurface on a later
    /// poll tick if it persists.
    LiquidationSkipped {
        position: PositionId,
        resource: String,
        at: DateTime<Utc>,
    },
}

pub type EventSender = mpsc::Sender<SentinelEvent>;
pub type EventReceiver = mpsc::Receiver<SentinelEvent>;

/// Build the outbound event channel.
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}
