//! External collaborator contracts and HTTP adapters.
//!
//! This crate defines the seams between the monitoring core and the
//! surrounding system:
//! - Price feed (batched collateral quotes + base/USD reference price)
//! - Active-positions source (registry rebuild at startup)
//! - Settlement (the opaque "liquidate position" operation)
//! - Durable retry queue (escalation after local retry exhaustion)
//!
//! Each contract is an async trait with a reqwest-backed client; the core
//! only ever depends on the traits.

mod feed;
mod positions;
mod queue;
mod settlement;
mod types;

pub use feed::{FeedError, FeedResult, HttpPriceFeed, PriceFeed};
pub use positions::{HttpPositionSource, PositionSource};
pub use queue::{
    HttpRetryQueue, QueueError, RetryPolicy, RetryQueue, RetryTask, LIQUIDATION_RETRY_JOB,
};
pub use settlement::{
    HttpSettlement, LiquidationReason, Settlement, SettlementError, SettlementOutcome,
};
pub use types::{AccountId, ActivePosition, AssetId, PositionId, PriceQuote};
