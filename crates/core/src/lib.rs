//! Liquidation monitoring and triggering core.
//!
//! This crate provides the protocol's last line of defense against
//! under-collateralization:
//! - In-memory registry of tracked collateral assets and liquidation thresholds
//! - Price poller with batched feed requests and self-suspension on
//!   consecutive failures
//! - Pure breach detection against fresh quotes
//! - Liquidation executor with distributed mutual exclusion, bounded
//!   retries, and durable-queue escalation
//! - Typed outbound events for external notification collaborators
//!
//! External collaborators (feed, settlement, retry queue, lock nodes) are
//! constructor-injected through the contracts in `sentinel-api` and
//! `sentinel-lock`.

pub mod config;
pub mod detector;
mod events;
mod executor;
mod monitor;
pub mod price;
mod registry;

pub use config::{
    EndpointConfig, ExecutorConfig, LockSettings, MonitorConfig, OutagePolicy, SentinelConfig,
};
pub use detector::Breach;
pub use events::{channel, EventReceiver, EventSender, SentinelEvent};
pub use executor::{ExecutionOutcome, LiquidationExecutor};
pub use monitor::{Monitor, MonitorStatus};
pub use registry::{
    AssetStatus, LiquidationThreshold, MonitorRegistry, MonitoredAsset, RegisterOutcome,
    RegistryStats, ThresholdSet,
};
