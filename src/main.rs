//! Liquidation sentinel.
//!
//! Watches collateral prices for open loans and triggers liquidation the
//! instant a position's threshold is crossed. Composition root: wires the
//! price feed, active-positions source, settlement path, retry queue, and
//! lock nodes into the monitoring core and runs the poll loop.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sentinel_api::{
    AccountId, AssetId, HttpPositionSource, HttpPriceFeed, HttpRetryQueue, HttpSettlement,
    PriceFeed, RetryQueue, Settlement,
};
use sentinel_core::{
    LiquidationExecutor, Monitor, MonitorRegistry, SentinelConfig, SentinelEvent,
};
use sentinel_lock::{LockNode, MemoryLockNode, QuorumLock, RedisLockNode};

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sentinel_core=debug")),
        )
        .init();

    let config = SentinelConfig::from_env()?;
    config.log_config();

    let (monitor, mut events) = initialize_components(&config).await?;

    // Outbound events; notification collaborators hang off this consumer.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    // Rebuild the registry from the loan book before the first tick.
    let positions = HttpPositionSource::new(config.endpoints.positions_url.clone());
    let seeded = monitor.bootstrap(&positions).await?;
    info!(positions = seeded, "bootstrap complete");

    let poll_loop = tokio::spawn(monitor.clone().run());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    monitor.stop();
    let _ = poll_loop.await;

    Ok(())
}

async fn initialize_components(
    config: &SentinelConfig,
) -> Result<(Arc<Monitor>, sentinel_core::EventReceiver)> {
    info!("initializing components...");

    // Lock nodes
    let mut nodes: Vec<Arc<dyn LockNode>> = Vec::new();
    for url in &config.locks.nodes {
        let node = RedisLockNode::connect(url).await?;
        nodes.push(Arc::new(node));
    }
    if nodes.is_empty() {
        warn!("no lock nodes configured, falling back to a process-local node");
        nodes.push(Arc::new(MemoryLockNode::new()));
    }
    let node_count = nodes.len();
    let locks = Arc::new(QuorumLock::with_config(
        nodes,
        config.locks.manager_config(),
    ));
    info!(nodes = node_count, "lock manager initialized");

    // Collaborator clients
    let feed: Arc<dyn PriceFeed> = Arc::new(HttpPriceFeed::new(
        config.endpoints.feed_url.clone(),
        AssetId::new(config.endpoints.reference_asset.clone()),
    ));
    let settlement: Arc<dyn Settlement> =
        Arc::new(HttpSettlement::new(config.endpoints.settlement_url.clone()));
    let retry_queue: Arc<dyn RetryQueue> =
        Arc::new(HttpRetryQueue::new(config.endpoints.queue_url.clone()));

    let (event_tx, event_rx) = sentinel_core::channel(256);
    let registry = Arc::new(MonitorRegistry::new());

    let executor = Arc::new(LiquidationExecutor::new(
        registry.clone(),
        locks,
        settlement,
        retry_queue,
        event_tx.clone(),
        AccountId::new(config.endpoints.caller.clone()),
        config.executor.clone(),
    ));

    let monitor = Arc::new(Monitor::new(
        registry,
        feed,
        executor,
        event_tx,
        config.monitor.clone(),
    ));

    info!("all components initialized");
    Ok((monitor, event_rx))
}

fn log_event(event: &SentinelEvent) {
    match event {
        SentinelEvent::PollerSuspended {
            consecutive_failures,
            ..
        } => {
            error!(
                consecutive_failures,
                "PRICE POLLING SUSPENDED - liquidation protection is offline until restarted"
            );
        }
        SentinelEvent::LiquidationSucceeded {
            position, attempts, ..
        } => {
            info!(position = %position, attempts, "liquidation succeeded");
        }
        SentinelEvent::LiquidationFailed {
            position,
            attempts,
            reason,
            ..
        } => {
            error!(position = %position, attempts, reason = %reason, "liquidation escalated to retry queue");
        }
        SentinelEvent::LiquidationSkipped {
            position, resource, ..
        } => {
            debug!(position = %position, resource = %resource, "liquidation skipped, lock held elsewhere");
        }
    }
}

fn print_banner() {
    println!(
        r#"
    ┌─┐┌─┐┌┐┌┌┬┐┬┌┐┌┌─┐┬
    └─┐├┤ │││ │ ││││├┤ │
    └─┘└─┘┘└┘ ┴ ┴┘└┘└─┘┴─┘
    Liquidation Sentinel v0.1.0
    "#
    );
}
