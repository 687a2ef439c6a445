//! Price poller and monitoring facade.
//!
//! A single periodic timer drives ticks. Within a tick, feed batches are
//! fetched sequentially to respect the upstream batch limit; breach
//! handling fans out concurrently. A lower-frequency cycle refreshes the
//! base/USD reference price used to convert feed quotes.

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use sentinel_api::{AssetId, FeedError, PositionId, PositionSource, PriceFeed, PriceQuote};

use crate::config::MonitorConfig;
use crate::detector;
use crate::events::{EventSender, SentinelEvent};
use crate::executor::LiquidationExecutor;
use crate::price;
use crate::registry::{AssetStatus, LiquidationThreshold, MonitorRegistry, RegisterOutcome};

/// Read-only snapshot for external health dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub tracked_assets: usize,
    pub thresholds: usize,
    /// Base-asset price in USD; 0 until the first successful refresh.
    pub reference_price: f64,
    pub assets: Vec<AssetStatus>,
}

pub struct Monitor {
    registry: Arc<MonitorRegistry>,
    feed: Arc<dyn PriceFeed>,
    executor: Arc<LiquidationExecutor>,
    events: EventSender,
    config: MonitorConfig,
    /// Base-asset USD price; previous value is reused when a refresh fails.
    reference_price: RwLock<f64>,
    consecutive_failures: AtomicU32,
    running: AtomicBool,
    suspended: AtomicBool,
    stopper: Notify,
}

impl Monitor {
    pub fn new(
        registry: Arc<MonitorRegistry>,
        feed: Arc<dyn PriceFeed>,
        executor: Arc<LiquidationExecutor>,
        events: EventSender,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            feed,
            executor,
            events,
            config,
            reference_price: RwLock::new(0.0),
            consecutive_failures: AtomicU32::new(0),
            running: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            stopper: Notify::new(),
        }
    }

    pub fn registry(&self) -> &MonitorRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the poll loop until stopped or self-suspended. Restarting after
    /// a suspension is an explicit operator action: call `run` again.
    pub async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("poll loop already running");
            return;
        }
        self.suspended.store(false, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);

        info!(
            interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.feed_batch_size,
            "starting price poll loop"
        );

        let reference_monitor = self.clone();
        let reference_task = tokio::spawn(async move {
            reference_monitor.reference_cycle().await;
        });

        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.is_running() {
                        break;
                    }
                    self.tick().await;
                    if !self.is_running() {
                        break;
                    }
                }
                _ = self.stopper.notified() => break,
            }
        }

        reference_task.abort();
        info!("price poll loop stopped");
    }

    /// Cancel the poll timer immediately. In-flight liquidation attempts
    /// run to completion; lock TTLs bound the damage of a crash.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stopper.notify_waiters();
    }

    /// One poll pass: fetch quotes for every tracked asset in feed-sized
    /// batches, update the registry, and fan out breach handling.
    pub async fn tick(&self) {
        if self.suspended.load(Ordering::SeqCst) {
            return;
        }

        let assets = self.registry.tracked_assets();
        if assets.is_empty() {
            return;
        }
        let reference = *self.reference_price.read();

        for batch in assets.chunks(self.config.feed_batch_size.max(1)) {
            match self.feed.quotes(batch).await {
                Ok(quotes) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    for quote in &quotes {
                        self.apply_quote(quote, reference);
                    }
                }
                Err(FeedError::RateLimited) => {
                    warn!(
                        backoff_ms = self.config.rate_limit_backoff_ms,
                        "feed rate limited, backing off"
                    );
                    tokio::time::sleep(self.config.rate_limit_backoff()).await;
                    if self.record_failure().await {
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, batch_len = batch.len(), "feed batch request failed");
                    if self.record_failure().await {
                        return;
                    }
                }
            }
        }
    }

    /// Register a threshold and evaluate it against the asset's current
    /// price right away: a threshold born breached triggers liquidation
    /// before this call returns, not on the next poll tick.
    #[instrument(skip(self, threshold), fields(asset = %asset, position = %threshold.position))]
    pub async fn register_threshold(&self, asset: &AssetId, threshold: LiquidationThreshold) {
        let trigger_price = threshold.trigger_price;
        match self.registry.register(asset, threshold.clone()) {
            RegisterOutcome::Duplicate => {}
            RegisterOutcome::Registered { last_price } => {
                info!(trigger_price, "threshold registered");
                if last_price > 0 && last_price <= trigger_price {
                    let breaches =
                        detector::evaluate(asset, last_price, std::slice::from_ref(&threshold));
                    for breach in breaches {
                        info!(
                            position = %breach.position,
                            price = last_price,
                            "threshold breached at registration, triggering immediately"
                        );
                        self.executor.handle(breach).await;
                    }
                }
            }
        }
    }

    /// Drop a position's threshold (repayment, manual cancellation).
    pub fn remove_threshold(&self, asset: &AssetId, position: &PositionId) -> bool {
        self.registry.remove_threshold(asset, position)
    }

    /// Track an asset without thresholds. Idempotent.
    pub fn track_asset(&self, asset: &AssetId) {
        self.registry.track(asset);
    }

    /// Rebuild thresholds from the active-positions source. Positions that
    /// are already unhealthy liquidate during the rebuild via the
    /// immediate-evaluation path.
    pub async fn bootstrap(&self, source: &dyn PositionSource) -> anyhow::Result<usize> {
        let positions = source.active_positions().await?;
        let count = positions.len();
        info!(count, "rebuilding thresholds from active positions");

        for p in positions {
            self.register_threshold(
                &p.asset,
                LiquidationThreshold {
                    position: p.position,
                    owner: p.owner,
                    trigger_price: p.trigger_price,
                    entry_price: p.entry_price,
                    principal: p.principal,
                },
            )
            .await;
        }

        let stats = self.registry.stats();
        info!(
            assets = stats.asset_count,
            thresholds = stats.threshold_count,
            "registry rebuilt"
        );
        Ok(count)
    }

    pub fn status(&self) -> MonitorStatus {
        let stats = self.registry.stats();
        MonitorStatus {
            running: self.is_running(),
            tracked_assets: stats.asset_count,
            thresholds: stats.threshold_count,
            reference_price: *self.reference_price.read(),
            assets: self.registry.asset_statuses(),
        }
    }

    fn apply_quote(&self, quote: &PriceQuote, reference: f64) {
        let Some(converted) = price::usd_to_base(quote.price_usd, reference) else {
            debug!(asset = %quote.asset, price_usd = quote.price_usd, "unusable quote, skipping");
            return;
        };

        let thresholds = self
            .registry
            .update_price(&quote.asset, converted, quote.fetched_at);
        if thresholds.is_empty() {
            return;
        }

        for breach in detector::evaluate(&quote.asset, converted, &thresholds) {
            info!(
                position = %breach.position,
                asset = %breach.asset,
                price = converted,
                trigger_price = breach.trigger_price,
                drop_pct = breach.drop_pct,
                "liquidation threshold breached"
            );
            let executor = self.executor.clone();
            tokio::spawn(async move {
                executor.handle(breach).await;
            });
        }
    }

    /// Count a failed feed request; returns true once the budget is spent
    /// and the poller has suspended itself.
    async fn record_failure(&self) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures < self.config.max_consecutive_failures {
            return false;
        }

        self.running.store(false, Ordering::SeqCst);
        if !self.suspended.swap(true, Ordering::SeqCst) {
            error!(
                consecutive_failures = failures,
                "feed failure budget spent, suspending price polling"
            );
            let _ = self
                .events
                .send(SentinelEvent::PollerSuspended {
                    consecutive_failures: failures,
                    at: Utc::now(),
                })
                .await;
        }
        true
    }

    async fn refresh_reference(&self) {
        match self.feed.reference_price().await {
            Ok(value) if value > 0.0 && value.is_finite() => {
                *self.reference_price.write() = value;
                debug!(price_usd = value, "reference price refreshed");
            }
            Ok(value) => {
                warn!(price_usd = value, "ignoring unusable reference price");
            }
            Err(e) => {
                warn!(error = %e, "reference refresh failed, reusing previous value");
            }
        }
    }

    async fn reference_cycle(&self) {
        let mut ticker = interval(self.config.reference_refresh());
        loop {
            ticker.tick().await;
            self.refresh_reference().await;
        }
    }
}
