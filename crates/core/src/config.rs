//! Configuration for the monitoring service.
//!
//! Every field has a serde default so a partial TOML file only overrides
//! what it names.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use sentinel_api::RetryPolicy;
use sentinel_lock::LockConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Price polling and suspension
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Liquidation execution and escalation
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Distributed lock acquisition
    #[serde(default)]
    pub locks: LockSettings,

    /// Collaborator endpoints
    #[serde(default)]
    pub endpoints: EndpointConfig,
}

/// Poller timing and failure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Poll cadence (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upstream feed batch limit (identifiers per request)
    #[serde(default = "default_feed_batch_size")]
    pub feed_batch_size: usize,

    /// Consecutive failed feed requests before self-suspension
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Fixed backoff after an HTTP 429 from the feed (milliseconds)
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,

    /// Reference-price refresh cadence (seconds)
    #[serde(default = "default_reference_refresh_secs")]
    pub reference_refresh_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_feed_batch_size() -> usize {
    50
}
fn default_max_consecutive_failures() -> u32 {
    10
}
fn default_rate_limit_backoff_ms() -> u64 {
    1_000
}
fn default_reference_refresh_secs() -> u64 {
    30
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            feed_batch_size: default_feed_batch_size(),
            max_consecutive_failures: default_max_consecutive_failures(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            reference_refresh_secs: default_reference_refresh_secs(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }
    pub fn reference_refresh(&self) -> Duration {
        Duration::from_secs(self.reference_refresh_secs)
    }
}

/// What the executor does when the lock provider is unreachable.
/// Closed skips the attempt (no risk of double execution); open proceeds
/// unlocked and accepts that risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutagePolicy {
    FailClosed,
    FailOpen,
}

impl Default for OutagePolicy {
    fn default() -> Self {
        Self::FailClosed
    }
}

/// Liquidation execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Settlement attempts before escalating to the retry queue
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Exponential backoff base between settlement attempts (seconds)
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Backoff cap (seconds)
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Lease TTL for the position and owner locks (seconds)
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Behavior under lock-provider outage
    #[serde(default)]
    pub outage_policy: OutagePolicy,

    /// Queued-job priority for escalations
    #[serde(default = "default_retry_priority")]
    pub retry_priority: u8,

    /// Queued-job attempt budget
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Queued-job exponential backoff base (milliseconds)
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    2
}
fn default_backoff_cap_secs() -> u64 {
    60
}
fn default_lock_ttl_secs() -> u64 {
    10
}
fn default_retry_priority() -> u8 {
    1
}
fn default_retry_max_attempts() -> u32 {
    5
}
fn default_retry_backoff_base_ms() -> u64 {
    60_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            outage_policy: OutagePolicy::default(),
            retry_priority: default_retry_priority(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    /// Retry semantics handed to the durable queue on escalation.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            priority: self.retry_priority,
            max_attempts: self.retry_max_attempts,
            backoff_base_ms: self.retry_backoff_base_ms,
        }
    }
}

/// Lock acquisition settings plus the node endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    /// Blocking-acquire attempt budget
    #[serde(default = "default_lock_retry_count")]
    pub retry_count: u32,

    /// Base delay between blocking-acquire attempts (milliseconds)
    #[serde(default = "default_lock_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Clock-drift compensation factor
    #[serde(default = "default_drift_factor")]
    pub drift_factor: f64,

    /// Redis node URLs; empty falls back to a process-local node
    #[serde(default)]
    pub nodes: Vec<String>,
}

fn default_lock_retry_count() -> u32 {
    3
}
fn default_lock_retry_delay_ms() -> u64 {
    200
}
fn default_drift_factor() -> f64 {
    0.01
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            retry_count: default_lock_retry_count(),
            retry_delay_ms: default_lock_retry_delay_ms(),
            drift_factor: default_drift_factor(),
            nodes: Vec::new(),
        }
    }
}

impl LockSettings {
    pub fn manager_config(&self) -> LockConfig {
        LockConfig {
            retry_count: self.retry_count,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            drift_factor: self.drift_factor,
        }
    }
}

/// Collaborator endpoints and identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    #[serde(default = "default_positions_url")]
    pub positions_url: String,

    #[serde(default = "default_settlement_url")]
    pub settlement_url: String,

    #[serde(default = "default_queue_url")]
    pub queue_url: String,

    /// Base-asset mint whose USD quote is the conversion reference
    #[serde(default = "default_reference_asset")]
    pub reference_asset: String,

    /// Caller identity presented to the settlement path
    #[serde(default = "default_caller")]
    pub caller: String,
}

fn default_feed_url() -> String {
    "http://127.0.0.1:8071".to_string()
}
fn default_positions_url() -> String {
    "http://127.0.0.1:8072".to_string()
}
fn default_settlement_url() -> String {
    "http://127.0.0.1:8073".to_string()
}
fn default_queue_url() -> String {
    "http://127.0.0.1:8074".to_string()
}
fn default_reference_asset() -> String {
    // Wrapped SOL mint
    "So11111111111111111111111111111111111111112".to_string()
}
fn default_caller() -> String {
    "sentinel".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            positions_url: default_positions_url(),
            settlement_url: default_settlement_url(),
            queue_url: default_queue_url(),
            reference_asset: default_reference_asset(),
            caller: default_caller(),
        }
    }
}

impl SentinelConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from the file named by `SENTINEL_CONFIG`, or defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var("SENTINEL_CONFIG") {
            Ok(path) => Self::from_file(&path),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Log the effective configuration at startup.
    pub fn log_config(&self) {
        tracing::info!(
            poll_interval_ms = self.monitor.poll_interval_ms,
            batch_size = self.monitor.feed_batch_size,
            max_failures = self.monitor.max_consecutive_failures,
            reference_refresh_secs = self.monitor.reference_refresh_secs,
            "Monitor configuration"
        );
        tracing::info!(
            max_attempts = self.executor.max_attempts,
            backoff_base_secs = self.executor.backoff_base_secs,
            lock_ttl_secs = self.executor.lock_ttl_secs,
            outage_policy = ?self.executor.outage_policy,
            "Executor configuration"
        );
        tracing::info!(
            nodes = self.locks.nodes.len(),
            retry_count = self.locks.retry_count,
            drift_factor = self.locks.drift_factor,
            "Lock configuration"
        );
    }
}
