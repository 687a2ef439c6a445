//! Quorum lock manager with drift compensation.

use futures::future::join_all;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::node::LockNode;

/// Margin subtracted from the nominal TTL on top of elapsed acquisition
/// time, compensating for clock skew across nodes.
fn drift(ttl: Duration, factor: f64) -> Duration {
    ttl.mul_f64(factor) + Duration::from_millis(2)
}

/// A held lease. Owned exclusively by the caller that acquired it; either
/// released explicitly or reclaimed by the nodes at TTL expiry.
#[derive(Debug, Clone)]
pub struct LockHandle {
    resource: String,
    token: String,
    valid_until: Instant,
}

impl LockHandle {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn valid_until(&self) -> Instant {
        self.valid_until
    }

    /// Whether the drift-compensated lease is still live.
    pub fn is_valid(&self) -> bool {
        Instant::now() < self.valid_until
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock on {resource} not acquired after {attempts} attempts")]
    Exhausted { resource: String, attempts: u32 },

    /// Every node errored; the provider itself is down, which is a
    /// different condition from losing the race.
    #[error("lock provider unavailable for {resource}")]
    Unavailable { resource: String },
}

/// Acquisition tuning.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Blocking-acquire attempt budget.
    pub retry_count: u32,
    /// Base delay between blocking-acquire attempts; jitter is added per
    /// attempt.
    pub retry_delay: Duration,
    /// Clock-drift compensation factor applied to the TTL.
    pub drift_factor: f64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay: Duration::from_millis(200),
            drift_factor: 0.01,
        }
    }
}

/// Majority lock over redundant nodes. A resource is held when more than
/// half of the nodes granted the same token and the drift-compensated
/// validity window has not elapsed.
pub struct QuorumLock {
    nodes: Vec<Arc<dyn LockNode>>,
    quorum: usize,
    config: LockConfig,
}

impl QuorumLock {
    pub fn new(nodes: Vec<Arc<dyn LockNode>>) -> Self {
        Self::with_config(nodes, LockConfig::default())
    }

    pub fn with_config(nodes: Vec<Arc<dyn LockNode>>, config: LockConfig) -> Self {
        assert!(!nodes.is_empty(), "quorum lock needs at least one node");
        let quorum = nodes.len() / 2 + 1;
        Self {
            nodes,
            quorum,
            config,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Single acquisition attempt. `Ok(None)` means another holder won,
    /// an expected outcome under concurrency rather than an error. `Err`
    /// means the provider itself is unreachable.
    pub async fn try_acquire(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> Result<Option<LockHandle>, LockError> {
        let token = new_token();
        let started = Instant::now();

        let votes = join_all(
            self.nodes
                .iter()
                .map(|node| node.try_lock(resource, &token, ttl)),
        )
        .await;

        let mut granted = 0usize;
        let mut errored = 0usize;
        for vote in &votes {
            match vote {
                Ok(true) => granted += 1,
                Ok(false) => {}
                Err(e) => {
                    debug!(resource, error = %e, "lock node vote failed");
                    errored += 1;
                }
            }
        }

        if errored == self.nodes.len() {
            return Err(LockError::Unavailable {
                resource: resource.to_string(),
            });
        }

        let valid_until = started + ttl.saturating_sub(drift(ttl, self.config.drift_factor));
        if granted >= self.quorum && valid_until > Instant::now() {
            trace!(resource, granted, "lock acquired");
            return Ok(Some(LockHandle {
                resource: resource.to_string(),
                token,
                valid_until,
            }));
        }

        // Lost the race or burned the whole validity window: undo the
        // partial grant so the losers' keys do not linger until expiry.
        self.unlock_all(resource, &token).await;
        Ok(None)
    }

    /// Blocking acquisition: retries with jittered backoff until the lock
    /// is won or the attempt budget runs out.
    pub async fn acquire(&self, resource: &str, ttl: Duration) -> Result<LockHandle, LockError> {
        let attempts = self.config.retry_count.max(1);

        for attempt in 1..=attempts {
            if let Some(handle) = self.try_acquire(resource, ttl).await? {
                return Ok(handle);
            }

            if attempt < attempts {
                let delay = self.retry_delay(attempt);
                debug!(resource, attempt, delay_ms = delay.as_millis() as u64, "lock busy, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        Err(LockError::Exhausted {
            resource: resource.to_string(),
            attempts,
        })
    }

    /// Renew a held lease. Returns false when the quorum no longer agrees
    /// the caller holds it (lost to expiry).
    pub async fn extend(
        &self,
        handle: &mut LockHandle,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let started = Instant::now();

        let votes = join_all(
            self.nodes
                .iter()
                .map(|node| node.extend(&handle.resource, &handle.token, ttl)),
        )
        .await;

        let mut extended = 0usize;
        let mut errored = 0usize;
        for vote in &votes {
            match vote {
                Ok(true) => extended += 1,
                Ok(false) => {}
                Err(_) => errored += 1,
            }
        }

        if errored == self.nodes.len() {
            return Err(LockError::Unavailable {
                resource: handle.resource.clone(),
            });
        }

        if extended >= self.quorum {
            handle.valid_until =
                started + ttl.saturating_sub(drift(ttl, self.config.drift_factor));
            return Ok(true);
        }
        Ok(false)
    }

    /// Release a held lease on all nodes (best effort; an unreachable node
    /// reclaims the key at TTL expiry anyway).
    pub async fn release(&self, handle: &LockHandle) {
        self.unlock_all(&handle.resource, &handle.token).await;
        trace!(resource = %handle.resource, "lock released");
    }

    /// Run `f` under the lock, releasing on every exit path.
    pub async fn with_lock<T, F, Fut>(
        &self,
        resource: &str,
        ttl: Duration,
        f: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self.acquire(resource, ttl).await?;
        let out = f().await;
        self.release(&handle).await;
        Ok(out)
    }

    /// Non-blocking scoped variant: `Ok(None)` (closure never ran) when the
    /// lock is busy.
    pub async fn try_with_lock<T, F, Fut>(
        &self,
        resource: &str,
        ttl: Duration,
        f: F,
    ) -> Result<Option<T>, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(handle) = self.try_acquire(resource, ttl).await? else {
            return Ok(None);
        };
        let out = f().await;
        self.release(&handle).await;
        Ok(Some(out))
    }

    async fn unlock_all(&self, resource: &str, token: &str) {
        let results = join_all(
            self.nodes
                .iter()
                .map(|node| node.unlock(resource, token)),
        )
        .await;

        for result in results {
            if let Err(e) = result {
                warn!(resource, error = %e, "lock node release failed");
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_delay * attempt;
        let half = (self.config.retry_delay.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..=half);
        base + Duration::from_millis(jitter)
    }
}

fn new_token() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}
