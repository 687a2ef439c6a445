//! Liquidation execution on breach events.
//!
//! Per breach: win both the position and owner locks (non-blocking), invoke
//! the settlement operation with bounded exponential retries, and either
//! remove the threshold on confirmed success or hand the position to the
//! durable retry queue. Losing a lock is an expected outcome of concurrent
//! triggers, not an error.

use chrono::Utc;
use std::cmp;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use sentinel_api::{
    AccountId, RetryQueue, RetryTask, Settlement, SettlementOutcome,
};
use sentinel_lock::{LockHandle, QuorumLock};

use crate::config::{ExecutorConfig, OutagePolicy};
use crate::detector::Breach;
use crate::events::{EventSender, SentinelEvent};
use crate::registry::MonitorRegistry;

/// Terminal state of one breach hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded { attempts: u32 },
    /// Another instance holds a lock for this position or owner; it will
    /// handle the breach, or the next poll tick will retrigger it.
    Skipped,
    /// Local retries exhausted; escalated to the durable retry queue.
    Escalated { attempts: u32 },
}

pub struct LiquidationExecutor {
    registry: Arc<MonitorRegistry>,
    locks: Arc<QuorumLock>,
    settlement: Arc<dyn Settlement>,
    retry_queue: Arc<dyn RetryQueue>,
    events: EventSender,
    caller: AccountId,
    config: ExecutorConfig,
}

impl LiquidationExecutor {
    pub fn new(
        registry: Arc<MonitorRegistry>,
        locks: Arc<QuorumLock>,
        settlement: Arc<dyn Settlement>,
        retry_queue: Arc<dyn RetryQueue>,
        events: EventSender,
        caller: AccountId,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            locks,
            settlement,
            retry_queue,
            events,
            caller,
            config,
        }
    }

    fn position_key(breach: &Breach) -> String {
        format!("liq:pos:{}", breach.position)
    }

    /// Owner-scoped key: two positions of one owner never liquidate
    /// concurrently, so partial liquidations cannot compound against the
    /// same collateral.
    fn owner_key(breach: &Breach) -> String {
        format!("liq:owner:{}", breach.owner)
    }

    /// Drive one breach through to a terminal state.
    #[instrument(skip(self, breach), fields(position = %breach.position, asset = %breach.asset))]
    pub async fn handle(&self, breach: Breach) -> ExecutionOutcome {
        let ttl = self.config.lock_ttl();

        let position_lock = match self.guard(&breach, &Self::position_key(&breach), ttl).await {
            GuardOutcome::Held(handle) => handle,
            GuardOutcome::Unlocked => None,
            GuardOutcome::Skip => return ExecutionOutcome::Skipped,
        };

        let owner_lock = match self.guard(&breach, &Self::owner_key(&breach), ttl).await {
            GuardOutcome::Held(handle) => handle,
            GuardOutcome::Unlocked => None,
            GuardOutcome::Skip => {
                if let Some(handle) = &position_lock {
                    self.locks.release(handle).await;
                }
                return ExecutionOutcome::Skipped;
            }
        };

        let result = self.settle_with_retry(&breach).await;

        // Locks are released before any escalation work: the durable path
        // must not block the next poll-driven attempt.
        if let Some(handle) = &owner_lock {
            self.locks.release(handle).await;
        }
        if let Some(handle) = &position_lock {
            self.locks.release(handle).await;
        }

        match result {
            Ok((outcome, attempts)) => {
                self.registry
                    .remove_threshold(&breach.asset, &breach.position);
                info!(
                    position = %breach.position,
                    owner = %breach.owner,
                    attempts,
                    drop_pct = breach.drop_pct,
                    "position liquidated"
                );
                self.emit(SentinelEvent::LiquidationSucceeded {
                    position: breach.position.clone(),
                    owner: breach.owner.clone(),
                    asset: breach.asset.clone(),
                    attempts,
                    outcome,
                    at: Utc::now(),
                })
                .await;
                ExecutionOutcome::Succeeded { attempts }
            }
            Err((reason, attempts)) => {
                error!(
                    position = %breach.position,
                    attempts,
                    reason = %reason,
                    "liquidation attempts exhausted, escalating to retry queue"
                );
                self.emit(SentinelEvent::LiquidationFailed {
                    position: breach.position.clone(),
                    owner: breach.owner.clone(),
                    asset: breach.asset.clone(),
                    attempts,
                    reason: reason.clone(),
                    at: Utc::now(),
                })
                .await;

                let task = RetryTask {
                    position: breach.position.clone(),
                    attempts,
                    reason,
                };
                if let Err(e) = self
                    .retry_queue
                    .enqueue(task, &self.config.retry_policy())
                    .await
                {
                    error!(position = %breach.position, error = %e, "retry-queue hand-off failed");
                }
                ExecutionOutcome::Escalated { attempts }
            }
        }
    }

    /// Take one lock without blocking, applying the outage policy when the
    /// provider itself is down.
    async fn guard(&self, breach: &Breach, resource: &str, ttl: Duration) -> GuardOutcome {
        match self.locks.try_acquire(resource, ttl).await {
            Ok(Some(handle)) => GuardOutcome::Held(Some(handle)),
            Ok(None) => {
                info!(position = %breach.position, resource, "lock busy, skipping breach");
                self.emit(SentinelEvent::LiquidationSkipped {
                    position: breach.position.clone(),
                    resource: resource.to_string(),
                    at: Utc::now(),
                })
                .await;
                GuardOutcome::Skip
            }
            Err(e) => match self.config.outage_policy {
                OutagePolicy::FailClosed => {
                    warn!(
                        position = %breach.position,
                        resource,
                        error = %e,
                        "lock provider down, skipping breach (fail-closed)"
                    );
                    self.emit(SentinelEvent::LiquidationSkipped {
                        position: breach.position.clone(),
                        resource: resource.to_string(),
                        at: Utc::now(),
                    })
                    .await;
                    GuardOutcome::Skip
                }
                OutagePolicy::FailOpen => {
                    warn!(
                        position = %breach.position,
                        resource,
                        error = %e,
                        "lock provider down, proceeding WITHOUT mutual exclusion (fail-open)"
                    );
                    GuardOutcome::Unlocked
                }
            },
        }
    }

    /// Invoke settlement with bounded exponential backoff. Attempts are
    /// strictly sequential; a rejection stops retrying immediately.
    async fn settle_with_retry(
        &self,
        breach: &Breach,
    ) -> Result<(SettlementOutcome, u32), (String, u32)> {
        let max_attempts = self.config.max_attempts.max(1);
        let base = self.config.backoff_base();
        let cap = self.config.backoff_cap();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let exponent = (attempt - 2).min(16);
                let delay = cmp::min(base * (1u32 << exponent), cap);
                info!(
                    position = %breach.position,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying liquidation after backoff"
                );
                tokio::time::sleep(delay).await;
            }

            match self.settlement.liquidate(&breach.position, &self.caller).await {
                Ok(outcome) => return Ok((outcome, attempt)),
                Err(e) if !e.is_retryable() => {
                    warn!(
                        position = %breach.position,
                        attempt,
                        error = %e,
                        "liquidation rejected, not retrying"
                    );
                    return Err((e.to_string(), attempt));
                }
                Err(e) => {
                    warn!(
                        position = %breach.position,
                        attempt,
                        error = %e,
                        "liquidation attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err((last_error, max_attempts))
    }

    async fn emit(&self, event: SentinelEvent) {
        let _ = self.events.send(event).await;
    }
}

enum GuardOutcome {
    Held(Option<LockHandle>),
    /// Fail-open under provider outage: no lease held.
    Unlocked,
    Skip,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    use sentinel_api::{
        AssetId, LiquidationReason, PositionId, QueueError, RetryPolicy, SettlementError,
    };
    use sentinel_lock::{LockNode, MemoryLockNode, NodeError};

    use crate::events;
    use crate::registry::LiquidationThreshold;

    struct ScriptedSettlement {
        script: Mutex<VecDeque<Result<SettlementOutcome, SettlementError>>>,
        calls: AtomicU32,
        call_at: Mutex<Vec<Instant>>,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
        hold: Duration,
    }

    impl ScriptedSettlement {
        fn new(script: Vec<Result<SettlementOutcome, SettlementError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                call_at: Mutex::new(Vec::new()),
                in_flight: AtomicU32::new(0),
                max_in_flight: AtomicU32::new(0),
                hold: Duration::ZERO,
            })
        }

        fn with_hold(
            script: Vec<Result<SettlementOutcome, SettlementError>>,
            hold: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                call_at: Mutex::new(Vec::new()),
                in_flight: AtomicU32::new(0),
                max_in_flight: AtomicU32::new(0),
                hold,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn gaps(&self) -> Vec<Duration> {
            let at = self.call_at.lock();
            at.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    #[async_trait]
    impl Settlement for ScriptedSettlement {
        async fn liquidate(
            &self,
            _position: &PositionId,
            _caller: &AccountId,
        ) -> Result<SettlementOutcome, SettlementError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_at.lock().push(Instant::now());

            let live = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(live, Ordering::SeqCst);
            if !self.hold.is_zero() {
                tokio::time::sleep(self.hold).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.script
                .lock()
                .pop_front()
                .unwrap_or(Ok(SettlementOutcome::AlreadyLiquidated))
        }
    }

    #[derive(Default)]
    struct RecordingQueue {
        tasks: Mutex<Vec<(RetryTask, RetryPolicy)>>,
    }

    #[async_trait]
    impl RetryQueue for RecordingQueue {
        async fn enqueue(&self, task: RetryTask, policy: &RetryPolicy) -> Result<(), QueueError> {
            self.tasks.lock().push((task, policy.clone()));
            Ok(())
        }
    }

    struct DownNode;

    #[async_trait]
    impl LockNode for DownNode {
        async fn try_lock(&self, _: &str, _: &str, _: Duration) -> Result<bool, NodeError> {
            Err(NodeError::Unavailable("down".to_string()))
        }
        async fn unlock(&self, _: &str, _: &str) -> Result<bool, NodeError> {
            Err(NodeError::Unavailable("down".to_string()))
        }
        async fn extend(&self, _: &str, _: &str, _: Duration) -> Result<bool, NodeError> {
            Err(NodeError::Unavailable("down".to_string()))
        }
    }

    fn memory_lock() -> Arc<QuorumLock> {
        let nodes: Vec<Arc<dyn LockNode>> = (0..3)
            .map(|_| Arc::new(MemoryLockNode::new()) as Arc<dyn LockNode>)
            .collect();
        Arc::new(QuorumLock::new(nodes))
    }

    fn down_lock() -> Arc<QuorumLock> {
        let nodes: Vec<Arc<dyn LockNode>> = vec![Arc::new(DownNode)];
        Arc::new(QuorumLock::new(nodes))
    }

    fn breach(position: &str, owner: &str) -> Breach {
        Breach {
            asset: AssetId::from("mintA"),
            position: PositionId::from(position),
            owner: AccountId::from(owner),
            trigger_price: 900,
            entry_price: 1_200,
            principal: 5_000_000_000,
            observed_price: 850,
            drop_pct: 29.16,
        }
    }

    struct Harness {
        executor: Arc<LiquidationExecutor>,
        settlement: Arc<ScriptedSettlement>,
        queue: Arc<RecordingQueue>,
        registry: Arc<MonitorRegistry>,
        locks: Arc<QuorumLock>,
        events: events::EventReceiver,
    }

    fn harness_with(
        settlement: Arc<ScriptedSettlement>,
        locks: Arc<QuorumLock>,
        config: ExecutorConfig,
    ) -> Harness {
        let registry = Arc::new(MonitorRegistry::new());
        registry.register(
            &AssetId::from("mintA"),
            LiquidationThreshold {
                position: PositionId::from("loan-1"),
                owner: AccountId::from("borrower-1"),
                trigger_price: 900,
                entry_price: 1_200,
                principal: 5_000_000_000,
            },
        );

        let queue = Arc::new(RecordingQueue::default());
        let (tx, rx) = events::channel(16);

        let executor = Arc::new(LiquidationExecutor::new(
            registry.clone(),
            locks.clone(),
            settlement.clone(),
            queue.clone(),
            tx,
            AccountId::from("sentinel"),
            config,
        ));

        Harness {
            executor,
            settlement,
            queue,
            registry,
            locks,
            events: rx,
        }
    }

    fn harness(script: Vec<Result<SettlementOutcome, SettlementError>>) -> Harness {
        harness_with(
            ScriptedSettlement::new(script),
            memory_lock(),
            ExecutorConfig::default(),
        )
    }

    fn liquidated() -> Result<SettlementOutcome, SettlementError> {
        Ok(SettlementOutcome::Liquidated {
            reason: LiquidationReason::Price,
        })
    }

    fn unavailable() -> Result<SettlementOutcome, SettlementError> {
        Err(SettlementError::Unavailable(503))
    }

    #[tokio::test]
    async fn success_removes_threshold_and_releases_locks() {
        let mut h = harness(vec![liquidated()]);

        let outcome = h.executor.handle(breach("loan-1", "borrower-1")).await;
        assert_eq!(outcome, ExecutionOutcome::Succeeded { attempts: 1 });

        assert_eq!(h.settlement.calls(), 1);
        assert_eq!(h.registry.stats().threshold_count, 0);
        assert!(h.queue.tasks.lock().is_empty());

        // Both leases released.
        assert!(h
            .locks
            .try_acquire("liq:pos:loan-1", Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());
        assert!(h
            .locks
            .try_acquire("liq:owner:borrower-1", Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());

        match h.events.try_recv().unwrap() {
            SentinelEvent::LiquidationSucceeded { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_exponentially_until_escalation() {
        let mut h = harness(vec![unavailable(), unavailable(), unavailable()]);

        let outcome = h.executor.handle(breach("loan-1", "borrower-1")).await;
        assert_eq!(outcome, ExecutionOutcome::Escalated { attempts: 3 });

        assert_eq!(h.settlement.calls(), 3);
        let gaps = h.settlement.gaps();
        assert_eq!(gaps, vec![Duration::from_secs(2), Duration::from_secs(4)]);

        // Never removed without a confirmed success.
        assert_eq!(h.registry.stats().threshold_count, 1);

        let tasks = h.queue.tasks.lock();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].0.position.as_str(), "loan-1");
        assert_eq!(tasks[0].0.attempts, 3);
        assert_eq!(tasks[0].1.backoff_base_ms, 60_000);
        drop(tasks);

        match h.events.try_recv().unwrap() {
            SentinelEvent::LiquidationFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_recover_on_a_later_attempt() {
        let h = harness(vec![unavailable(), unavailable(), liquidated()]);

        let outcome = h.executor.handle(breach("loan-1", "borrower-1")).await;
        assert_eq!(outcome, ExecutionOutcome::Succeeded { attempts: 3 });

        let gaps = h.settlement.gaps();
        assert_eq!(gaps, vec![Duration::from_secs(2), Duration::from_secs(4)]);

        // Removed only after the third call confirmed success.
        assert_eq!(h.registry.stats().threshold_count, 0);
        assert!(h.queue.tasks.lock().is_empty());
    }

    #[tokio::test]
    async fn rejection_stops_retrying_immediately() {
        let h = harness(vec![Err(SettlementError::Rejected {
            code: "loan_repaid".to_string(),
        })]);

        let outcome = h.executor.handle(breach("loan-1", "borrower-1")).await;
        assert_eq!(outcome, ExecutionOutcome::Escalated { attempts: 1 });

        assert_eq!(h.settlement.calls(), 1);
        assert_eq!(h.registry.stats().threshold_count, 1);
        assert_eq!(h.queue.tasks.lock().len(), 1);
    }

    #[tokio::test]
    async fn already_liquidated_counts_as_success() {
        let h = harness(vec![Ok(SettlementOutcome::AlreadyLiquidated)]);

        let outcome = h.executor.handle(breach("loan-1", "borrower-1")).await;
        assert_eq!(outcome, ExecutionOutcome::Succeeded { attempts: 1 });
        assert_eq!(h.registry.stats().threshold_count, 0);
    }

    #[tokio::test]
    async fn busy_position_lock_skips_without_calling_settlement() {
        let mut h = harness(vec![liquidated()]);

        let _held = h
            .locks
            .try_acquire("liq:pos:loan-1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let outcome = h.executor.handle(breach("loan-1", "borrower-1")).await;
        assert_eq!(outcome, ExecutionOutcome::Skipped);
        assert_eq!(h.settlement.calls(), 0);
        assert_eq!(h.registry.stats().threshold_count, 1);

        assert!(matches!(
            h.events.try_recv().unwrap(),
            SentinelEvent::LiquidationSkipped { .. }
        ));
    }

    #[tokio::test]
    async fn busy_owner_lock_releases_the_position_lock() {
        let h = harness(vec![liquidated()]);

        let _held = h
            .locks
            .try_acquire("liq:owner:borrower-1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let outcome = h.executor.handle(breach("loan-1", "borrower-1")).await;
        assert_eq!(outcome, ExecutionOutcome::Skipped);
        assert_eq!(h.settlement.calls(), 0);

        // The partially-acquired position lock must not linger.
        assert!(h
            .locks
            .try_acquire("liq:pos:loan-1", Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn one_owners_positions_never_settle_concurrently() {
        let settlement = ScriptedSettlement::with_hold(
            vec![liquidated(), liquidated()],
            Duration::from_secs(1),
        );
        let h = harness_with(settlement, memory_lock(), ExecutorConfig::default());

        let a = {
            let executor = h.executor.clone();
            tokio::spawn(async move { executor.handle(breach("loan-1", "borrower-1")).await })
        };
        let b = {
            let executor = h.executor.clone();
            tokio::spawn(async move { executor.handle(breach("loan-2", "borrower-1")).await })
        };

        let outcomes = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(h.settlement.max_in_flight.load(Ordering::SeqCst), 1);

        let succeeded = outcomes
            .iter()
            .filter(|o| matches!(o, ExecutionOutcome::Succeeded { .. }))
            .count();
        let skipped = outcomes
            .iter()
            .filter(|o| matches!(o, ExecutionOutcome::Skipped))
            .count();
        assert!(succeeded >= 1);
        assert_eq!(succeeded + skipped, 2);
    }

    #[tokio::test]
    async fn provider_outage_fails_closed_by_default() {
        let h = harness_with(
            ScriptedSettlement::new(vec![liquidated()]),
            down_lock(),
            ExecutorConfig::default(),
        );

        let outcome = h.executor.handle(breach("loan-1", "borrower-1")).await;
        assert_eq!(outcome, ExecutionOutcome::Skipped);
        assert_eq!(h.settlement.calls(), 0);
    }

    #[tokio::test]
    async fn provider_outage_can_fail_open_when_configured() {
        let config = ExecutorConfig {
            outage_policy: OutagePolicy::FailOpen,
            ..ExecutorConfig::default()
        };
        let h = harness_with(ScriptedSettlement::new(vec![liquidated()]), down_lock(), config);

        let outcome = h.executor.handle(breach("loan-1", "borrower-1")).await;
        assert_eq!(outcome, ExecutionOutcome::Succeeded { attempts: 1 });
        assert_eq!(h.settlement.calls(), 1);
    }
}
