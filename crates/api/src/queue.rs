//! Durable retry-queue contract for escalated liquidation attempts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, instrument};

use crate::types::PositionId;

/// Job name under which escalations are enqueued.
pub const LIQUIDATION_RETRY_JOB: &str = "liquidation-retry";

/// Escalation payload produced when the fast path exhausts its local
/// retries. The queue owns the task's lifecycle from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryTask {
    pub position: PositionId,
    /// Attempts consumed by the fast path before hand-off.
    pub attempts: u32,
    pub reason: String,
}

/// Explicit retry semantics for the queued job: priority, attempt budget,
/// exponential backoff base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub priority: u8,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            priority: 1,
            max_attempts: 5,
            backoff_base_ms: 60_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue returned HTTP {0}")]
    Status(u16),

    #[error("queue transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Durable queue collaborator.
#[async_trait]
pub trait RetryQueue: Send + Sync {
    async fn enqueue(&self, task: RetryTask, policy: &RetryPolicy) -> Result<(), QueueError>;
}

/// HTTP client for the queue service.
#[derive(Debug, Clone)]
pub struct HttpRetryQueue {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRetryQueue {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl RetryQueue for HttpRetryQueue {
    #[instrument(skip(self, task, policy), fields(position = %task.position))]
    async fn enqueue(&self, task: RetryTask, policy: &RetryPolicy) -> Result<(), QueueError> {
        let url = format!("{}/jobs", self.base_url);
        let body = json!({
            "name": LIQUIDATION_RETRY_JOB,
            "payload": task,
            "opts": {
                "priority": policy.priority,
                "attempts": policy.max_attempts,
                "backoff": { "type": "exponential", "delay_ms": policy.backoff_base_ms },
            },
        });

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(QueueError::Status(status.as_u16()));
        }

        info!(position = %task.position, attempts = task.attempts, "retry task enqueued");
        Ok(())
    }
}
