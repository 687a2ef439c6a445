//! Lock node contract and the in-process implementation.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("lock node unavailable: {0}")]
    Unavailable(String),
}

/// A single lock node. Semantics match SET-NX-PX: `try_lock` grants only
/// when the key is free or its lease expired, and `unlock`/`extend` act only
/// for the holder token they were granted with.
#[async_trait]
pub trait LockNode: Send + Sync {
    async fn try_lock(&self, resource: &str, token: &str, ttl: Duration)
        -> Result<bool, NodeError>;

    async fn unlock(&self, resource: &str, token: &str) -> Result<bool, NodeError>;

    async fn extend(&self, resource: &str, token: &str, ttl: Duration) -> Result<bool, NodeError>;
}

#[derive(Debug, Clone)]
struct Holder {
    token: String,
    expires_at: Instant,
}

/// In-process lock node. Correct as a single-node provider within one
/// process; the quorum manager treats it exactly like a remote node.
#[derive(Debug, Default)]
pub struct MemoryLockNode {
    entries: DashMap<String, Holder>,
}

impl MemoryLockNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) leases, for introspection in tests.
    pub fn live_leases(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| e.value().expires_at > now)
            .count()
    }
}

#[async_trait]
impl LockNode for MemoryLockNode {
    async fn try_lock(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, NodeError> {
        let holder = Holder {
            token: token.to_string(),
            expires_at: Instant::now() + ttl,
        };

        let granted = match self.entries.entry(resource.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(holder);
                true
            }
            Entry::Occupied(mut slot) => {
                if slot.get().expires_at <= Instant::now() {
                    slot.insert(holder);
                    true
                } else {
                    false
                }
            }
        };

        Ok(granted)
    }

    async fn unlock(&self, resource: &str, token: &str) -> Result<bool, NodeError> {
        let removed = self
            .entries
            .remove_if(resource, |_, holder| holder.token == token);
        Ok(removed.is_some())
    }

    async fn extend(&self, resource: &str, token: &str, ttl: Duration) -> Result<bool, NodeError> {
        match self.entries.get_mut(resource) {
            Some(mut holder) if holder.token == token && holder.expires_at > Instant::now() => {
                holder.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grants_once_until_expiry() {
        let node = MemoryLockNode::new();
        let ttl = Duration::from_millis(50);

        assert!(node.try_lock("res", "a", ttl).await.unwrap());
        assert!(!node.try_lock("res", "b", ttl).await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(node.try_lock("res", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn unlock_requires_holder_token() {
        let node = MemoryLockNode::new();
        let ttl = Duration::from_secs(5);

        node.try_lock("res", "a", ttl).await.unwrap();
        assert!(!node.unlock("res", "b").await.unwrap());
        assert!(node.unlock("res", "a").await.unwrap());
        assert!(node.try_lock("res", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn extend_refreshes_live_lease_only() {
        let node = MemoryLockNode::new();
        let ttl = Duration::from_millis(50);

        node.try_lock("res", "a", ttl).await.unwrap();
        assert!(node.extend("res", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!node.extend("res", "b", Duration::from_secs(5)).await.unwrap());

        node.try_lock("expired", "a", ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!node.extend("expired", "a", ttl).await.unwrap());
    }
}
