//! Distributed mutual exclusion for liquidation triggering.
//!
//! A quorum lock over redundant nodes: a resource is held when a majority of
//! nodes granted it within a drift-compensated validity window. Nodes are
//! pluggable: redis-backed in production, in-process for tests and
//! single-node deployments.

mod manager;
mod node;
mod redis_node;

pub use manager::{LockConfig, LockError, LockHandle, QuorumLock};
pub use node::{LockNode, MemoryLockNode, NodeError};
pub use redis_node::RedisLockNode;
