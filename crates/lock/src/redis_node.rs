//! Redis-backed lock node.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tracing::debug;

use crate::node::{LockNode, NodeError};

// Release and extend must only act for the holder token, so both are
// token-checked server-side.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// One redis instance acting as a lock node. Leases are plain keys with a
/// PX expiry; acquisition is SET NX.
#[derive(Clone)]
pub struct RedisLockNode {
    conn: ConnectionManager,
    url: String,
    release: Script,
    extend: Script,
}

impl std::fmt::Debug for RedisLockNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockNode").field("url", &self.url).finish()
    }
}

impl RedisLockNode {
    /// Connect to a redis node. The connection manager reconnects on its
    /// own; individual command failures surface as `NodeError::Unavailable`.
    pub async fn connect(url: &str) -> Result<Self, NodeError> {
        let client =
            redis::Client::open(url).map_err(|e| NodeError::Unavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;

        debug!(url, "lock node connected");
        Ok(Self {
            conn,
            url: url.to_string(),
            release: Script::new(RELEASE_SCRIPT),
            extend: Script::new(EXTEND_SCRIPT),
        })
    }
}

fn ttl_ms(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LockNode for RedisLockNode {
    async fn try_lock(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, NodeError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(resource)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;

        Ok(reply.is_some())
    }

    async fn unlock(&self, resource: &str, token: &str) -> Result<bool, NodeError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .release
            .key(resource)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;

        Ok(removed == 1)
    }

    async fn extend(&self, resource: &str, token: &str, ttl: Duration) -> Result<bool, NodeError> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .extend
            .key(resource)
            .arg(token)
            .arg(ttl_ms(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;

        Ok(extended == 1)
    }
}
