//! # Redis Coordination Store
//!
//! `SET NX PX` for claims, `SET PX` / `GET` / `DEL` for plain access and Lua
//! scripts for the compare-and-* operations so the read and the write happen
//! atomically on the server.

use super::{KvError, KvStore};
use crate::config::RedisConfig;
use crate::messaging::keys::KeySpace;
use crate::messaging::providers::redis_streams::redact_url;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Lua scripts for atomic compare-and-* operations
mod scripts {
    use redis::Script;

    pub fn compare_and_delete() -> Script {
        Script::new(
            r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            end
            return 0
            "#,
        )
    }

    pub fn compare_and_expire() -> Script {
        Script::new(
            r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('PEXPIRE', KEYS[1], ARGV[2])
            end
            return 0
            "#,
        )
    }
}

#[derive(Clone)]
pub struct RedisKvStore {
    connection_manager: ConnectionManager,
    keys: KeySpace,
    compare_and_delete: Arc<Script>,
    compare_and_expire: Arc<Script>,
    disconnected: Arc<AtomicBool>,
}

impl std::fmt::Debug for RedisKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKvStore")
            .field("connection_manager", &"ConnectionManager")
            .field("keys", &self.keys)
            .finish()
    }
}

impl RedisKvStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self, KvError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| KvError::connection(format!("Failed to create Redis client: {e}")))?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::connection(format!("Failed to connect to Redis: {e}")))?;

        info!(url = %redact_url(&config.url), "Redis coordination store connected");

        Ok(Self {
            connection_manager,
            keys: KeySpace::new(config.tenant.clone()),
            compare_and_delete: Arc::new(scripts::compare_and_delete()),
            compare_and_expire: Arc::new(scripts::compare_and_expire()),
            disconnected: Arc::new(AtomicBool::new(false)),
        })
    }

    fn connection(&self) -> Result<ConnectionManager, KvError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(KvError::Disconnected);
        }
        Ok(self.connection_manager.clone())
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.connection()?;
        redis::cmd("GET")
            .arg(self.keys.apply(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::command("GET", e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.connection()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.keys.apply(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|e| KvError::command("SET", e.to_string()))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.connection()?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.keys.apply(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::command("SET NX", e.to_string()))?;

        let claimed = reply.is_some();
        debug!(key = %key, claimed, "SET NX");
        Ok(claimed)
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.connection()?;
        let removed: u64 = redis::cmd("DEL")
            .arg(self.keys.apply(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::command("DEL", e.to_string()))?;
        Ok(removed > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let mut conn = self.connection()?;
        let removed: i64 = self
            .compare_and_delete
            .key(self.keys.apply(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| KvError::command("compare_and_delete", e.to_string()))?;
        Ok(removed == 1)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        let mut conn = self.connection()?;
        let updated: i64 = self
            .compare_and_expire
            .key(self.keys.apply(key))
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| KvError::command("compare_and_expire", e.to_string()))?;
        Ok(updated == 1)
    }

    async fn disconnect(&self) -> Result<(), KvError> {
        self.disconnected.store(true, Ordering::SeqCst);
        info!("Redis coordination store disconnected");
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }
}
