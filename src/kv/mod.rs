//! # Coordination Store
//!
//! Key-value port for short-lived coordination state: dedup markers,
//! idempotency markers and lock holder/token pairs. Every key the core
//! writes is TTL-bounded so a crashed writer self-heals once the TTL lapses.
//! Nothing here is a system of record.

pub mod in_memory;
pub mod lock;
pub mod redis;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use self::in_memory::InMemoryKvStore;
pub use self::lock::{DistributedLock, LockGuard, LockOptions};
pub use self::redis::RedisKvStore;

#[derive(Error, Debug, Clone)]
pub enum KvError {
    #[error("KV connection error: {message}")]
    Connection { message: String },

    #[error("KV command failed: {operation}: {message}")]
    Command { operation: String, message: String },

    #[error("KV store is disconnected")]
    Disconnected,
}

impl KvError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn command(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Unconditional write; `None` keeps the key until deleted
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Atomic claim: writes only when the key is absent, returns whether it did
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// Delete only while the key still holds `expected`
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, KvError>;

    /// Reset the TTL only while the key still holds `expected`
    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, KvError>;

    async fn disconnect(&self) -> Result<(), KvError>;

    fn provider_name(&self) -> &'static str;
}

impl std::fmt::Debug for dyn KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KvStore({})", self.provider_name())
    }
}
