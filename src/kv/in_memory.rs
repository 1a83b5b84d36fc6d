//! In-memory coordination store with lazy expiry.

use super::{KvError, KvStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Cloneable handle; clones share the same map
#[derive(Debug, Clone, Default)]
pub struct InMemoryKvStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    disconnected: Arc<AtomicBool>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys, for assertions in tests
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn check_connected(&self) -> Result<(), KvError> {
        if self.disconnected.load(Ordering::SeqCst) {
            Err(KvError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn with_live_entry<R>(&self, key: &str, f: impl FnOnce(Option<&mut Entry>) -> R) -> R {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        f(entries.get_mut(key))
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.check_connected()?;
        Ok(self.with_live_entry(key, |entry| entry.map(|e| e.value.clone())))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        self.check_connected()?;
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        self.check_connected()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        self.check_connected()?;
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        self.check_connected()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let matches = entries
            .get(key)
            .is_some_and(|entry| entry.is_live(now) && entry.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        self.check_connected()?;
        Ok(self.with_live_entry(key, |entry| match entry {
            Some(entry) if entry.value == expected => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            _ => false,
        }))
    }

    async fn disconnect(&self) -> Result<(), KvError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
