//! Shared wiring for integration tests

use chrono::{DateTime, TimeZone, Utc};
use foreman_core::kv::InMemoryKvStore;
use foreman_core::messaging::InMemoryMessageBus;
use foreman_core::resilience::RetryPolicy;
use std::future::Future;
use std::time::Duration;

/// Inner retry policy with millisecond delays and no jitter
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
        .with_jitter(0.0)
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// In-memory bus and coordination store pair
pub fn ports() -> (InMemoryMessageBus, InMemoryKvStore) {
    (InMemoryMessageBus::new(), InMemoryKvStore::new())
}

/// Poll `check` every 10ms until it holds or `timeout` lapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
