//! # Idempotency Guard
//!
//! Exactly-once *effect* on top of an at-least-once transport. [`once`]
//! claims `once:<key>` before running the operation, so a duplicate or
//! concurrent delivery of the same logical operation sees the claim and
//! does nothing.

use crate::kv::{KvError, KvStore};
use crate::messaging::keys::once_key;
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const IN_PROGRESS_PREFIX: &str = "in_progress:";
const DONE_PREFIX: &str = "done:";

#[derive(Error, Debug)]
pub enum OnceError<E> {
    #[error("Idempotency store error: {0}")]
    Store(#[from] KvError),

    #[error("Operation failed: {0}")]
    Operation(E),
}

/// Run `operation` at most once per `key` within `ttl`.
///
/// - `Ok(Some(value))`: this call ran the operation
/// - `Ok(None)`: another delivery already ran it (or is running it)
/// - `Err(Operation)`: the operation failed; the claim is removed so a later
///   attempt can run again
///
/// On success the in-progress claim is replaced with a completion marker
/// that lives for `ttl`.
pub async fn once<T, E, F, Fut>(
    kv: &dyn KvStore,
    key: &str,
    ttl: Duration,
    operation: F,
) -> Result<Option<T>, OnceError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let marker_key = once_key(key);
    let claim = format!("{IN_PROGRESS_PREFIX}{}", Uuid::new_v4());

    if !kv.set_if_absent(&marker_key, &claim, ttl).await? {
        debug!(key = %marker_key, "Idempotency marker present, skipping");
        return Ok(None);
    }

    match operation().await {
        Ok(value) => {
            let done = format!("{DONE_PREFIX}{}", Utc::now().to_rfc3339());
            kv.set(&marker_key, &done, Some(ttl)).await?;
            Ok(Some(value))
        }
        Err(err) => {
            if let Err(e) = kv.compare_and_delete(&marker_key, &claim).await {
                // The claim still expires with its TTL
                warn!(key = %marker_key, error = %e, "Failed to clear idempotency claim");
            }
            Err(OnceError::Operation(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_second_call_is_noop() {
        let kv = InMemoryKvStore::new();
        let runs = AtomicU32::new(0);

        let first: Result<Option<u32>, OnceError<String>> = once(&kv, "process:a", TTL, || async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await;
        let second: Result<Option<u32>, OnceError<String>> = once(&kv, "process:a", TTL, || async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(8)
        })
        .await;

        assert_eq!(first.unwrap(), Some(7));
        assert_eq!(second.unwrap(), None);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let marker = kv.get("once:process:a").await.unwrap().unwrap();
        assert!(marker.starts_with(DONE_PREFIX));
    }

    #[tokio::test]
    async fn test_failure_releases_claim() {
        let kv = InMemoryKvStore::new();

        let failed: Result<Option<u32>, OnceError<&str>> =
            once(&kv, "process:b", TTL, || async { Err("boom") }).await;
        assert!(matches!(failed, Err(OnceError::Operation("boom"))));
        assert_eq!(kv.get("once:process:b").await.unwrap(), None);

        let retried: Result<Option<u32>, OnceError<&str>> =
            once(&kv, "process:b", TTL, || async { Ok(1) }).await;
        assert_eq!(retried.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_calls_run_once() {
        let kv = InMemoryKvStore::new();
        let runs = AtomicU32::new(0);
        let run = || async {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok::<_, String>(())
        };

        let (a, b) = tokio::join!(
            once(&kv, "process:c", TTL, run),
            once(&kv, "process:c", TTL, run)
        );

        let executed = [a.unwrap(), b.unwrap()].iter().filter(|r| r.is_some()).count();
        assert_eq!(executed, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let kv = InMemoryKvStore::new();
        kv.disconnect().await.unwrap();

        let result: Result<Option<()>, OnceError<String>> =
            once(&kv, "process:d", TTL, || async { Ok(()) }).await;
        assert!(matches!(result, Err(OnceError::Store(KvError::Disconnected))));
    }
}
