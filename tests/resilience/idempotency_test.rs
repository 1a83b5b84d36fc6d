use foreman_core::kv::{InMemoryKvStore, KvStore};
use foreman_core::resilience::{once, OnceError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_concurrent_deliveries_run_once() {
    let kv = Arc::new(InMemoryKvStore::new());
    let runs = Arc::new(AtomicU32::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let kv = Arc::clone(&kv);
        let runs = Arc::clone(&runs);
        tasks.push(tokio::spawn(async move {
            let result: Result<Option<u32>, OnceError<String>> =
                once(kv.as_ref(), "process:wf-1:build", TTL, || async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(runs.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await;
            result.unwrap()
        }));
    }

    let mut ran = 0;
    for task in tasks {
        if task.await.unwrap().is_some() {
            ran += 1;
        }
    }
    assert_eq!(ran, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let marker = kv.get("once:process:wf-1:build").await.unwrap().unwrap();
    assert!(marker.starts_with("done:"));
}

#[tokio::test]
async fn test_failure_releases_claim_for_next_delivery() {
    let kv = InMemoryKvStore::new();

    let failed: Result<Option<()>, OnceError<&str>> =
        once(&kv, "process:wf-2:deploy", TTL, || async { Err("agent crashed") }).await;
    assert!(matches!(failed, Err(OnceError::Operation("agent crashed"))));
    assert_eq!(kv.get("once:process:wf-2:deploy").await.unwrap(), None);

    let retried: Result<Option<&str>, OnceError<&str>> =
        once(&kv, "process:wf-2:deploy", TTL, || async { Ok("deployed") }).await;
    assert_eq!(retried.unwrap(), Some("deployed"));
}
