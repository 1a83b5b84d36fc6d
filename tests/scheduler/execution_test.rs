use super::{Fleet, DISPATCH, EVENTS};
use crate::common::{eventually, fast_retry, utc};
use foreman_core::scheduler::{
    ExecutionStatus, Executor, HandlerRegistry, JobContext, JobHandlerError, JobSpec, JobStatus,
    SchedulerEventPublisher,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn executor(fleet: &Fleet, registry: Arc<HandlerRegistry>) -> Arc<Executor> {
    Arc::new(Executor::new(
        Arc::new(fleet.store.clone()),
        registry,
        SchedulerEventPublisher::new(Arc::new(fleet.bus.clone()), EVENTS),
        Arc::new(fleet.clock.clone()),
        Arc::new(fleet.kv.clone()),
        fast_retry(1),
    ))
}

fn event_types(fleet: &Fleet) -> Vec<String> {
    fleet
        .bus
        .published(EVENTS)
        .iter()
        .filter_map(|e| e.payload["type"].as_str().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_one_time_job_runs_through_executor() {
    let fleet = Fleet::starting_at(utc(2026, 5, 4, 9, 0));
    let registry = Arc::new(HandlerRegistry::new());
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    registry
        .register_fn("flaky", move |ctx: JobContext| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(JobHandlerError::from("agent busy"));
                }
                Ok(json!({"attempt": ctx.attempt, "echo": ctx.payload}))
            }
        })
        .unwrap();

    let executor = executor(&fleet, registry);
    let subscription = executor
        .start(&fleet.bus, DISPATCH, "foreman-executor")
        .await
        .unwrap();

    let at = utc(2026, 5, 4, 9, 5);
    let job = fleet
        .scheduler
        .schedule(
            JobSpec::once("reindex", at, "flaky")
                .with_payload(json!({"index": "docs"}))
                .with_max_retries(2),
        )
        .await
        .unwrap();

    fleet.clock.set(at);
    assert_eq!(fleet.dispatcher("replica-0").tick().await.unwrap().dispatched, 1);

    let scheduler = Arc::clone(&fleet.scheduler);
    let job_id = job.id;
    assert!(
        eventually(Duration::from_secs(2), move || {
            let scheduler = Arc::clone(&scheduler);
            async move {
                scheduler
                    .get_job(job_id)
                    .await
                    .unwrap()
                    .is_some_and(|job| job.executions_count == 1)
            }
        })
        .await
    );

    let stored = fleet.scheduler.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);

    let executions = fleet.scheduler.list_executions(job.id).await.unwrap();
    let mut attempts: Vec<(u32, ExecutionStatus)> =
        executions.iter().map(|e| (e.attempt, e.status)).collect();
    attempts.sort_by_key(|(attempt, _)| *attempt);
    assert_eq!(
        attempts,
        vec![
            (1, ExecutionStatus::Failed),
            (2, ExecutionStatus::Failed),
            (3, ExecutionStatus::Success),
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let types = event_types(&fleet);
    assert_eq!(
        types
            .iter()
            .filter(|t| *t == "execution.retry_scheduled")
            .count(),
        2
    );
    assert!(types.iter().any(|t| t == "execution.success"));

    // Redelivery of the same dispatch is absorbed
    let envelope = fleet.bus.published(DISPATCH).remove(0);
    executor.handle_dispatch(envelope).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    subscription.unsubscribe().await;
}

#[tokio::test]
async fn test_missing_handler_fails_one_time_job() {
    let fleet = Fleet::starting_at(utc(2026, 5, 4, 9, 0));
    let executor = executor(&fleet, Arc::new(HandlerRegistry::new()));
    let subscription = executor
        .start(&fleet.bus, DISPATCH, "foreman-executor")
        .await
        .unwrap();

    let at = utc(2026, 5, 4, 9, 1);
    let job = fleet
        .scheduler
        .schedule_once("orphan", at, "nobody.home", Value::Null)
        .await
        .unwrap();
    fleet.clock.set(at);
    fleet.dispatcher("replica-0").tick().await.unwrap();

    let scheduler = Arc::clone(&fleet.scheduler);
    let job_id = job.id;
    assert!(
        eventually(Duration::from_secs(2), move || {
            let scheduler = Arc::clone(&scheduler);
            async move {
                scheduler
                    .get_job(job_id)
                    .await
                    .unwrap()
                    .is_some_and(|job| job.status == JobStatus::Failed)
            }
        })
        .await
    );

    let executions = fleet.scheduler.list_executions(job.id).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Failed);
    assert!(executions[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("nobody.home")));
    assert!(!event_types(&fleet).iter().any(|t| t == "execution.retry_scheduled"));

    // The failure record outlives the job
    assert!(fleet.scheduler.unschedule(job.id).await.unwrap());
    let history = fleet.scheduler.list_executions(job.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].error, executions[0].error);

    subscription.unsubscribe().await;
}
