use super::{Fleet, DISPATCH};
use crate::common::utc;
use foreman_core::scheduler::{JobDispatch, JobSpec, JobStatus};
use std::sync::Arc;

#[tokio::test]
async fn test_five_replicas_dispatch_each_due_job_once() {
    let fleet = Fleet::starting_at(utc(2026, 3, 2, 8, 0));
    let mut job_ids = Vec::new();
    for n in 0..3 {
        let job = fleet
            .scheduler
            .schedule(JobSpec::cron(format!("sync-{n}"), "*/15 * * * *", "sync"))
            .await
            .unwrap();
        job_ids.push(job.id);
    }
    fleet.clock.advance(chrono::Duration::minutes(15));

    let replicas: Vec<_> = (0..5)
        .map(|n| Arc::new(fleet.dispatcher(&format!("replica-{n}"))))
        .collect();
    let ticks = replicas.iter().map(|d| {
        let d = Arc::clone(d);
        tokio::spawn(async move { d.tick().await })
    });
    let reports: Vec<_> = futures::future::join_all(ticks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let dispatched: usize = reports.iter().map(|r| r.dispatched).sum();
    assert_eq!(dispatched, 3);
    assert!(reports.iter().all(|r| r.failed == 0));

    let mut seen: Vec<_> = fleet
        .bus
        .published(DISPATCH)
        .iter()
        .map(|e| e.decode_payload::<JobDispatch>().unwrap().job_id)
        .collect();
    seen.sort();
    job_ids.sort();
    assert_eq!(seen, job_ids);

    for id in job_ids {
        let job = fleet.scheduler.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.next_run, Some(utc(2026, 3, 2, 8, 30)));
    }
    assert!(fleet.kv.keys().is_empty());
}

#[tokio::test]
async fn test_paused_then_cancelled_job_never_dispatches() {
    let fleet = Fleet::starting_at(utc(2026, 3, 2, 8, 0));
    let job = fleet
        .scheduler
        .schedule(JobSpec::cron("hourly", "0 * * * *", "sync"))
        .await
        .unwrap();
    let dispatcher = fleet.dispatcher("replica-0");

    fleet.scheduler.pause_job(job.id).await.unwrap();
    fleet.clock.advance(chrono::Duration::hours(2));
    assert_eq!(dispatcher.tick().await.unwrap().dispatched, 0);

    let cancelled = fleet.scheduler.cancel_job(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.next_run, None);
    assert_eq!(dispatcher.tick().await.unwrap().dispatched, 0);
    assert!(fleet.bus.published(DISPATCH).is_empty());
}
