//! Daylight-saving transitions in America/New_York during 2026:
//! clocks spring forward 2026-03-08 02:00 and fall back 2026-11-01 02:00.

use super::Fleet;
use crate::common::utc;
use foreman_core::scheduler::JobSpec;

#[tokio::test]
async fn test_time_in_spring_forward_gap_fires_after_gap() {
    let fleet = Fleet::starting_at(utc(2026, 3, 7, 12, 0));
    let job = fleet
        .scheduler
        .schedule(JobSpec::cron("nightly", "30 2 * * *", "reports.nightly").with_timezone("America/New_York"))
        .await
        .unwrap();

    // 02:30 does not exist on the 8th; 03:00 EDT is the first valid instant
    assert_eq!(job.next_run, Some(utc(2026, 3, 8, 7, 0)));

    fleet.clock.set(utc(2026, 3, 8, 7, 0));
    assert_eq!(fleet.dispatcher("replica-0").tick().await.unwrap().dispatched, 1);

    let job = fleet.scheduler.get_job(job.id).await.unwrap().unwrap();
    // 02:30 EDT on the 9th
    assert_eq!(job.next_run, Some(utc(2026, 3, 9, 6, 30)));
}

#[tokio::test]
async fn test_ambiguous_time_fires_once() {
    let fleet = Fleet::starting_at(utc(2026, 10, 31, 12, 0));
    let job = fleet
        .scheduler
        .schedule(JobSpec::cron("nightly", "30 1 * * *", "reports.nightly").with_timezone("America/New_York"))
        .await
        .unwrap();

    // First occurrence of 01:30, still EDT
    assert_eq!(job.next_run, Some(utc(2026, 11, 1, 5, 30)));

    fleet.clock.set(utc(2026, 11, 1, 5, 30));
    let dispatcher = fleet.dispatcher("replica-0");
    assert_eq!(dispatcher.tick().await.unwrap().dispatched, 1);

    // The repeated 01:30 EST hour is skipped
    let job = fleet.scheduler.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.next_run, Some(utc(2026, 11, 2, 6, 30)));

    fleet.clock.set(utc(2026, 11, 1, 6, 30));
    assert_eq!(dispatcher.tick().await.unwrap().due, 0);
}

#[tokio::test]
async fn test_default_timezone_is_utc() {
    let fleet = Fleet::starting_at(utc(2026, 3, 7, 12, 0));
    let job = fleet
        .scheduler
        .schedule(JobSpec::cron("nightly", "30 2 * * *", "reports.nightly"))
        .await
        .unwrap();
    assert_eq!(job.timezone, "UTC");
    assert_eq!(job.next_run, Some(utc(2026, 3, 8, 2, 30)));
}
