//! # Dispatcher
//!
//! Finds due jobs and hands them to executors through the job-dispatch
//! topic. Every dispatch holds the per-job lock `lock:job:<id>`, so replicas
//! ticking at the same moment dispatch each due job once.
//!
//! Per due job:
//!
//! 1. acquire the job lock (renewed while held)
//! 2. re-read the job and re-check it is still active and due
//! 3. publish a [`JobDispatch`] envelope
//! 4. advance `nextRun` (cron) or mark the job `completed` (one-time, event)
//! 5. emit `job.dispatch` and release the lock

use super::cron_schedule::{parse_timezone, CronSchedule};
use super::errors::SchedulerError;
use super::events::SchedulerEventPublisher;
use super::job::{DispatchReason, JobDispatch, JobKind, JobStatus, ScheduledJob};
use super::store::{modify_job, JobStore};
use crate::constants::scheduler_events;
use crate::kv::DistributedLock;
use crate::logging::log_job_operation;
use crate::messaging::{create_envelope, publish_envelope, MessageBus};
use crate::utils::clock::Clock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_BATCH_SIZE: usize = 100;

/// Counts for one [`Dispatcher::tick`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub dispatched: usize,
    /// Another replica held the job lock
    pub contended: usize,
    /// No longer active or due once the lock was held
    pub stale: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched { dispatch_id: Uuid },
    Contended,
    Stale,
}

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    bus: Arc<dyn MessageBus>,
    lock: DistributedLock,
    events: SchedulerEventPublisher,
    clock: Arc<dyn Clock>,
    dispatch_topic: String,
    batch_size: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("lock", &self.lock)
            .field("dispatch_topic", &self.dispatch_topic)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        bus: Arc<dyn MessageBus>,
        lock: DistributedLock,
        events: SchedulerEventPublisher,
        clock: Arc<dyn Clock>,
        dispatch_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bus,
            lock,
            events,
            clock,
            dispatch_topic: dispatch_topic.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn dispatch_topic(&self) -> &str {
        &self.dispatch_topic
    }

    /// Dispatch every job that is due now
    pub async fn tick(&self) -> Result<TickReport, SchedulerError> {
        let now = self.clock.now();
        let due = self.store.due(now, self.batch_size).await?;
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        for job in due {
            match self.dispatch(job.id, now, DispatchReason::Schedule).await {
                Ok(DispatchOutcome::Dispatched { .. }) => report.dispatched += 1,
                Ok(DispatchOutcome::Contended) => report.contended += 1,
                Ok(DispatchOutcome::Stale) => report.stale += 1,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Dispatch failed");
                    report.failed += 1;
                }
            }
        }

        if report.due > 0 {
            debug!(?report, "Dispatcher tick");
        }
        Ok(report)
    }

    /// Dispatch an active job now, leaving its schedule untouched
    pub async fn trigger(
        &self,
        job_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<DispatchOutcome, SchedulerError> {
        let reason = DispatchReason::Trigger {
            reason: reason.into(),
        };
        self.dispatch(job_id, self.clock.now(), reason).await
    }

    /// Tick every `interval` until `shutdown` turns true or its sender drops
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = interval.as_millis() as u64, holder = %self.lock.holder_id(), "Dispatcher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Dispatcher tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Dispatcher stopped");
    }

    async fn dispatch(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
        reason: DispatchReason,
    ) -> Result<DispatchOutcome, SchedulerError> {
        let Some(guard) = self.lock.try_acquire(&format!("job:{job_id}")).await? else {
            debug!(job_id = %job_id, "Job lock held elsewhere");
            return Ok(DispatchOutcome::Contended);
        };

        let result = self.dispatch_locked(job_id, now, reason).await;
        if let Err(e) = guard.release().await {
            warn!(job_id = %job_id, error = %e, "Failed to release job lock");
        }
        result
    }

    async fn dispatch_locked(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
        reason: DispatchReason,
    ) -> Result<DispatchOutcome, SchedulerError> {
        let job = match (self.store.get(job_id).await?, &reason) {
            (Some(job), _) => job,
            (None, DispatchReason::Schedule) => return Ok(DispatchOutcome::Stale),
            (None, DispatchReason::Trigger { .. }) => {
                return Err(SchedulerError::JobNotFound { job_id })
            }
        };

        let eligible = match reason {
            DispatchReason::Schedule => job.is_due(now),
            DispatchReason::Trigger { .. } => job.status == JobStatus::Active,
        };
        if !eligible {
            debug!(job_id = %job_id, status = %job.status, "Job no longer eligible for dispatch");
            return Ok(DispatchOutcome::Stale);
        }

        let dispatch = JobDispatch::for_job(&job, reason.clone(), now);
        let envelope = create_envelope(
            self.dispatch_topic.clone(),
            dispatch,
            Some(job.id.to_string()),
            None,
        );
        publish_envelope(self.bus.as_ref(), &envelope).await?;

        if reason == DispatchReason::Schedule {
            let scheduled_for = job.next_run;
            modify_job(self.store.as_ref(), job_id, now, |job| {
                if job.status != JobStatus::Active || job.next_run != scheduled_for {
                    return Ok(false);
                }
                advance(job, now)?;
                job.last_run = Some(now);
                Ok(true)
            })
            .await?;
        }

        log_job_operation(
            scheduler_events::JOB_DISPATCH,
            Some(&job.id.to_string()),
            None,
            "dispatched",
            Some(&envelope.id.to_string()),
        );
        self.events
            .publish(
                scheduler_events::JOB_DISPATCH,
                job.id,
                None,
                json!({
                    "dispatchId": envelope.id,
                    "reason": reason,
                    "scheduledFor": envelope.payload.scheduled_for,
                }),
            )
            .await;

        Ok(DispatchOutcome::Dispatched {
            dispatch_id: envelope.id,
        })
    }
}

/// Move `nextRun` past `now` for cron jobs; finish one-shot jobs
fn advance(job: &mut ScheduledJob, now: DateTime<Utc>) -> Result<(), SchedulerError> {
    match (job.kind, job.schedule.as_deref()) {
        (JobKind::Cron, Some(expression)) => {
            let cron = CronSchedule::parse(expression)?;
            let tz = parse_timezone(&job.timezone)?;
            let reference = job.next_run.map_or(now, |next| next.max(now));
            job.next_run = cron.next_after(reference, tz);
            if job.next_run.is_none() {
                job.status = JobStatus::Completed;
            }
        }
        _ => {
            job.status = JobStatus::Completed;
            job.next_run = None;
        }
    }
    Ok(())
}
