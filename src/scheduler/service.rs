//! # Job Scheduler Service
//!
//! Owns the job registry: validates and persists jobs, computes `nextRun`,
//! and emits `job.*` lifecycle events. Dispatch and execution live in
//! [`super::Dispatcher`] and [`super::Executor`].
//!
//! Pausing and resuming only flip `status`. The dispatcher only picks up
//! `active` jobs, so a paused job stays invisible to dispatch until resumed
//! and keeps its `nextRun`.

use super::cron_schedule::{parse_timezone, CronSchedule};
use super::errors::SchedulerError;
use super::events::SchedulerEventPublisher;
use super::execution::JobExecution;
use super::job::{
    JobFilter, JobKind, JobSpec, JobStatus, JobUpdate, ScheduledJob, DEFAULT_JOB_MAX_RETRIES,
    DEFAULT_JOB_TIMEOUT_MS,
};
use super::store::{modify_job, JobStore};
use crate::constants::{scheduler_events, ONE_TIME_PAST_TOLERANCE};
use crate::logging::log_job_operation;
use crate::utils::clock::Clock;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobScheduler {
    store: Arc<dyn JobStore>,
    events: SchedulerEventPublisher,
    clock: Arc<dyn Clock>,
    default_timezone: String,
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("events", &self.events)
            .field("default_timezone", &self.default_timezone)
            .finish()
    }
}

impl JobScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        events: SchedulerEventPublisher,
        clock: Arc<dyn Clock>,
        default_timezone: impl Into<String>,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            default_timezone: default_timezone.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn events(&self) -> &SchedulerEventPublisher {
        &self.events
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Validate, compute the first `nextRun`, persist and emit `job.created`
    pub async fn schedule(&self, spec: JobSpec) -> Result<ScheduledJob, SchedulerError> {
        let now = self.clock.now();
        let timezone = spec
            .timezone
            .clone()
            .unwrap_or_else(|| self.default_timezone.clone());

        validate_spec(&spec)?;
        let next_run = first_run(
            spec.kind,
            spec.schedule.as_deref(),
            spec.execute_at,
            &timezone,
            now,
        )?;

        let job = ScheduledJob {
            id: Uuid::new_v4(),
            name: spec.name,
            kind: spec.kind,
            schedule: spec.schedule.map(|s| s.trim().to_string()),
            execute_at: spec.execute_at,
            timezone,
            handler_name: spec.handler_name,
            handler_type: spec.handler_type,
            payload: spec.payload,
            max_retries: spec.max_retries.unwrap_or(DEFAULT_JOB_MAX_RETRIES),
            timeout_ms: spec.timeout_ms.unwrap_or(DEFAULT_JOB_TIMEOUT_MS),
            priority: spec.priority,
            status: JobStatus::Active,
            next_run: Some(next_run),
            last_run: None,
            executions_count: 0,
            tags: spec.tags,
            owner_scope: spec.owner_scope,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        self.store.create(&job).await?;
        info!(
            job_id = %job.id,
            name = %job.name,
            kind = job.kind.as_str(),
            next_run = %next_run,
            timezone = %job.timezone,
            "Job scheduled"
        );
        self.emit(scheduler_events::JOB_CREATED, &job).await;
        Ok(job)
    }

    /// Schedule a one-time job at `execute_at`
    pub async fn schedule_once(
        &self,
        name: impl Into<String>,
        execute_at: DateTime<Utc>,
        handler_name: impl Into<String>,
        payload: Value,
    ) -> Result<ScheduledJob, SchedulerError> {
        self.schedule(JobSpec::once(name, execute_at, handler_name).with_payload(payload))
            .await
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<ScheduledJob>, SchedulerError> {
        self.store.get(job_id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<ScheduledJob>, SchedulerError> {
        self.store.list(filter).await
    }

    pub async fn list_executions(&self, job_id: Uuid) -> Result<Vec<JobExecution>, SchedulerError> {
        self.store.list_executions(job_id).await
    }

    /// Apply a partial update; `nextRun` is recomputed when the timing changes
    pub async fn update_job(
        &self,
        job_id: Uuid,
        update: JobUpdate,
    ) -> Result<ScheduledJob, SchedulerError> {
        let now = self.clock.now();
        let job = modify_job(self.store.as_ref(), job_id, now, |job| {
            if job.status.is_terminal() {
                return Err(SchedulerError::validation(format!(
                    "job {} is {} and cannot be updated",
                    job.id, job.status
                )));
            }
            apply_update(job, &update, now)?;
            Ok(true)
        })
        .await?;

        self.emit(scheduler_events::JOB_UPDATED, &job).await;
        Ok(job)
    }

    pub async fn pause_job(&self, job_id: Uuid) -> Result<ScheduledJob, SchedulerError> {
        self.set_status(job_id, JobStatus::Active, JobStatus::Paused, scheduler_events::JOB_PAUSED)
            .await
    }

    pub async fn resume_job(&self, job_id: Uuid) -> Result<ScheduledJob, SchedulerError> {
        self.set_status(job_id, JobStatus::Paused, JobStatus::Active, scheduler_events::JOB_RESUMED)
            .await
    }

    /// Stop a job for good, keeping it and its executions for inspection
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<ScheduledJob, SchedulerError> {
        let job = modify_job(self.store.as_ref(), job_id, self.clock.now(), |job| {
            if job.status.is_terminal() {
                return Err(SchedulerError::validation(format!(
                    "job {} is already {}",
                    job.id, job.status
                )));
            }
            job.status = JobStatus::Cancelled;
            job.next_run = None;
            Ok(true)
        })
        .await?;
        self.emit(scheduler_events::JOB_CANCELLED, &job).await;
        Ok(job)
    }

    /// Delete a job. Its execution history stays readable through
    /// [`list_executions`](Self::list_executions).
    pub async fn unschedule(&self, job_id: Uuid) -> Result<bool, SchedulerError> {
        let Some(job) = self.store.get(job_id).await? else {
            return Ok(false);
        };
        let deleted = self.store.delete(job_id).await?;
        if deleted {
            self.emit(scheduler_events::JOB_DELETED, &job).await;
        }
        Ok(deleted)
    }

    async fn set_status(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
        event: &str,
    ) -> Result<ScheduledJob, SchedulerError> {
        let job = modify_job(self.store.as_ref(), job_id, self.clock.now(), |job| {
            if job.status != from {
                return Err(SchedulerError::validation(format!(
                    "job {} is {}, expected {}",
                    job.id, job.status, from
                )));
            }
            job.status = to;
            Ok(true)
        })
        .await?;
        self.emit(event, &job).await;
        Ok(job)
    }

    async fn emit(&self, event: &str, job: &ScheduledJob) {
        log_job_operation(
            event,
            Some(&job.id.to_string()),
            None,
            job.status.as_str(),
            None,
        );
        self.events
            .publish(
                event,
                job.id,
                None,
                json!({
                    "name": job.name,
                    "kind": job.kind,
                    "status": job.status,
                    "nextRun": job.next_run,
                }),
            )
            .await;
    }
}

fn validate_spec(spec: &JobSpec) -> Result<(), SchedulerError> {
    if spec.name.trim().is_empty() {
        return Err(SchedulerError::validation("job name must not be empty"));
    }
    if spec.handler_name.trim().is_empty() {
        return Err(SchedulerError::validation("handler name must not be empty"));
    }
    if spec.timeout_ms == Some(0) {
        return Err(SchedulerError::validation("timeoutMs must be greater than 0"));
    }
    match (spec.kind, &spec.schedule, &spec.execute_at) {
        (JobKind::Cron, Some(_), None) => Ok(()),
        (JobKind::OneTime | JobKind::Event, None, Some(_)) => Ok(()),
        (_, Some(_), Some(_)) => Err(SchedulerError::validation(
            "exactly one of schedule and executeAt may be set",
        )),
        (JobKind::Cron, _, _) => Err(SchedulerError::validation("cron jobs require a schedule")),
        _ => Err(SchedulerError::validation(format!(
            "{} jobs require executeAt",
            spec.kind.as_str()
        ))),
    }
}

fn first_run(
    kind: JobKind,
    schedule: Option<&str>,
    execute_at: Option<DateTime<Utc>>,
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, SchedulerError> {
    let tz = parse_timezone(timezone)?;
    match (kind, schedule, execute_at) {
        (JobKind::Cron, Some(expression), _) => {
            let cron = CronSchedule::parse(expression)?;
            cron.next_after(now, tz).ok_or_else(|| {
                SchedulerError::validation(format!("cron expression '{expression}' never fires"))
            })
        }
        (_, _, Some(at)) => {
            let tolerance = chrono::Duration::from_std(ONE_TIME_PAST_TOLERANCE)
                .unwrap_or_else(|_| chrono::Duration::seconds(5));
            if at < now - tolerance {
                return Err(SchedulerError::validation(format!(
                    "executeAt {at} is in the past"
                )));
            }
            Ok(at)
        }
        _ => Err(SchedulerError::validation("job has no timing")),
    }
}

fn apply_update(
    job: &mut ScheduledJob,
    update: &JobUpdate,
    now: DateTime<Utc>,
) -> Result<(), SchedulerError> {
    if let Some(name) = &update.name {
        if name.trim().is_empty() {
            return Err(SchedulerError::validation("job name must not be empty"));
        }
        job.name = name.clone();
    }
    if let Some(handler_name) = &update.handler_name {
        if handler_name.trim().is_empty() {
            return Err(SchedulerError::validation("handler name must not be empty"));
        }
        job.handler_name = handler_name.clone();
    }
    if let Some(payload) = &update.payload {
        job.payload = payload.clone();
    }
    if let Some(max_retries) = update.max_retries {
        job.max_retries = max_retries;
    }
    if let Some(timeout_ms) = update.timeout_ms {
        if timeout_ms == 0 {
            return Err(SchedulerError::validation("timeoutMs must be greater than 0"));
        }
        job.timeout_ms = timeout_ms;
    }
    if let Some(priority) = update.priority {
        job.priority = priority;
    }
    if let Some(tags) = &update.tags {
        job.tags = tags.clone();
    }

    if update.changes_timing() {
        match job.kind {
            JobKind::Cron if update.execute_at.is_some() => {
                return Err(SchedulerError::validation("cron jobs cannot take executeAt"));
            }
            JobKind::OneTime | JobKind::Event if update.schedule.is_some() => {
                return Err(SchedulerError::validation(format!(
                    "{} jobs cannot take a schedule",
                    job.kind.as_str()
                )));
            }
            _ => {}
        }
        if let Some(schedule) = &update.schedule {
            job.schedule = Some(schedule.trim().to_string());
        }
        if let Some(execute_at) = update.execute_at {
            job.execute_at = Some(execute_at);
        }
        if let Some(timezone) = &update.timezone {
            job.timezone = timezone.clone();
        }
        job.next_run = Some(first_run(
            job.kind,
            job.schedule.as_deref(),
            job.execute_at,
            &job.timezone,
            now,
        )?);
    }
    Ok(())
}
