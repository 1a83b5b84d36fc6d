use super::errors::SchedulerError;
use super::execution::JobExecution;
use super::job::{JobFilter, JobStatus, ScheduledJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Read-modify-write attempts before a version conflict is returned
const MAX_CONFLICT_RETRIES: u32 = 3;

/// Store of record for scheduled jobs and their executions
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    async fn create(&self, job: &ScheduledJob) -> Result<(), SchedulerError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<ScheduledJob>, SchedulerError>;

    /// Replace the stored job if its version is still `expected_version`
    async fn save(&self, job: &ScheduledJob, expected_version: i64) -> Result<(), SchedulerError>;

    /// Remove the job; its execution history is kept
    async fn delete(&self, job_id: Uuid) -> Result<bool, SchedulerError>;

    async fn list(&self, filter: &JobFilter) -> Result<Vec<ScheduledJob>, SchedulerError>;

    /// Active jobs with `nextRun <= now`, highest priority first, then oldest `nextRun`
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledJob>, SchedulerError>;

    /// Insert or replace by `execution_id`
    async fn record_execution(&self, execution: &JobExecution) -> Result<(), SchedulerError>;

    /// Executions of a job in start order
    async fn list_executions(&self, job_id: Uuid) -> Result<Vec<JobExecution>, SchedulerError>;
}

impl std::fmt::Debug for dyn JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JobStore")
    }
}

/// Re-read `job_id`, let `apply` change it, and save with compare-and-swap,
/// retrying on version conflicts. `apply` returns `false` to leave the job
/// untouched. Returns the job as stored afterwards.
pub async fn modify_job<F>(
    store: &dyn JobStore,
    job_id: Uuid,
    now: DateTime<Utc>,
    mut apply: F,
) -> Result<ScheduledJob, SchedulerError>
where
    F: FnMut(&mut ScheduledJob) -> Result<bool, SchedulerError> + Send,
{
    let mut conflicts = 0;
    loop {
        let mut job = store
            .get(job_id)
            .await?
            .ok_or(SchedulerError::JobNotFound { job_id })?;
        let expected_version = job.version;

        if !apply(&mut job)? {
            return Ok(job);
        }
        job.version = expected_version + 1;
        job.updated_at = now;

        match store.save(&job, expected_version).await {
            Ok(()) => return Ok(job),
            Err(SchedulerError::ConcurrentModification { .. }) if conflicts < MAX_CONFLICT_RETRIES => {
                conflicts += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<DashMap<Uuid, ScheduledJob>>,
    executions: Arc<DashMap<Uuid, Vec<JobExecution>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &ScheduledJob) -> Result<(), SchedulerError> {
        use dashmap::mapref::entry::Entry;
        match self.jobs.entry(job.id) {
            Entry::Occupied(_) => Err(SchedulerError::validation(format!(
                "job {} already exists",
                job.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ScheduledJob>, SchedulerError> {
        Ok(self.jobs.get(&job_id).map(|job| job.clone()))
    }

    async fn save(&self, job: &ScheduledJob, expected_version: i64) -> Result<(), SchedulerError> {
        let mut stored = self
            .jobs
            .get_mut(&job.id)
            .ok_or(SchedulerError::JobNotFound { job_id: job.id })?;
        if stored.version != expected_version {
            return Err(SchedulerError::ConcurrentModification {
                job_id: job.id,
                expected_version,
            });
        }
        *stored = job.clone();
        Ok(())
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool, SchedulerError> {
        Ok(self.jobs.remove(&job_id).is_some())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<ScheduledJob>, SchedulerError> {
        let mut jobs: Vec<ScheduledJob> = self
            .jobs
            .iter()
            .filter(|job| filter.matches(job))
            .map(|job| job.clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledJob>, SchedulerError> {
        let mut due: Vec<ScheduledJob> = self
            .jobs
            .iter()
            .filter(|job| job.status == JobStatus::Active && job.is_due(now))
            .map(|job| job.clone())
            .collect();
        due.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.next_run.cmp(&b.next_run)));
        due.truncate(limit);
        Ok(due)
    }

    async fn record_execution(&self, execution: &JobExecution) -> Result<(), SchedulerError> {
        let mut executions = self.executions.entry(execution.job_id).or_default();
        match executions
            .iter()
            .position(|e| e.execution_id == execution.execution_id)
        {
            Some(index) => executions[index] = execution.clone(),
            None => executions.push(execution.clone()),
        }
        Ok(())
    }

    async fn list_executions(&self, job_id: Uuid) -> Result<Vec<JobExecution>, SchedulerError> {
        let mut executions = self
            .executions
            .get(&job_id)
            .map(|e| e.clone())
            .unwrap_or_default();
        executions.sort_by_key(|e| (e.started_at, e.attempt));
        Ok(executions)
    }
}
