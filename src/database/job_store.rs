use super::is_unique_violation;
use crate::scheduler::{
    ExecutionStatus, JobExecution, JobFilter, JobPriority, JobStore, SchedulerError, ScheduledJob,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, name, kind, schedule, execute_at, timezone, handler_name, \
     handler_type, payload, max_retries, timeout_ms, priority, status, next_run, last_run, \
     executions_count, tags, owner_scope, created_at, updated_at, version";

const EXECUTION_COLUMNS: &str =
    "execution_id, job_id, attempt, status, started_at, finished_at, error, dispatch_id";

/// [`JobStore`] over `foreman_scheduled_jobs` and `foreman_job_executions`
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn priority_rank(priority: JobPriority) -> i16 {
    match priority {
        JobPriority::Low => 0,
        JobPriority::Medium => 1,
        JobPriority::High => 2,
        JobPriority::Critical => 3,
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, SchedulerError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name).map_err(SchedulerError::store)
}

fn unsigned<T: TryFrom<i64>>(row: &PgRow, name: &str) -> Result<T, SchedulerError> {
    let value: i64 = column(row, name)?;
    T::try_from(value).map_err(|_| SchedulerError::store(format!("{name} out of range: {value}")))
}

fn parsed<T: std::str::FromStr<Err = String>>(row: &PgRow, name: &str) -> Result<T, SchedulerError> {
    let value: String = column(row, name)?;
    value.parse().map_err(SchedulerError::Store)
}

fn job_from_row(row: &PgRow) -> Result<ScheduledJob, SchedulerError> {
    Ok(ScheduledJob {
        id: column(row, "id")?,
        name: column(row, "name")?,
        kind: parsed(row, "kind")?,
        schedule: column(row, "schedule")?,
        execute_at: column(row, "execute_at")?,
        timezone: column(row, "timezone")?,
        handler_name: column(row, "handler_name")?,
        handler_type: column(row, "handler_type")?,
        payload: column(row, "payload")?,
        max_retries: unsigned(row, "max_retries")?,
        timeout_ms: unsigned(row, "timeout_ms")?,
        priority: parsed(row, "priority")?,
        status: parsed(row, "status")?,
        next_run: column(row, "next_run")?,
        last_run: column(row, "last_run")?,
        executions_count: unsigned(row, "executions_count")?,
        tags: column(row, "tags")?,
        owner_scope: column(row, "owner_scope")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
        version: column(row, "version")?,
    })
}

fn execution_from_row(row: &PgRow) -> Result<JobExecution, SchedulerError> {
    let status: ExecutionStatus = parsed(row, "status")?;
    Ok(JobExecution {
        execution_id: column(row, "execution_id")?,
        job_id: column(row, "job_id")?,
        attempt: unsigned(row, "attempt")?,
        status,
        started_at: column(row, "started_at")?,
        finished_at: column(row, "finished_at")?,
        error: column(row, "error")?,
        dispatch_id: column(row, "dispatch_id")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &ScheduledJob) -> Result<(), SchedulerError> {
        let result = sqlx::query(&format!(
            "INSERT INTO foreman_scheduled_jobs ({JOB_COLUMNS}, priority_rank) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
             $19, $20, $21, $22)"
        ))
        .bind(job.id)
        .bind(&job.name)
        .bind(job.kind.as_str())
        .bind(&job.schedule)
        .bind(job.execute_at)
        .bind(&job.timezone)
        .bind(&job.handler_name)
        .bind(&job.handler_type)
        .bind(&job.payload)
        .bind(i64::from(job.max_retries))
        .bind(to_i64(job.timeout_ms))
        .bind(job.priority.as_str())
        .bind(job.status.as_str())
        .bind(job.next_run)
        .bind(job.last_run)
        .bind(to_i64(job.executions_count))
        .bind(&job.tags)
        .bind(&job.owner_scope)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.version)
        .bind(priority_rank(job.priority))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(SchedulerError::validation(format!(
                "job {} already exists",
                job.id
            ))),
            Err(e) => Err(SchedulerError::store(e)),
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ScheduledJob>, SchedulerError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM foreman_scheduled_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::store)?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn save(&self, job: &ScheduledJob, expected_version: i64) -> Result<(), SchedulerError> {
        let result = sqlx::query(
            "UPDATE foreman_scheduled_jobs SET name = $3, schedule = $4, execute_at = $5, \
             timezone = $6, handler_name = $7, handler_type = $8, payload = $9, \
             max_retries = $10, timeout_ms = $11, priority = $12, priority_rank = $13, \
             status = $14, next_run = $15, last_run = $16, executions_count = $17, tags = $18, \
             owner_scope = $19, updated_at = $20, version = $21 \
             WHERE id = $1 AND version = $2",
        )
        .bind(job.id)
        .bind(expected_version)
        .bind(&job.name)
        .bind(&job.schedule)
        .bind(job.execute_at)
        .bind(&job.timezone)
        .bind(&job.handler_name)
        .bind(&job.handler_type)
        .bind(&job.payload)
        .bind(i64::from(job.max_retries))
        .bind(to_i64(job.timeout_ms))
        .bind(job.priority.as_str())
        .bind(priority_rank(job.priority))
        .bind(job.status.as_str())
        .bind(job.next_run)
        .bind(job.last_run)
        .bind(to_i64(job.executions_count))
        .bind(&job.tags)
        .bind(&job.owner_scope)
        .bind(job.updated_at)
        .bind(job.version)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::store)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get(job.id).await? {
            Some(_) => Err(SchedulerError::ConcurrentModification {
                job_id: job.id,
                expected_version,
            }),
            None => Err(SchedulerError::JobNotFound { job_id: job.id }),
        }
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool, SchedulerError> {
        let result = sqlx::query("DELETE FROM foreman_scheduled_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::store)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<ScheduledJob>, SchedulerError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM foreman_scheduled_jobs \
             WHERE ($1::text IS NULL OR status = $1) \
               AND ($2::text IS NULL OR kind = $2) \
               AND ($3::text IS NULL OR $3 = ANY(tags)) \
               AND ($4::text IS NULL OR owner_scope = $4) \
             ORDER BY created_at"
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.tag.as_deref())
        .bind(filter.owner_scope.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::store)?;

        rows.iter().map(job_from_row).collect()
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledJob>, SchedulerError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM foreman_scheduled_jobs \
             WHERE status = 'active' AND next_run <= $1 \
             ORDER BY priority_rank DESC, next_run ASC LIMIT $2"
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::store)?;

        rows.iter().map(job_from_row).collect()
    }

    async fn record_execution(&self, execution: &JobExecution) -> Result<(), SchedulerError> {
        sqlx::query(&format!(
            "INSERT INTO foreman_job_executions ({EXECUTION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (execution_id) DO UPDATE SET status = EXCLUDED.status, \
             finished_at = EXCLUDED.finished_at, error = EXCLUDED.error"
        ))
        .bind(execution.execution_id)
        .bind(execution.job_id)
        .bind(i64::from(execution.attempt))
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .bind(&execution.error)
        .bind(execution.dispatch_id)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::store)?;
        Ok(())
    }

    async fn list_executions(&self, job_id: Uuid) -> Result<Vec<JobExecution>, SchedulerError> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM foreman_job_executions \
             WHERE job_id = $1 ORDER BY started_at, attempt"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::store)?;

        rows.iter().map(execution_from_row).collect()
    }
}
