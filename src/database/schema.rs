//! # Schema
//!
//! Tables are created with `IF NOT EXISTS`, so [`apply`] can run on every
//! start. Concurrent starts serialize on a transaction-scoped advisory lock.

use sqlx::PgPool;
use tracing::info;

/// Advisory lock key for schema creation
const SCHEMA_LOCK_KEY: i64 = 0x666f_7265_6d61_6e;

const STATEMENTS: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS foreman_workflows (
        workflow_id UUID PRIMARY KEY,
        workflow_type TEXT NOT NULL,
        current_stage TEXT NOT NULL,
        status TEXT NOT NULL,
        progress SMALLINT NOT NULL DEFAULT 0,
        last_error TEXT,
        failed_stage TEXT,
        metadata JSONB NOT NULL DEFAULT 'null'::jsonb,
        version BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    r"CREATE INDEX IF NOT EXISTS foreman_workflows_status_idx
        ON foreman_workflows (status, created_at)",
    r"CREATE TABLE IF NOT EXISTS foreman_scheduled_jobs (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        schedule TEXT,
        execute_at TIMESTAMPTZ,
        timezone TEXT NOT NULL,
        handler_name TEXT NOT NULL,
        handler_type TEXT,
        payload JSONB NOT NULL DEFAULT 'null'::jsonb,
        max_retries BIGINT NOT NULL,
        timeout_ms BIGINT NOT NULL,
        priority TEXT NOT NULL,
        priority_rank SMALLINT NOT NULL,
        status TEXT NOT NULL,
        next_run TIMESTAMPTZ,
        last_run TIMESTAMPTZ,
        executions_count BIGINT NOT NULL DEFAULT 0,
        tags TEXT[] NOT NULL DEFAULT '{}',
        owner_scope TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        version BIGINT NOT NULL DEFAULT 0
    )",
    r"CREATE INDEX IF NOT EXISTS foreman_scheduled_jobs_due_idx
        ON foreman_scheduled_jobs (status, next_run)",
    r"CREATE TABLE IF NOT EXISTS foreman_job_executions (
        execution_id UUID PRIMARY KEY,
        job_id UUID NOT NULL,
        attempt BIGINT NOT NULL,
        status TEXT NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        finished_at TIMESTAMPTZ,
        error TEXT,
        dispatch_id UUID
    )",
    r"CREATE INDEX IF NOT EXISTS foreman_job_executions_job_idx
        ON foreman_job_executions (job_id, started_at)",
];

/// Create every table and index that does not exist yet
pub async fn apply(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    for statement in STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    info!(statements = STATEMENTS.len(), "Database schema applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_idempotent() {
        assert!(STATEMENTS
            .iter()
            .all(|s| s.contains("IF NOT EXISTS")));
    }

    #[test]
    fn test_every_store_table_is_created() {
        for table in [
            "foreman_workflows",
            "foreman_scheduled_jobs",
            "foreman_job_executions",
        ] {
            assert!(
                STATEMENTS
                    .iter()
                    .any(|s| s.contains(&format!("CREATE TABLE IF NOT EXISTS {table} "))),
                "missing table {table}"
            );
        }
    }
}
