use super::is_unique_violation;
use crate::state_machine::persistence::WorkflowStore;
use crate::state_machine::{StateMachineError, Workflow, WorkflowStatus};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "workflow_id, workflow_type, current_stage, status, progress, \
     last_error, failed_stage, metadata, version, created_at, updated_at";

/// [`WorkflowStore`] over the `foreman_workflows` table
#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn persistence(err: sqlx::Error) -> StateMachineError {
    StateMachineError::Persistence(err.to_string())
}

fn from_row(row: &PgRow) -> Result<Workflow, StateMachineError> {
    let workflow_type: String = row.try_get("workflow_type").map_err(persistence)?;
    let status: String = row.try_get("status").map_err(persistence)?;
    let progress: i16 = row.try_get("progress").map_err(persistence)?;

    Ok(Workflow {
        workflow_id: row.try_get("workflow_id").map_err(persistence)?,
        workflow_type: workflow_type.parse().map_err(StateMachineError::Persistence)?,
        current_stage: row.try_get("current_stage").map_err(persistence)?,
        status: status.parse().map_err(StateMachineError::Persistence)?,
        progress: u8::try_from(progress.clamp(0, 100)).unwrap_or(0),
        last_error: row.try_get("last_error").map_err(persistence)?,
        failed_stage: row.try_get("failed_stage").map_err(persistence)?,
        metadata: row.try_get("metadata").map_err(persistence)?,
        version: row.try_get("version").map_err(persistence)?,
        created_at: row.try_get("created_at").map_err(persistence)?,
        updated_at: row.try_get("updated_at").map_err(persistence)?,
    })
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn create(&self, workflow: &Workflow) -> Result<(), StateMachineError> {
        let result = sqlx::query(
            "INSERT INTO foreman_workflows (workflow_id, workflow_type, current_stage, status, \
             progress, last_error, failed_stage, metadata, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(workflow.workflow_id)
        .bind(workflow.workflow_type.as_str())
        .bind(&workflow.current_stage)
        .bind(workflow.status.as_str())
        .bind(i16::from(workflow.progress))
        .bind(&workflow.last_error)
        .bind(&workflow.failed_stage)
        .bind(&workflow.metadata)
        .bind(workflow.version)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StateMachineError::AlreadyExists {
                workflow_id: workflow.workflow_id,
            }),
            Err(e) => Err(persistence(e)),
        }
    }

    async fn get(&self, workflow_id: Uuid) -> Result<Option<Workflow>, StateMachineError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM foreman_workflows WHERE workflow_id = $1"
        ))
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;

        row.as_ref().map(from_row).transpose()
    }

    async fn save(&self, workflow: &Workflow, expected_version: i64) -> Result<(), StateMachineError> {
        let result = sqlx::query(
            "UPDATE foreman_workflows SET current_stage = $3, status = $4, progress = $5, \
             last_error = $6, failed_stage = $7, metadata = $8, version = $9, updated_at = $10 \
             WHERE workflow_id = $1 AND version = $2",
        )
        .bind(workflow.workflow_id)
        .bind(expected_version)
        .bind(&workflow.current_stage)
        .bind(workflow.status.as_str())
        .bind(i16::from(workflow.progress))
        .bind(&workflow.last_error)
        .bind(&workflow.failed_stage)
        .bind(&workflow.metadata)
        .bind(workflow.version)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(persistence)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get(workflow.workflow_id).await? {
            Some(_) => Err(StateMachineError::ConcurrentModification {
                workflow_id: workflow.workflow_id,
                expected_version,
            }),
            None => Err(StateMachineError::WorkflowNotFound {
                workflow_id: workflow.workflow_id,
            }),
        }
    }

    async fn list(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>, StateMachineError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM foreman_workflows \
             WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at"
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        rows.iter().map(from_row).collect()
    }
}
