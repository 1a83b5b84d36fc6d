//! Workflow record and its lifecycle notifications.

use super::states::{WorkflowStatus, WorkflowType};
use crate::constants::workflow_events;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One workflow instance as kept in the store of record.
///
/// `current_stage` is always a member of `workflow_type.stages()`.
/// `version` increases by one with every persisted transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub workflow_id: Uuid,
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    pub current_stage: String,
    pub status: WorkflowStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(workflow_type: WorkflowType, metadata: Value, now: DateTime<Utc>) -> Self {
        Self::with_id(Uuid::new_v4(), workflow_type, metadata, now)
    }

    pub fn with_id(
        workflow_id: Uuid,
        workflow_type: WorkflowType,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow_id,
            workflow_type,
            current_stage: workflow_type.first_stage().to_string(),
            status: WorkflowStatus::Initiated,
            progress: 0,
            last_error: None,
            failed_stage: None,
            metadata,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowNotificationKind {
    #[serde(rename = "workflow.created")]
    Created,
    #[serde(rename = "workflow.started")]
    Started,
    #[serde(rename = "workflow.stage_advanced")]
    StageAdvanced,
    #[serde(rename = "workflow.paused")]
    Paused,
    #[serde(rename = "workflow.resumed")]
    Resumed,
    #[serde(rename = "workflow.failed")]
    Failed,
    #[serde(rename = "workflow.retried")]
    Retried,
    #[serde(rename = "workflow.cancelled")]
    Cancelled,
    #[serde(rename = "workflow.completed")]
    Completed,
}

impl WorkflowNotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => workflow_events::CREATED,
            Self::Started => workflow_events::STARTED,
            Self::StageAdvanced => workflow_events::STAGE_ADVANCED,
            Self::Paused => workflow_events::PAUSED,
            Self::Resumed => workflow_events::RESUMED,
            Self::Failed => workflow_events::FAILED,
            Self::Retried => workflow_events::RETRIED,
            Self::Cancelled => workflow_events::CANCELLED,
            Self::Completed => workflow_events::COMPLETED,
        }
    }
}

/// Payload published on the workflow lifecycle topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNotification {
    #[serde(rename = "type")]
    pub kind: WorkflowNotificationKind,
    pub workflow_id: Uuid,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_stage: Option<String>,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl WorkflowNotification {
    pub fn for_workflow(kind: WorkflowNotificationKind, workflow: &Workflow) -> Self {
        Self {
            kind,
            workflow_id: workflow.workflow_id,
            workflow_type: workflow.workflow_type,
            status: workflow.status,
            stage: workflow.current_stage.clone(),
            previous_stage: None,
            progress: workflow.progress,
            error: workflow.last_error.clone(),
            occurred_at: workflow.updated_at,
        }
    }

    pub fn with_previous_stage(mut self, stage: impl Into<String>) -> Self {
        self.previous_stage = Some(stage.into());
        self
    }
}
