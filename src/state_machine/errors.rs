use super::states::WorkflowStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid transition: {event} is not accepted in status {status}")]
    InvalidTransition {
        status: WorkflowStatus,
        event: &'static str,
    },

    #[error("Workflow is {status}; {event} rejected")]
    TerminalState {
        status: WorkflowStatus,
        event: &'static str,
    },

    #[error("Stale stage signal: workflow is at {current}, event names {received}")]
    StaleStage { current: String, received: String },

    #[error("Stage {stage} is not part of the {workflow_type} stage list")]
    UnknownStage { workflow_type: String, stage: String },

    #[error("Workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: Uuid },

    #[error("Workflow already exists: {workflow_id}")]
    AlreadyExists { workflow_id: Uuid },

    #[error("Concurrent modification of workflow {workflow_id}: expected version {expected_version}")]
    ConcurrentModification {
        workflow_id: Uuid,
        expected_version: i64,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StateMachineError {
    /// The event was refused by the transition rules; state is unchanged
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::TerminalState { .. } | Self::StaleStage { .. }
        )
    }
}

impl From<serde_json::Error> for StateMachineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
