use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Commands and phase signals that drive a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowEvent {
    Start,
    /// The named stage finished; must name the workflow's current stage
    StageComplete {
        stage: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    StageFailed {
        stage: String,
        error: String,
    },
    Pause,
    Resume,
    Cancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Re-run the failed stage
    Retry,
}

impl WorkflowEvent {
    pub fn stage_complete(stage: impl Into<String>) -> Self {
        Self::StageComplete {
            stage: stage.into(),
            output: None,
        }
    }

    pub fn stage_failed(stage: impl Into<String>, error: impl Into<String>) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            error: error.into(),
        }
    }

    pub fn cancel() -> Self {
        Self::Cancel { reason: None }
    }

    /// Event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::StageComplete { .. } => "STAGE_COMPLETE",
            Self::StageFailed { .. } => "STAGE_FAILED",
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
            Self::Cancel { .. } => "CANCEL",
            Self::Retry => "RETRY",
        }
    }

    /// Stage named by a phase signal
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageComplete { stage, .. } | Self::StageFailed { stage, .. } => Some(stage),
            _ => None,
        }
    }
}
