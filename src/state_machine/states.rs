use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, not yet started
    Initiated,
    /// Current stage is being worked on
    Running,
    /// Transient: deciding between the next stage and completion
    Evaluating,
    Paused,
    /// Current stage failed; waits for an explicit retry
    Failed,
    Completed,
    Cancelled,
}

impl WorkflowStatus {
    /// No event is accepted once a workflow is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Evaluating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Running => "running",
            Self::Evaluating => "evaluating",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(Self::Initiated),
            "running" => Ok(Self::Running),
            "evaluating" => Ok(Self::Evaluating),
            "paused" => Ok(Self::Paused),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid workflow status: {s}")),
        }
    }
}

const APP_STAGES: &[&str] = &[
    "initialization",
    "scaffolding",
    "validation",
    "e2e_testing",
    "integration",
    "deployment",
    "monitoring",
];

const FEATURE_STAGES: &[&str] = &[
    "initialization",
    "planning",
    "implementation",
    "validation",
    "integration",
    "deployment",
];

const BUGFIX_STAGES: &[&str] = &[
    "initialization",
    "reproduction",
    "fix",
    "validation",
    "deployment",
];

/// Kind of work a workflow drives; fixes its ordered stage list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    App,
    Feature,
    Bugfix,
}

impl WorkflowType {
    pub fn stages(&self) -> &'static [&'static str] {
        match self {
            Self::App => APP_STAGES,
            Self::Feature => FEATURE_STAGES,
            Self::Bugfix => BUGFIX_STAGES,
        }
    }

    pub fn first_stage(&self) -> &'static str {
        self.stages()[0]
    }

    pub fn stage_index(&self, stage: &str) -> Option<usize> {
        self.stages().iter().position(|s| *s == stage)
    }

    /// Stage after `stage`, `None` when `stage` is the last one or unknown
    pub fn next_stage(&self, stage: &str) -> Option<&'static str> {
        self.stage_index(stage)
            .and_then(|index| self.stages().get(index + 1).copied())
    }

    pub fn is_last_stage(&self, stage: &str) -> bool {
        self.stage_index(stage) == Some(self.stages().len() - 1)
    }

    /// Progress after `completed` stages: `floor(completed * 100 / stage_count)`
    pub fn progress_after(&self, completed: usize) -> u8 {
        let count = self.stages().len();
        let percent = completed.min(count) * 100 / count;
        u8::try_from(percent).unwrap_or(100)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Feature => "feature",
            Self::Bugfix => "bugfix",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(Self::App),
            "feature" => Ok(Self::Feature),
            "bugfix" => Ok(Self::Bugfix),
            _ => Err(format!("Invalid workflow type: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Failed.is_terminal());
        assert!(!WorkflowStatus::Paused.is_terminal());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            WorkflowStatus::Initiated,
            WorkflowStatus::Running,
            WorkflowStatus::Evaluating,
            WorkflowStatus::Paused,
            WorkflowStatus::Failed,
            WorkflowStatus::Completed,
            WorkflowStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<WorkflowStatus>(), Ok(status));
        }
        assert!("done".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn test_stage_navigation() {
        let app = WorkflowType::App;
        assert_eq!(app.first_stage(), "initialization");
        assert_eq!(app.next_stage("validation"), Some("e2e_testing"));
        assert_eq!(app.next_stage("monitoring"), None);
        assert!(app.is_last_stage("monitoring"));
        assert!(!app.is_last_stage("deployment"));
        assert_eq!(WorkflowType::Bugfix.stages().len(), 5);
    }

    #[test]
    fn test_progress_is_derived_from_stage_count() {
        assert_eq!(WorkflowType::App.progress_after(1), 14);
        assert_eq!(WorkflowType::App.progress_after(6), 85);
        assert_eq!(WorkflowType::App.progress_after(7), 100);
        assert_eq!(WorkflowType::Bugfix.progress_after(2), 40);
        assert_eq!(WorkflowType::Feature.progress_after(3), 50);
    }
}
