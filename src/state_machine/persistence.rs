use super::errors::StateMachineError;
use super::states::WorkflowStatus;
use super::workflow::Workflow;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Store of record for workflows.
///
/// `save` is compare-and-swap on `version` so two replicas applying events to
/// the same workflow cannot overwrite each other.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    async fn create(&self, workflow: &Workflow) -> Result<(), StateMachineError>;

    async fn get(&self, workflow_id: Uuid) -> Result<Option<Workflow>, StateMachineError>;

    /// Replace the stored workflow if its version is still `expected_version`
    async fn save(&self, workflow: &Workflow, expected_version: i64) -> Result<(), StateMachineError>;

    async fn list(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>, StateMachineError>;
}

/// Workflow arena keyed by id
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowStore {
    workflows: Arc<DashMap<Uuid, Workflow>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create(&self, workflow: &Workflow) -> Result<(), StateMachineError> {
        use dashmap::mapref::entry::Entry;
        match self.workflows.entry(workflow.workflow_id) {
            Entry::Occupied(_) => Err(StateMachineError::AlreadyExists {
                workflow_id: workflow.workflow_id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(workflow.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, workflow_id: Uuid) -> Result<Option<Workflow>, StateMachineError> {
        Ok(self.workflows.get(&workflow_id).map(|wf| wf.clone()))
    }

    async fn save(&self, workflow: &Workflow, expected_version: i64) -> Result<(), StateMachineError> {
        let mut stored = self.workflows.get_mut(&workflow.workflow_id).ok_or(
            StateMachineError::WorkflowNotFound {
                workflow_id: workflow.workflow_id,
            },
        )?;
        if stored.version != expected_version {
            return Err(StateMachineError::ConcurrentModification {
                workflow_id: workflow.workflow_id,
                expected_version,
            });
        }
        *stored = workflow.clone();
        Ok(())
    }

    async fn list(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>, StateMachineError> {
        let mut workflows: Vec<Workflow> = self
            .workflows
            .iter()
            .filter(|wf| status.map_or(true, |s| wf.status == s))
            .map(|wf| wf.clone())
            .collect();
        workflows.sort_by_key(|wf| wf.created_at);
        Ok(workflows)
    }
}
