//! # Workflow State Machine
//!
//! Runs workflow events against the store of record. Each call loads the
//! workflow, applies the pure transition rules, then persists the result
//! with a compare-and-swap on its version, re-reading up to
//! `MAX_CONFLICT_RETRIES` times on a conflict. Lifecycle notifications are
//! published after a successful write.

use super::errors::StateMachineError;
use super::events::WorkflowEvent;
use super::persistence::WorkflowStore;
use super::states::{WorkflowStatus, WorkflowType};
use super::transitions::{transition, Effect, Transition};
use super::workflow::{Workflow, WorkflowNotification, WorkflowNotificationKind};
use crate::messaging::{create_envelope, publish_envelope, MessageBus};
use crate::utils::clock::Clock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Re-reads before giving up on a version conflict
const MAX_CONFLICT_RETRIES: u32 = 3;

/// Executes workflow transitions against the store of record.
///
/// Holds no per-workflow state: every call rehydrates the workflow from the
/// store, runs the pure [`transition`], then runs its effects in order.
/// Persistence failures are returned; notification failures are logged.
#[derive(Clone)]
pub struct WorkflowStateMachine {
    store: Arc<dyn WorkflowStore>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    lifecycle_topic: String,
}

impl std::fmt::Debug for WorkflowStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStateMachine")
            .field("lifecycle_topic", &self.lifecycle_topic)
            .finish()
    }
}

impl WorkflowStateMachine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        lifecycle_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bus,
            clock,
            lifecycle_topic: lifecycle_topic.into(),
        }
    }

    pub fn lifecycle_topic(&self) -> &str {
        &self.lifecycle_topic
    }

    /// Persist a new `initiated` workflow and announce it
    pub async fn create(
        &self,
        workflow_type: WorkflowType,
        metadata: Value,
    ) -> Result<Workflow, StateMachineError> {
        self.create_with_id(Uuid::new_v4(), workflow_type, metadata)
            .await
    }

    pub async fn create_with_id(
        &self,
        workflow_id: Uuid,
        workflow_type: WorkflowType,
        metadata: Value,
    ) -> Result<Workflow, StateMachineError> {
        let workflow = Workflow::with_id(workflow_id, workflow_type, metadata, self.clock.now());
        self.store.create(&workflow).await?;

        info!(
            workflow_id = %workflow.workflow_id,
            workflow_type = %workflow.workflow_type,
            stage = %workflow.current_stage,
            "Workflow created"
        );
        self.notify(WorkflowNotification::for_workflow(
            WorkflowNotificationKind::Created,
            &workflow,
        ))
        .await;
        Ok(workflow)
    }

    pub async fn get(&self, workflow_id: Uuid) -> Result<Option<Workflow>, StateMachineError> {
        self.store.get(workflow_id).await
    }

    pub async fn list(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<Workflow>, StateMachineError> {
        self.store.list(status).await
    }

    /// Apply `event` to the stored workflow.
    ///
    /// A version conflict re-reads the workflow and re-runs the transition,
    /// so a duplicate signal that lost the race is rejected as stale.
    pub async fn apply(
        &self,
        workflow_id: Uuid,
        event: WorkflowEvent,
    ) -> Result<Transition, StateMachineError> {
        let mut conflicts = 0;
        loop {
            let current = self
                .store
                .get(workflow_id)
                .await?
                .ok_or(StateMachineError::WorkflowNotFound { workflow_id })?;

            let planned = transition(&current, &event, self.clock.now())?;
            match self.run_effects(&current, &planned).await {
                Ok(()) => {
                    info!(
                        workflow_id = %workflow_id,
                        event = event.event_type(),
                        from = %planned.from,
                        to = %planned.to,
                        stage = %planned.workflow.current_stage,
                        progress = planned.workflow.progress,
                        "Workflow transitioned"
                    );
                    return Ok(planned);
                }
                Err(StateMachineError::ConcurrentModification { .. })
                    if conflicts < MAX_CONFLICT_RETRIES =>
                {
                    conflicts += 1;
                    debug!(workflow_id = %workflow_id, conflicts, "Version conflict, re-reading workflow");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_effects(
        &self,
        current: &Workflow,
        planned: &Transition,
    ) -> Result<(), StateMachineError> {
        for effect in &planned.effects {
            match effect {
                Effect::Persist(workflow) => self.store.save(workflow, current.version).await?,
                Effect::Notify(notification) => self.notify(notification.clone()).await,
            }
        }
        Ok(())
    }

    async fn notify(&self, notification: WorkflowNotification) {
        let kind = notification.kind;
        let workflow_id = notification.workflow_id;
        let envelope = create_envelope(
            self.lifecycle_topic.clone(),
            notification,
            Some(workflow_id.to_string()),
            None,
        );
        if let Err(e) = publish_envelope(self.bus.as_ref(), &envelope).await {
            warn!(
                workflow_id = %workflow_id,
                notification = kind.as_str(),
                error = %e,
                "Failed to publish workflow notification"
            );
        }
    }
}
