//! # Workflow Coordinator
//!
//! Turns phase results into workflow events. Each [`PhaseBinding`] ties a
//! stage to the output topic and dead-letter topic of the orchestrator that
//! runs it:
//!
//! - an envelope on the output topic becomes `STAGE_COMPLETE(stage)`
//! - a [`DeadLetter`] on the dead-letter topic becomes `STAGE_FAILED(stage, error)`
//!
//! The workflow id is the payload's `workflowId` when present, otherwise the
//! envelope's correlation id. Signals the state machine refuses (stale,
//! duplicate, or for a terminal workflow) are logged and acknowledged so the
//! bus does not redeliver them forever.
//!
//! The coordinator also exposes the operator commands `start_workflow`,
//! `pause`, `resume`, `cancel` and `retry`.

use crate::config::{ConfigurationError, PhaseBindingConfig};
use crate::logging::log_workflow_operation;
use crate::messaging::{handler_fn, DeadLetter, Envelope, MessageBus, MessagingError, Subscription};
use crate::state_machine::{
    StateMachineError, Workflow, WorkflowEvent, WorkflowStateMachine, WorkflowStatus, WorkflowType,
};
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stage ↔ topics binding for one phase orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseBinding {
    pub stage: String,
    pub output_topic: String,
    pub dlq_topic: String,
}

impl PhaseBinding {
    pub fn new(
        stage: impl Into<String>,
        output_topic: impl Into<String>,
        dlq_topic: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            output_topic: output_topic.into(),
            dlq_topic: dlq_topic.into(),
        }
    }

    pub fn from_config(config: &PhaseBindingConfig) -> Result<Self, ConfigurationError> {
        let dlq_topic = config.resolved_dlq_topic().ok_or_else(|| {
            ConfigurationError::missing_required_field(
                "dlq_topic or input_topic",
                format!("orchestrator phase '{}'", config.stage),
            )
        })?;
        Ok(Self::new(&config.stage, &config.output_topic, dlq_topic))
    }
}

pub struct WorkflowCoordinator {
    machine: WorkflowStateMachine,
    bus: Arc<dyn MessageBus>,
    bindings: Vec<PhaseBinding>,
    group: String,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl std::fmt::Debug for WorkflowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCoordinator")
            .field("bindings", &self.bindings)
            .field("group", &self.group)
            .finish()
    }
}

impl WorkflowCoordinator {
    pub fn new(
        machine: WorkflowStateMachine,
        bus: Arc<dyn MessageBus>,
        bindings: Vec<PhaseBinding>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            machine,
            bus,
            bindings,
            group: group.into(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn machine(&self) -> &WorkflowStateMachine {
        &self.machine
    }

    pub fn bindings(&self) -> &[PhaseBinding] {
        &self.bindings
    }

    /// Create a workflow and start it at its first stage
    pub async fn start_workflow(
        &self,
        workflow_type: WorkflowType,
        metadata: Value,
    ) -> Result<Workflow, StateMachineError> {
        let workflow = self.machine.create(workflow_type, metadata).await?;
        self.command(workflow.workflow_id, WorkflowEvent::Start).await
    }

    pub async fn pause(&self, workflow_id: Uuid) -> Result<Workflow, StateMachineError> {
        self.command(workflow_id, WorkflowEvent::Pause).await
    }

    pub async fn resume(&self, workflow_id: Uuid) -> Result<Workflow, StateMachineError> {
        self.command(workflow_id, WorkflowEvent::Resume).await
    }

    pub async fn cancel(
        &self,
        workflow_id: Uuid,
        reason: Option<String>,
    ) -> Result<Workflow, StateMachineError> {
        self.command(workflow_id, WorkflowEvent::Cancel { reason })
            .await
    }

    pub async fn retry(&self, workflow_id: Uuid) -> Result<Workflow, StateMachineError> {
        self.command(workflow_id, WorkflowEvent::Retry).await
    }

    async fn command(
        &self,
        workflow_id: Uuid,
        event: WorkflowEvent,
    ) -> Result<Workflow, StateMachineError> {
        let event_type = event.event_type();
        let transition = self.machine.apply(workflow_id, event).await?;
        log_workflow_operation(
            event_type,
            &workflow_id.to_string(),
            Some(&transition.workflow.current_stage),
            transition.to.as_str(),
            None,
        );
        Ok(transition.workflow)
    }

    /// Subscribe to every bound output and dead-letter topic
    pub async fn start(self: &Arc<Self>) -> Result<(), MessagingError> {
        let mut started = Vec::with_capacity(self.bindings.len() * 2);

        for binding in &self.bindings {
            let this = Arc::clone(self);
            let stage = binding.stage.clone();
            let on_output = handler_fn(move |envelope| {
                let this = Arc::clone(&this);
                let stage = stage.clone();
                async move { this.handle_stage_output(&stage, envelope).await }
            });
            started.push(
                self.bus
                    .subscribe(&binding.output_topic, &self.group, on_output)
                    .await?,
            );

            let this = Arc::clone(self);
            let stage = binding.stage.clone();
            let on_dead_letter = handler_fn(move |envelope| {
                let this = Arc::clone(&this);
                let stage = stage.clone();
                async move { this.handle_dead_letter(&stage, envelope).await }
            });
            started.push(
                self.bus
                    .subscribe(&binding.dlq_topic, &self.group, on_dead_letter)
                    .await?,
            );
        }

        info!(
            group = %self.group,
            bindings = self.bindings.len(),
            "Workflow coordinator started"
        );
        self.subscriptions.lock().extend(started);
        Ok(())
    }

    pub async fn stop(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        join_all(subscriptions.into_iter().map(Subscription::unsubscribe)).await;
        debug!(group = %self.group, "Workflow coordinator stopped");
    }

    /// A phase published its result: advance the workflow
    pub async fn handle_stage_output(
        &self,
        stage: &str,
        envelope: Envelope<Value>,
    ) -> Result<(), MessagingError> {
        let Some(workflow_id) = workflow_id_of(&envelope.payload, &envelope.correlation_id) else {
            warn!(
                envelope_id = %envelope.id,
                topic = %envelope.topic,
                "Stage result carries no workflow id, dropping"
            );
            return Ok(());
        };

        let event = WorkflowEvent::StageComplete {
            stage: stage.to_string(),
            output: Some(envelope.payload),
        };
        self.signal(workflow_id, event).await
    }

    /// A phase gave up: fail the workflow at this stage
    pub async fn handle_dead_letter(
        &self,
        stage: &str,
        envelope: Envelope<Value>,
    ) -> Result<(), MessagingError> {
        let letter: DeadLetter = match envelope.decode_payload() {
            Ok(letter) => letter,
            Err(e) => {
                warn!(envelope_id = %envelope.id, error = %e, "Undecodable dead letter, dropping");
                return Ok(());
            }
        };

        let workflow_id = workflow_id_of(&letter.original.payload, &letter.original.correlation_id)
            .or_else(|| workflow_id_of(&Value::Null, &envelope.correlation_id));
        let Some(workflow_id) = workflow_id else {
            warn!(envelope_id = %envelope.id, "Dead letter carries no workflow id, dropping");
            return Ok(());
        };

        self.signal(workflow_id, WorkflowEvent::stage_failed(stage, letter.error))
            .await
    }

    async fn signal(&self, workflow_id: Uuid, event: WorkflowEvent) -> Result<(), MessagingError> {
        let event_type = event.event_type();
        match self.machine.apply(workflow_id, event).await {
            Ok(transition) => {
                log_workflow_operation(
                    event_type,
                    &workflow_id.to_string(),
                    Some(&transition.workflow.current_stage),
                    transition.to.as_str(),
                    None,
                );
                Ok(())
            }
            Err(StateMachineError::InvalidTransition {
                status: WorkflowStatus::Paused,
                ..
            }) => {
                // Leave the delivery pending; it is redelivered until the workflow resumes
                debug!(
                    workflow_id = %workflow_id,
                    event = event_type,
                    "Workflow paused, deferring stage signal"
                );
                Err(MessagingError::handler(format!(
                    "workflow {workflow_id} is paused; {event_type} deferred"
                )))
            }
            Err(e)
                if e.is_rejection()
                    || matches!(
                        e,
                        StateMachineError::WorkflowNotFound { .. }
                            | StateMachineError::UnknownStage { .. }
                    ) =>
            {
                info!(
                    workflow_id = %workflow_id,
                    event = event_type,
                    reason = %e,
                    "Workflow signal ignored"
                );
                Ok(())
            }
            Err(e) => Err(MessagingError::handler(format!(
                "applying {event_type} to workflow {workflow_id}: {e}"
            ))),
        }
    }
}

/// `payload.workflowId`, else the correlation id, when either is a UUID
fn workflow_id_of(payload: &Value, correlation_id: &str) -> Option<Uuid> {
    payload
        .get("workflowId")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .or_else(|| Uuid::parse_str(correlation_id).ok())
}
