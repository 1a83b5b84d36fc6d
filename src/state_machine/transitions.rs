//! # Workflow Transitions
//!
//! The whole state machine is [`transition`]: a pure function from the
//! current workflow and an event to the next workflow plus the effects the
//! caller must run, in order. Nothing here touches storage or the bus.
//!
//! ```text
//! initiated --START--> running
//! running --STAGE_COMPLETE--> evaluating --(last stage)--> completed
//!                                        --(otherwise)--> running (next stage)
//! running --STAGE_FAILED--> failed
//! running --PAUSE--> paused --RESUME--> running
//! failed --RETRY--> running
//! running | paused | failed --CANCEL--> cancelled
//! ```

use super::errors::StateMachineError;
use super::events::WorkflowEvent;
use super::states::WorkflowStatus;
use super::workflow::{Workflow, WorkflowNotification, WorkflowNotificationKind};
use chrono::{DateTime, Utc};

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write the workflow to the store of record (compare-and-swap on version)
    Persist(Workflow),
    /// Publish a lifecycle notification
    Notify(WorkflowNotification),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    /// Every status passed through, including transient `evaluating`
    pub path: Vec<WorkflowStatus>,
    pub workflow: Workflow,
    /// Persist always comes before Notify
    pub effects: Vec<Effect>,
}

pub fn transition(
    workflow: &Workflow,
    event: &WorkflowEvent,
    now: DateTime<Utc>,
) -> Result<Transition, StateMachineError> {
    use WorkflowStatus as S;

    let from = workflow.status;
    let event_type = event.event_type();
    if from.is_terminal() {
        return Err(StateMachineError::TerminalState {
            status: from,
            event: event_type,
        });
    }

    let mut next = workflow.clone();
    next.updated_at = now;
    next.version += 1;

    let mut path = vec![from];
    let mut previous_stage = None;
    let mut cancel_reason = None;

    let kind = match (from, event) {
        (S::Initiated, WorkflowEvent::Start) => {
            next.status = S::Running;
            WorkflowNotificationKind::Started
        }
        (S::Running, WorkflowEvent::StageComplete { stage, .. }) => {
            ensure_current_stage(workflow, stage)?;
            let index = workflow
                .workflow_type
                .stage_index(&workflow.current_stage)
                .ok_or_else(|| StateMachineError::UnknownStage {
                    workflow_type: workflow.workflow_type.to_string(),
                    stage: workflow.current_stage.clone(),
                })?;
            path.push(S::Evaluating);

            match workflow.workflow_type.stages().get(index + 1) {
                Some(next_stage) => {
                    previous_stage = Some(workflow.current_stage.clone());
                    next.current_stage = (*next_stage).to_string();
                    next.status = S::Running;
                    next.progress = next
                        .progress
                        .max(workflow.workflow_type.progress_after(index + 1));
                    WorkflowNotificationKind::StageAdvanced
                }
                None => {
                    next.status = S::Completed;
                    next.progress = 100;
                    WorkflowNotificationKind::Completed
                }
            }
        }
        (S::Running, WorkflowEvent::StageFailed { stage, error }) => {
            ensure_current_stage(workflow, stage)?;
            next.status = S::Failed;
            next.last_error = Some(error.clone());
            next.failed_stage = Some(stage.clone());
            WorkflowNotificationKind::Failed
        }
        (S::Running, WorkflowEvent::Pause) => {
            next.status = S::Paused;
            WorkflowNotificationKind::Paused
        }
        (S::Paused, WorkflowEvent::Resume) => {
            next.status = S::Running;
            WorkflowNotificationKind::Resumed
        }
        (S::Failed, WorkflowEvent::Retry) => {
            next.status = S::Running;
            next.last_error = None;
            next.failed_stage = None;
            WorkflowNotificationKind::Retried
        }
        (S::Running | S::Paused | S::Failed, WorkflowEvent::Cancel { reason }) => {
            next.status = S::Cancelled;
            cancel_reason = reason.clone();
            WorkflowNotificationKind::Cancelled
        }
        _ => {
            return Err(StateMachineError::InvalidTransition {
                status: from,
                event: event_type,
            })
        }
    };
    path.push(next.status);

    let mut notification = WorkflowNotification::for_workflow(kind, &next);
    if let Some(stage) = previous_stage {
        notification = notification.with_previous_stage(stage);
    }
    if cancel_reason.is_some() {
        notification.error = cancel_reason;
    }

    Ok(Transition {
        from,
        to: next.status,
        path,
        effects: vec![Effect::Persist(next.clone()), Effect::Notify(notification)],
        workflow: next,
    })
}

fn ensure_current_stage(workflow: &Workflow, stage: &str) -> Result<(), StateMachineError> {
    if workflow.current_stage == stage {
        Ok(())
    } else {
        Err(StateMachineError::StaleStage {
            current: workflow.current_stage.clone(),
            received: stage.to_string(),
        })
    }
}
