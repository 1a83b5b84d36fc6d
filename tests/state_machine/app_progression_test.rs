use foreman_core::messaging::InMemoryMessageBus;
use foreman_core::state_machine::{
    InMemoryWorkflowStore, StateMachineError, WorkflowEvent, WorkflowNotification,
    WorkflowNotificationKind, WorkflowStateMachine, WorkflowStatus, WorkflowType,
};
use foreman_core::utils::clock::SystemClock;
use serde_json::json;
use std::sync::Arc;

fn machine() -> (WorkflowStateMachine, InMemoryMessageBus) {
    let bus = InMemoryMessageBus::new();
    let machine = WorkflowStateMachine::new(
        Arc::new(InMemoryWorkflowStore::new()),
        Arc::new(bus.clone()),
        Arc::new(SystemClock),
        "workflow.lifecycle",
    );
    (machine, bus)
}

fn notifications(bus: &InMemoryMessageBus) -> Vec<WorkflowNotification> {
    bus.published("workflow.lifecycle")
        .iter()
        .map(|e| e.decode_payload().unwrap())
        .collect()
}

#[tokio::test]
async fn test_app_workflow_walks_all_seven_stages() {
    let (machine, bus) = machine();
    let workflow = machine
        .create(WorkflowType::App, json!({"name": "storefront"}))
        .await
        .unwrap();
    let id = workflow.workflow_id;
    assert_eq!(workflow.status, WorkflowStatus::Initiated);

    machine.apply(id, WorkflowEvent::Start).await.unwrap();

    let stages = WorkflowType::App.stages();
    assert_eq!(stages.len(), 7);
    let expected_progress = [14u8, 28, 42, 57, 71, 85, 100];

    for (index, stage) in stages.iter().enumerate() {
        let transition = machine
            .apply(id, WorkflowEvent::stage_complete(*stage))
            .await
            .unwrap();
        assert!(transition.path.contains(&WorkflowStatus::Evaluating));
        assert_eq!(transition.workflow.progress, expected_progress[index]);

        match stages.get(index + 1) {
            Some(next) => {
                assert_eq!(transition.to, WorkflowStatus::Running);
                assert_eq!(transition.workflow.current_stage, *next);
            }
            None => assert_eq!(transition.to, WorkflowStatus::Completed),
        }
    }

    let stored = machine.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status, WorkflowStatus::Completed);
    assert_eq!(stored.progress, 100);

    let kinds: Vec<WorkflowNotificationKind> =
        notifications(&bus).iter().map(|n| n.kind).collect();
    assert_eq!(kinds.first(), Some(&WorkflowNotificationKind::Created));
    assert_eq!(kinds.last(), Some(&WorkflowNotificationKind::Completed));
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == WorkflowNotificationKind::StageAdvanced)
            .count(),
        6
    );
    assert!(bus
        .published("workflow.lifecycle")
        .iter()
        .all(|e| e.correlation_id == id.to_string()));
}

#[tokio::test]
async fn test_terminal_states_accept_nothing() {
    let (machine, _bus) = machine();

    let completed = machine.create(WorkflowType::Bugfix, json!({})).await.unwrap();
    let completed_id = completed.workflow_id;
    machine.apply(completed_id, WorkflowEvent::Start).await.unwrap();
    for stage in WorkflowType::Bugfix.stages() {
        machine
            .apply(completed_id, WorkflowEvent::stage_complete(*stage))
            .await
            .unwrap();
    }

    let cancelled = machine.create(WorkflowType::Feature, json!({})).await.unwrap();
    let cancelled_id = cancelled.workflow_id;
    machine.apply(cancelled_id, WorkflowEvent::Start).await.unwrap();
    machine.apply(cancelled_id, WorkflowEvent::cancel()).await.unwrap();

    for id in [completed_id, cancelled_id] {
        let before = machine.get(id).await.unwrap().unwrap();
        for event in [
            WorkflowEvent::Start,
            WorkflowEvent::stage_complete("deployment"),
            WorkflowEvent::stage_failed("deployment", "late"),
            WorkflowEvent::Pause,
            WorkflowEvent::Resume,
            WorkflowEvent::cancel(),
            WorkflowEvent::Retry,
        ] {
            let err = machine.apply(id, event).await.unwrap_err();
            assert!(matches!(err, StateMachineError::TerminalState { .. }));
        }
        assert_eq!(machine.get(id).await.unwrap().unwrap(), before);
    }
}

#[tokio::test]
async fn test_duplicate_stage_signal_is_stale() {
    let (machine, _bus) = machine();
    let workflow = machine.create(WorkflowType::Feature, json!({})).await.unwrap();
    let id = workflow.workflow_id;
    machine.apply(id, WorkflowEvent::Start).await.unwrap();

    machine
        .apply(id, WorkflowEvent::stage_complete("initialization"))
        .await
        .unwrap();
    let err = machine
        .apply(id, WorkflowEvent::stage_complete("initialization"))
        .await
        .unwrap_err();
    assert!(matches!(err, StateMachineError::StaleStage { .. }));
    assert!(err.is_rejection());

    let stored = machine.get(id).await.unwrap().unwrap();
    assert_eq!(stored.current_stage, "planning");
}

#[tokio::test]
async fn test_concurrent_signals_advance_once() {
    let (machine, _bus) = machine();
    let machine = Arc::new(machine);
    let workflow = machine.create(WorkflowType::App, json!({})).await.unwrap();
    let id = workflow.workflow_id;
    machine.apply(id, WorkflowEvent::Start).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let machine = Arc::clone(&machine);
        tasks.push(tokio::spawn(async move {
            machine
                .apply(id, WorkflowEvent::stage_complete("initialization"))
                .await
        }));
    }

    let mut advanced = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            advanced += 1;
        }
    }
    assert_eq!(advanced, 1);
    let stored = machine.get(id).await.unwrap().unwrap();
    assert_eq!(stored.current_stage, "scaffolding");
}
