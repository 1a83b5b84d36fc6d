use crate::common::{eventually, fast_retry, ports};
use async_trait::async_trait;
use foreman_core::messaging::{create_envelope, publish_envelope, Envelope, InMemoryMessageBus};
use foreman_core::orchestration::{
    BaseOrchestrator, OrchestratorSettings, PhaseBinding, PhaseError, PhaseHandler,
    WorkflowCoordinator,
};
use foreman_core::state_machine::{
    InMemoryWorkflowStore, WorkflowStateMachine, WorkflowStatus, WorkflowType,
};
use foreman_core::utils::clock::SystemClock;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct Passthrough;

#[async_trait]
impl PhaseHandler for Passthrough {
    type Input = Value;
    type Output = Value;

    async fn handle(&self, input: &Value, _envelope: &Envelope<Value>) -> Result<Value, PhaseError> {
        Ok(json!({ "echo": input }))
    }
}

struct Broken;

#[async_trait]
impl PhaseHandler for Broken {
    type Input = Value;
    type Output = Value;

    async fn handle(&self, _input: &Value, _envelope: &Envelope<Value>) -> Result<Value, PhaseError> {
        Err(PhaseError::new("scaffold template missing"))
    }
}

async fn wait_for_workflow<F>(coordinator: &Arc<WorkflowCoordinator>, id: Uuid, check: F) -> bool
where
    F: Fn(&foreman_core::state_machine::Workflow) -> bool + Clone,
{
    eventually(Duration::from_secs(5), || {
        let coordinator = Arc::clone(coordinator);
        let check = check.clone();
        async move {
            coordinator
                .machine()
                .get(id)
                .await
                .ok()
                .flatten()
                .is_some_and(|wf| check(&wf))
        }
    })
    .await
}

fn lifecycle_types(bus: &InMemoryMessageBus) -> Vec<String> {
    bus.published("workflow.lifecycle")
        .iter()
        .filter_map(|e| e.payload["type"].as_str().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_phase_results_drive_the_workflow() {
    let (bus, kv) = ports();
    let bus_port = Arc::new(bus.clone());

    let coordinator = Arc::new(WorkflowCoordinator::new(
        WorkflowStateMachine::new(
            Arc::new(InMemoryWorkflowStore::new()),
            bus_port.clone(),
            Arc::new(SystemClock),
            "workflow.lifecycle",
        ),
        bus_port.clone(),
        vec![
            PhaseBinding::new(
                "initialization",
                "phase.initialization.done",
                "phase.initialization:dlq",
            ),
            PhaseBinding::new("scaffolding", "phase.scaffolding.done", "phase.scaffolding:dlq"),
        ],
        "coordinator",
    ));
    coordinator.start().await.unwrap();

    let kv = Arc::new(kv);
    let initializer = Arc::new(BaseOrchestrator::new(
        Passthrough,
        bus_port.clone(),
        kv.clone(),
        OrchestratorSettings::new(
            "initializer",
            "phase.initialization",
            "phase.initialization.done",
        )
        .with_retry_policy(fast_retry(1)),
    ));
    let scaffolder = Arc::new(BaseOrchestrator::new(
        Broken,
        bus_port.clone(),
        kv,
        OrchestratorSettings::new("scaffolder", "phase.scaffolding", "phase.scaffolding.done")
            .with_max_retries(2)
            .with_retry_policy(fast_retry(1)),
    ));
    let _init = initializer.start().await.unwrap();
    let _scaffold = scaffolder.start().await.unwrap();

    let workflow = coordinator
        .start_workflow(WorkflowType::App, json!({"repo": "acme/api"}))
        .await
        .unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Running);
    assert_eq!(workflow.current_stage, "initialization");
    let id = workflow.workflow_id;

    publish_envelope(
        &bus,
        &create_envelope(
            "phase.initialization",
            json!({"workflowId": id}),
            Some(id.to_string()),
            None,
        ),
    )
    .await
    .unwrap();
    assert!(wait_for_workflow(&coordinator, id, |wf| wf.current_stage == "scaffolding").await);

    publish_envelope(
        &bus,
        &create_envelope(
            "phase.scaffolding",
            json!({"workflowId": id}),
            Some(id.to_string()),
            None,
        ),
    )
    .await
    .unwrap();
    assert!(wait_for_workflow(&coordinator, id, |wf| wf.status == WorkflowStatus::Failed).await);

    let failed = coordinator.machine().get(id).await.unwrap().unwrap();
    assert_eq!(failed.failed_stage.as_deref(), Some("scaffolding"));
    assert_eq!(failed.last_error.as_deref(), Some("scaffold template missing"));
    assert_eq!(bus.published("phase.scaffolding:dlq").len(), 1);

    let retried = coordinator.retry(id).await.unwrap();
    assert_eq!(retried.status, WorkflowStatus::Running);
    assert_eq!(retried.current_stage, "scaffolding");
    assert_eq!(retried.last_error, None);

    let types = lifecycle_types(&bus);
    for expected in [
        "workflow.created",
        "workflow.started",
        "workflow.stage_advanced",
        "workflow.failed",
        "workflow.retried",
    ] {
        assert!(types.iter().any(|t| t == expected), "missing {expected} in {types:?}");
    }

    coordinator.stop().await;
}

#[tokio::test]
async fn test_commands_follow_the_state_machine() {
    let (bus, _kv) = ports();
    let bus_port = Arc::new(bus.clone());
    let coordinator = Arc::new(WorkflowCoordinator::new(
        WorkflowStateMachine::new(
            Arc::new(InMemoryWorkflowStore::new()),
            bus_port.clone(),
            Arc::new(SystemClock),
            "workflow.lifecycle",
        ),
        bus_port,
        Vec::new(),
        "coordinator",
    ));

    let workflow = coordinator
        .start_workflow(WorkflowType::Bugfix, Value::Null)
        .await
        .unwrap();
    let id = workflow.workflow_id;

    assert_eq!(coordinator.pause(id).await.unwrap().status, WorkflowStatus::Paused);
    assert!(coordinator.pause(id).await.is_err());
    assert_eq!(coordinator.resume(id).await.unwrap().status, WorkflowStatus::Running);

    let cancelled = coordinator
        .cancel(id, Some("superseded".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
    assert!(coordinator.resume(id).await.is_err());
    assert!(coordinator.retry(id).await.is_err());
}

#[tokio::test]
async fn test_result_arriving_during_pause_applies_after_resume() {
    let (bus, _kv) = ports();
    let bus_port = Arc::new(bus.clone());
    let coordinator = Arc::new(WorkflowCoordinator::new(
        WorkflowStateMachine::new(
            Arc::new(InMemoryWorkflowStore::new()),
            bus_port.clone(),
            Arc::new(SystemClock),
            "workflow.lifecycle",
        ),
        bus_port,
        vec![PhaseBinding::new(
            "initialization",
            "phase.initialization.done",
            "phase.initialization:dlq",
        )],
        "coordinator",
    ));
    coordinator.start().await.unwrap();

    let workflow = coordinator
        .start_workflow(WorkflowType::Bugfix, Value::Null)
        .await
        .unwrap();
    let id = workflow.workflow_id;
    coordinator.pause(id).await.unwrap();

    // The phase was already in flight when the operator paused
    publish_envelope(
        &bus,
        &create_envelope(
            "phase.initialization.done",
            json!({"workflowId": id, "status": "success"}),
            Some(id.to_string()),
            None,
        ),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let paused = coordinator.machine().get(id).await.unwrap().unwrap();
    assert_eq!(paused.status, WorkflowStatus::Paused);
    assert_eq!(paused.current_stage, "initialization");

    coordinator.resume(id).await.unwrap();
    assert!(wait_for_workflow(&coordinator, id, |wf| wf.current_stage == "reproduction").await);

    coordinator.stop().await;
}
