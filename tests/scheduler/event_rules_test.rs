use super::{Fleet, DISPATCH};
use crate::common::{eventually, utc};
use foreman_core::scheduler::{
    EventRule, EventScheduler, JobDispatch, JobFilter, JobKind, JobStatus, RuleOutcome,
};
use foreman_core::state_machine::{
    InMemoryWorkflowStore, WorkflowEvent, WorkflowStateMachine, WorkflowType,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const LIFECYCLE: &str = "workflow.lifecycle";

#[tokio::test]
async fn test_workflow_created_schedules_and_dispatches_event_job() {
    let fleet = Fleet::starting_at(utc(2026, 6, 1, 10, 0));
    let dispatcher = Arc::new(fleet.dispatcher("replica-0"));
    let rules = vec![
        EventRule::create_job(
            "workflow.created",
            "announce-workflow",
            "notify.slack",
            json!({"channel": "#builds"}),
            Duration::ZERO,
        ),
        EventRule::create_job(
            "workflow.completed",
            "archive-workflow",
            "archive",
            json!({}),
            Duration::ZERO,
        ),
    ];
    let events = Arc::new(EventScheduler::new(
        Arc::clone(&fleet.scheduler),
        Arc::clone(&dispatcher),
        Arc::new(fleet.bus.clone()),
        Arc::new(fleet.kv.clone()),
        rules,
        vec![LIFECYCLE.to_string()],
        "foreman-event-scheduler",
    ));
    events.start().await.unwrap();

    let machine = WorkflowStateMachine::new(
        Arc::new(InMemoryWorkflowStore::new()),
        Arc::new(fleet.bus.clone()),
        Arc::new(fleet.clock.clone()),
        LIFECYCLE,
    );
    let workflow = machine
        .create(WorkflowType::Feature, json!({"repo": "storefront"}))
        .await
        .unwrap();
    machine.apply(workflow.workflow_id, WorkflowEvent::Start).await.unwrap();

    let scheduler = Arc::clone(&fleet.scheduler);
    let filter = JobFilter::default().with_kind(JobKind::Event);
    let probe = filter.clone();
    assert!(
        eventually(Duration::from_secs(2), move || {
            let scheduler = Arc::clone(&scheduler);
            let probe = probe.clone();
            async move { scheduler.list_jobs(&probe).await.unwrap().len() == 1 }
        })
        .await
    );

    let jobs = fleet.scheduler.list_jobs(&filter).await.unwrap();
    let job = &jobs[0];
    assert_eq!(job.name, "announce-workflow");
    assert_eq!(job.tags, vec!["workflow.created".to_string()]);
    assert_eq!(job.payload["channel"], "#builds");
    assert_eq!(job.payload["event"]["type"], "workflow.created");
    assert_eq!(
        job.payload["event"]["workflowId"],
        workflow.workflow_id.to_string()
    );

    assert_eq!(dispatcher.tick().await.unwrap().dispatched, 1);
    let dispatch: JobDispatch = fleet.bus.published(DISPATCH)[0].decode_payload().unwrap();
    assert_eq!(dispatch.job_id, job.id);
    assert_eq!(dispatch.handler_name, "notify.slack");
    let stored = fleet.scheduler.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);

    // Redelivering the lifecycle envelope creates nothing new
    let created = fleet
        .bus
        .published(LIFECYCLE)
        .into_iter()
        .find(|e| e.payload["type"] == "workflow.created")
        .unwrap();
    assert_eq!(
        events.handle_event(&created).await.unwrap(),
        vec![RuleOutcome::AlreadyApplied]
    );
    assert_eq!(fleet.scheduler.list_jobs(&filter).await.unwrap().len(), 1);

    events.stop().await;
}
