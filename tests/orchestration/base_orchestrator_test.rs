use crate::common::{eventually, fast_retry, ports};
use async_trait::async_trait;
use foreman_core::messaging::{
    create_envelope, publish_envelope, retry_envelope, DeadLetter, Envelope,
};
use foreman_core::orchestration::{
    BaseOrchestrator, OrchestratorSettings, PhaseError, PhaseHandler, ProcessOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildRequest {
    workflow_id: String,
    target: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildResult {
    workflow_id: String,
    artifact: String,
}

/// Fails its first `failures` calls, then succeeds
struct FlakyBuilder {
    failures: u32,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl PhaseHandler for FlakyBuilder {
    type Input = BuildRequest;
    type Output = BuildResult;

    async fn handle(
        &self,
        input: &BuildRequest,
        _envelope: &Envelope<Value>,
    ) -> Result<BuildResult, PhaseError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(PhaseError::new(format!("build {call} failed")));
        }
        Ok(BuildResult {
            workflow_id: input.workflow_id.clone(),
            artifact: format!("{}.tar.gz", input.target),
        })
    }
}

fn request() -> Envelope<Value> {
    create_envelope(
        "phase.build",
        json!({"workflowId": "wf-42", "target": "api"}),
        Some("wf-42".to_string()),
        None,
    )
}

fn orchestrator(
    failures: u32,
    inner_attempts: u32,
) -> (
    Arc<BaseOrchestrator<FlakyBuilder>>,
    foreman_core::messaging::InMemoryMessageBus,
    Arc<AtomicU32>,
) {
    let (bus, kv) = ports();
    let calls = Arc::new(AtomicU32::new(0));
    let settings = OrchestratorSettings::new("builder", "phase.build", "phase.build.done")
        .with_retry_policy(fast_retry(inner_attempts));
    let orchestrator = Arc::new(BaseOrchestrator::new(
        FlakyBuilder {
            failures,
            calls: Arc::clone(&calls),
        },
        Arc::new(bus.clone()),
        Arc::new(kv),
        settings,
    ));
    (orchestrator, bus, calls)
}

#[tokio::test]
async fn test_replayed_envelope_has_single_effect() {
    let (orchestrator, bus, calls) = orchestrator(0, 1);
    let envelope = request();

    let first = orchestrator.process(envelope.clone()).await.unwrap();
    assert!(matches!(first, ProcessOutcome::Published { .. }));

    // Same delivery again, then a later pass of the same message id
    assert_eq!(
        orchestrator.process(envelope.clone()).await.unwrap(),
        ProcessOutcome::Duplicate
    );
    assert_eq!(
        orchestrator
            .process(retry_envelope(&envelope, "redelivered"))
            .await
            .unwrap(),
        ProcessOutcome::AlreadyProcessed
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let outputs = bus.published("phase.build.done");
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].correlation_id, "wf-42");
    assert_eq!(outputs[0].payload["artifact"], "api.tar.gz");
    assert_eq!(outputs[0].payload["status"], "success");
}

#[tokio::test]
async fn test_inner_retry_succeeds_on_third_attempt() {
    let (orchestrator, bus, calls) = orchestrator(2, 3);

    let outcome = orchestrator.process(request()).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Published { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(bus.published("phase.build.done").len(), 1);
    assert!(bus.published("phase.build").is_empty());
    assert!(bus.published("phase.build:dlq").is_empty());
}

#[tokio::test]
async fn test_dead_letter_only_after_outer_retries_are_spent() {
    let (orchestrator, bus, calls) = orchestrator(u32::MAX, 1);
    let _subscription = orchestrator.start().await.unwrap();

    publish_envelope(&bus, &request()).await.unwrap();

    let letters = bus
        .wait_for_published("phase.build:dlq", 1, Duration::from_secs(5))
        .await;
    assert_eq!(letters.len(), 1);

    let letter: DeadLetter = letters[0].decode_payload().unwrap();
    assert_eq!(letter.attempts, 5);
    assert_eq!(letter.error, "build 5 failed");
    assert_eq!(letter.topic, "phase.build");
    assert_eq!(letter.original.correlation_id, "wf-42");

    // Original plus four requeues, every pass ran the handler once
    let passes = bus.published("phase.build");
    assert_eq!(passes.len(), 5);
    let attempts: Vec<u32> = passes.iter().map(|e| e.attempts).collect();
    assert_eq!(attempts, vec![0, 1, 2, 3, 4]);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert!(bus.published("phase.build.done").is_empty());
}

#[tokio::test]
async fn test_requeued_pass_can_succeed() {
    let (orchestrator, bus, _calls) = orchestrator(2, 1);
    let _subscription = orchestrator.start().await.unwrap();

    publish_envelope(&bus, &request()).await.unwrap();

    let outputs = bus
        .wait_for_published("phase.build.done", 1, Duration::from_secs(5))
        .await;
    assert_eq!(outputs.len(), 1);
    let probe = bus.clone();
    assert!(
        eventually(Duration::from_millis(200), move || {
            let probe = probe.clone();
            async move { probe.published("phase.build").len() == 3 }
        })
        .await
    );
    assert!(bus.published("phase.build:dlq").is_empty());
}

#[tokio::test]
async fn test_invalid_payload_skips_retries() {
    let (orchestrator, bus, calls) = orchestrator(0, 3);
    let bad = create_envelope("phase.build", json!({"target": 7}), None, None);

    let outcome = orchestrator.process(bad).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::DeadLettered { attempts: 1 });
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(bus.published("phase.build:dlq").len(), 1);
}
