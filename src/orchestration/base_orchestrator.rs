//! # Base Orchestrator
//!
//! Runs the per-envelope processing loop for one workflow phase:
//!
//! ```text
//! received → dedup-checked → (duplicate | executing) → (published | requeued | dead-lettered)
//! ```
//!
//! Two retry layers apply. The inner layer is [`retry_with_hook`] around the
//! phase handler inside one delivery. The outer layer republishes the
//! envelope onto its input topic with `attempts + 1`, so it survives process
//! restarts. Once `attempts` reaches `max_retries` the envelope is
//! dead-lettered instead.
//!
//! Exactly-once effect per envelope id comes from [`once`] on
//! `process:<id>`. The output envelope is published inside the guarded
//! operation, so a publish failure clears the claim and the next pass runs
//! the phase again.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use foreman_core::kv::InMemoryKvStore;
//! use foreman_core::messaging::{Envelope, InMemoryMessageBus};
//! use foreman_core::orchestration::{BaseOrchestrator, OrchestratorSettings, PhaseError, PhaseHandler};
//! use serde::{Deserialize, Serialize};
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! #[derive(Deserialize)]
//! struct ScaffoldRequest { template: String }
//!
//! #[derive(Serialize)]
//! struct ScaffoldResult { files: usize }
//!
//! struct Scaffolder;
//!
//! #[async_trait]
//! impl PhaseHandler for Scaffolder {
//!     type Input = ScaffoldRequest;
//!     type Output = ScaffoldResult;
//!
//!     async fn handle(&self, input: &ScaffoldRequest, _envelope: &Envelope<Value>) -> Result<ScaffoldResult, PhaseError> {
//!         Ok(ScaffoldResult { files: input.template.len() })
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Arc::new(BaseOrchestrator::new(
//!     Scaffolder,
//!     Arc::new(InMemoryMessageBus::new()),
//!     Arc::new(InMemoryKvStore::new()),
//!     OrchestratorSettings::new("scaffolder", "phase.scaffolding", "phase.scaffolding.done"),
//! ));
//! let _subscription = orchestrator.start().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{OrchestratorConfig, RetryConfig};
use crate::kv::KvStore;
use crate::logging::{log_envelope_operation, log_error};
use crate::messaging::keys::{dlq_topic, kv_key};
use crate::messaging::{
    retry_envelope, DeadLetter, Envelope, EnvelopeHandler, MessageBus, MessagingError,
    PublishOptions, Subscription,
};
use crate::resilience::{once, retry_with_hook, OnceError, RetryPolicy};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Failure raised by a phase handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct PhaseError {
    pub message: String,
    pub stack: Option<String>,
}

impl PhaseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl From<MessagingError> for PhaseError {
    fn from(err: MessagingError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for PhaseError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for PhaseError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Phase-specific work plugged into a [`BaseOrchestrator`]
#[async_trait]
pub trait PhaseHandler: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + Sync + 'static;
    type Output: Serialize + Send + 'static;

    /// Run the phase for one decoded payload. Called once per inner retry
    /// attempt, so it must tolerate being invoked again after a failure.
    async fn handle(
        &self,
        input: &Self::Input,
        envelope: &Envelope<Value>,
    ) -> Result<Self::Output, PhaseError>;
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub name: String,
    pub input_topic: String,
    pub output_topic: String,
    pub dlq_topic: String,
    pub group: String,
    /// Outer attempts before dead-lettering
    pub max_retries: u32,
    pub dedup_ttl: Duration,
    pub idempotency_ttl: Duration,
    /// Inner retry around the phase handler
    pub retry: RetryPolicy,
}

impl OrchestratorSettings {
    pub fn new(
        name: impl Into<String>,
        input_topic: impl Into<String>,
        output_topic: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let input_topic = input_topic.into();
        Self {
            dlq_topic: dlq_topic(&input_topic),
            group: name.clone(),
            name,
            input_topic,
            output_topic: output_topic.into(),
            max_retries: crate::constants::DEFAULT_MAX_RETRIES,
            dedup_ttl: crate::constants::DEFAULT_DEDUP_TTL,
            idempotency_ttl: crate::constants::DEFAULT_IDEMPOTENCY_TTL,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(
        name: impl Into<String>,
        input_topic: impl Into<String>,
        output_topic: impl Into<String>,
        orchestrator: &OrchestratorConfig,
        retry: &RetryConfig,
    ) -> Self {
        Self::new(name, input_topic, output_topic)
            .with_max_retries(orchestrator.max_retries)
            .with_dedup_ttl(orchestrator.dedup_ttl())
            .with_idempotency_ttl(orchestrator.idempotency_ttl())
            .with_retry_policy(retry.policy())
    }

    pub fn with_dlq_topic(mut self, topic: impl Into<String>) -> Self {
        self.dlq_topic = topic.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_dedup_ttl(mut self, ttl: Duration) -> Self {
        self.dedup_ttl = ttl;
        self
    }

    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Phase ran and its result envelope was published
    Published { output_id: Uuid },
    /// Same envelope id and attempt already seen
    Duplicate,
    /// An earlier pass of this envelope id already completed the phase
    AlreadyProcessed,
    /// Republished onto the input topic with the new attempt count
    Requeued { attempts: u32 },
    /// Sent to the dead-letter topic with the final attempt count
    DeadLettered { attempts: u32 },
}

/// Generic subscribe → dedup → execute → publish/requeue/dead-letter loop
pub struct BaseOrchestrator<H: PhaseHandler> {
    handler: H,
    bus: Arc<dyn MessageBus>,
    kv: Arc<dyn KvStore>,
    settings: OrchestratorSettings,
}

impl<H: PhaseHandler> std::fmt::Debug for BaseOrchestrator<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseOrchestrator")
            .field("settings", &self.settings)
            .field("bus", &self.bus.provider_name())
            .finish()
    }
}

impl<H: PhaseHandler> BaseOrchestrator<H> {
    pub fn new(
        handler: H,
        bus: Arc<dyn MessageBus>,
        kv: Arc<dyn KvStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            handler,
            bus,
            kv,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Subscribe to the input topic under the orchestrator's group
    pub async fn start(self: &Arc<Self>) -> Result<Subscription, MessagingError> {
        info!(
            orchestrator = %self.settings.name,
            input_topic = %self.settings.input_topic,
            output_topic = %self.settings.output_topic,
            group = %self.settings.group,
            "Starting orchestrator"
        );
        let handler: Arc<dyn EnvelopeHandler> = self.clone();
        self.bus
            .subscribe(&self.settings.input_topic, &self.settings.group, handler)
            .await
    }

    /// Process one delivery.
    ///
    /// Every phase failure is handled here (requeue or dead-letter) and
    /// reported as `Ok`. `Err` means the coordination store or the requeue
    /// publish failed; the delivery stays unacknowledged and its dedup
    /// marker is cleared so the redelivery is processed.
    #[instrument(skip(self, envelope), fields(
        orchestrator = %self.settings.name,
        envelope_id = %envelope.id,
        correlation_id = %envelope.correlation_id,
        attempts = envelope.attempts
    ))]
    pub async fn process(&self, envelope: Envelope<Value>) -> Result<ProcessOutcome, MessagingError> {
        let dedup_key = kv_key(&format!("dedup:{}:{}", envelope.id, envelope.attempts));
        let fresh = self
            .kv
            .set_if_absent(&dedup_key, &Utc::now().to_rfc3339(), self.settings.dedup_ttl)
            .await?;
        if !fresh {
            log_envelope_operation(
                "dedup",
                &envelope.id.to_string(),
                &envelope.topic,
                envelope.attempts,
                "duplicate",
                None,
            );
            return Ok(ProcessOutcome::Duplicate);
        }

        let result = self.execute(&envelope).await;
        if result.is_err() {
            if let Err(e) = self.kv.delete(&dedup_key).await {
                warn!(key = %dedup_key, error = %e, "Failed to clear dedup marker");
            }
        }
        result
    }

    async fn execute(&self, envelope: &Envelope<Value>) -> Result<ProcessOutcome, MessagingError> {
        let input: H::Input = match envelope.decode_payload() {
            Ok(input) => input,
            Err(e) => {
                warn!(error = %e, "Payload failed validation, dead-lettering");
                let attempts = envelope.attempts.saturating_add(1);
                self.dead_letter(envelope, &PhaseError::from(e), attempts)
                    .await;
                return Ok(ProcessOutcome::DeadLettered { attempts });
            }
        };

        let process_key = format!("process:{}", envelope.id);
        let outcome = once(
            self.kv.as_ref(),
            &process_key,
            self.settings.idempotency_ttl,
            || self.run_phase(&input, envelope),
        )
        .await;

        match outcome {
            Ok(Some(output_id)) => {
                log_envelope_operation(
                    "publish",
                    &envelope.id.to_string(),
                    &self.settings.output_topic,
                    envelope.attempts,
                    "success",
                    None,
                );
                Ok(ProcessOutcome::Published { output_id })
            }
            Ok(None) => {
                debug!("Envelope already processed by an earlier pass");
                Ok(ProcessOutcome::AlreadyProcessed)
            }
            Err(OnceError::Store(e)) => Err(e.into()),
            Err(OnceError::Operation(err)) => self.handle_failure(envelope, err).await,
        }
    }

    async fn run_phase(
        &self,
        input: &H::Input,
        envelope: &Envelope<Value>,
    ) -> Result<Uuid, PhaseError> {
        let handler = &self.handler;
        let name = &self.settings.name;
        let output = retry_with_hook(
            &self.settings.retry,
            move |_attempt| handler.handle(input, envelope),
            |attempt, err: &PhaseError, delay| {
                debug!(
                    orchestrator = %name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Phase attempt failed"
                );
            },
        )
        .await?;

        let payload = success_payload(serde_json::to_value(output).map_err(MessagingError::from)?);
        let result = envelope.follow_up(self.settings.output_topic.clone(), payload);
        self.bus
            .publish(&self.settings.output_topic, &result, PublishOptions::default())
            .await?;
        Ok(result.id)
    }

    async fn handle_failure(
        &self,
        envelope: &Envelope<Value>,
        err: PhaseError,
    ) -> Result<ProcessOutcome, MessagingError> {
        let attempts = envelope.attempts.saturating_add(1);

        if attempts >= self.settings.max_retries {
            self.dead_letter(envelope, &err, attempts).await;
            return Ok(ProcessOutcome::DeadLettered { attempts });
        }

        let requeued = retry_envelope(envelope, err.message.clone());
        self.bus
            .publish(&self.settings.input_topic, &requeued, PublishOptions::default())
            .await?;
        log_envelope_operation(
            "requeue",
            &envelope.id.to_string(),
            &self.settings.input_topic,
            attempts,
            "retry",
            Some(&err.message),
        );
        Ok(ProcessOutcome::Requeued { attempts })
    }

    /// Best-effort: a failed dead-letter publish is logged and dropped
    async fn dead_letter(&self, envelope: &Envelope<Value>, err: &PhaseError, attempts: u32) {
        let letter = DeadLetter {
            original: envelope.clone(),
            error: err.message.clone(),
            stack: err.stack.clone(),
            attempts,
            failed_at: Utc::now(),
            topic: self.settings.input_topic.clone(),
        };

        let mut dlq = match envelope
            .follow_up(self.settings.dlq_topic.clone(), letter)
            .into_json()
        {
            Ok(dlq) => dlq,
            Err(e) => {
                error!(error = %e, "Failed to encode dead letter");
                return;
            }
        };
        dlq.attempts = attempts;

        match self
            .bus
            .publish(&self.settings.dlq_topic, &dlq, PublishOptions::default())
            .await
        {
            Ok(_) => log_envelope_operation(
                "dead_letter",
                &envelope.id.to_string(),
                &self.settings.dlq_topic,
                attempts,
                "dead_lettered",
                Some(&err.message),
            ),
            Err(e) => log_error(
                &self.settings.name,
                "dead_letter",
                &e.to_string(),
                Some(&format!("envelope {} to {}", envelope.id, self.settings.dlq_topic)),
            ),
        }
    }
}

#[async_trait]
impl<H: PhaseHandler> EnvelopeHandler for BaseOrchestrator<H> {
    async fn handle(&self, envelope: Envelope<Value>) -> Result<(), MessagingError> {
        self.process(envelope).await.map(|_| ())
    }
}

/// `{...result, status: "success"}`; a non-object result is nested under `result`
fn success_payload(result: Value) -> Value {
    match result {
        Value::Object(mut map) => {
            map.insert("status".to_string(), json!("success"));
            Value::Object(map)
        }
        other => json!({ "result": other, "status": "success" }),
    }
}
