//! # Event Scheduler
//!
//! Turns lifecycle events from the bus into scheduler work. Each
//! [`EventRule`] matches an event `type` and either schedules a fresh
//! event-kind job or triggers an existing job through the [`Dispatcher`].
//!
//! Rules are applied at most once per delivered envelope, keyed by
//! `event:<envelope id>:<rule index>`.

use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::errors::SchedulerError;
use super::job::JobSpec;
use super::service::JobScheduler;
use crate::constants::DEFAULT_IDEMPOTENCY_TTL;
use crate::kv::KvStore;
use crate::messaging::{handler_fn, Envelope, MessageBus, MessagingError, Subscription};
use crate::resilience::idempotency::{once, OnceError};
use chrono::TimeDelta;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest delay a create rule may put between an event and its job (one year)
pub const MAX_RULE_DELAY_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Reaction to one event type
///
/// ```toml
/// [[scheduler.event_rules]]
/// event_type = "workflow.completed"
/// action = { type = "create_one_time_job", name = "notify", handler_name = "notify.slack", delay_ms = 5000 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRule {
    pub event_type: String,
    pub action: EventAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventAction {
    /// Schedule a new event job `delay_ms` after the event arrives
    CreateOneTimeJob {
        name: String,
        handler_name: String,
        #[serde(default)]
        handler_type: Option<String>,
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        delay_ms: u64,
    },
    /// Dispatch an existing job now
    TriggerJob { job_id: Uuid },
}

impl EventRule {
    pub fn create_job(
        event_type: impl Into<String>,
        name: impl Into<String>,
        handler_name: impl Into<String>,
        payload: Value,
        delay: Duration,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            action: EventAction::CreateOneTimeJob {
                name: name.into(),
                handler_name: handler_name.into(),
                handler_type: None,
                payload,
                delay_ms: delay.as_millis() as u64,
            },
        }
    }

    /// Reject rules no event could ever satisfy
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.event_type.trim().is_empty() {
            return Err(SchedulerError::validation("event rule has an empty event_type"));
        }
        if let EventAction::CreateOneTimeJob { delay_ms, .. } = &self.action {
            if *delay_ms > MAX_RULE_DELAY_MS {
                return Err(SchedulerError::validation(format!(
                    "delay_ms {delay_ms} of rule for {} exceeds {MAX_RULE_DELAY_MS}",
                    self.event_type
                )));
            }
        }
        Ok(())
    }

    pub fn trigger_job(event_type: impl Into<String>, job_id: Uuid) -> Self {
        Self {
            event_type: event_type.into(),
            action: EventAction::TriggerJob { job_id },
        }
    }
}

/// What one matching rule did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    JobCreated { job_id: Uuid },
    JobTriggered { job_id: Uuid, dispatch_id: Uuid },
    /// This envelope already applied the rule
    AlreadyApplied,
    /// The rule could not apply (target missing, paused, invalid spec)
    Skipped { reason: String },
}

pub struct EventScheduler {
    scheduler: Arc<JobScheduler>,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<dyn MessageBus>,
    kv: Arc<dyn KvStore>,
    rules: Vec<EventRule>,
    topics: Vec<String>,
    group: String,
    idempotency_ttl: Duration,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl std::fmt::Debug for EventScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScheduler")
            .field("rules", &self.rules)
            .field("topics", &self.topics)
            .field("group", &self.group)
            .finish()
    }
}

impl EventScheduler {
    pub fn new(
        scheduler: Arc<JobScheduler>,
        dispatcher: Arc<Dispatcher>,
        bus: Arc<dyn MessageBus>,
        kv: Arc<dyn KvStore>,
        rules: Vec<EventRule>,
        topics: Vec<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            scheduler,
            dispatcher,
            bus,
            kv,
            rules,
            topics,
            group: group.into(),
            idempotency_ttl: DEFAULT_IDEMPOTENCY_TTL,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    pub fn rules(&self) -> &[EventRule] {
        &self.rules
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Subscribe to every configured topic
    pub async fn start(self: &Arc<Self>) -> Result<(), MessagingError> {
        let mut started = Vec::with_capacity(self.topics.len());
        for topic in &self.topics {
            let this = Arc::clone(self);
            let handler = handler_fn(move |envelope| {
                let this = Arc::clone(&this);
                async move {
                    this.handle_event(&envelope)
                        .await
                        .map(|_| ())
                        .map_err(|e| MessagingError::handler(e.to_string()))
                }
            });
            started.push(self.bus.subscribe(topic, &self.group, handler).await?);
        }

        info!(
            topics = ?self.topics,
            rules = self.rules.len(),
            group = %self.group,
            "Event scheduler started"
        );
        self.subscriptions.lock().extend(started);
        Ok(())
    }

    /// Drop every subscription started by [`start`](Self::start)
    pub async fn stop(&self) {
        let subscriptions: Vec<Subscription> = self.subscriptions.lock().drain(..).collect();
        join_all(subscriptions.into_iter().map(Subscription::unsubscribe)).await;
    }

    /// Apply every rule matching the envelope's `type`.
    ///
    /// Rules that cannot apply are reported as [`RuleOutcome::Skipped`];
    /// store and bus failures are returned so the delivery is retried.
    pub async fn handle_event(
        &self,
        envelope: &Envelope<Value>,
    ) -> Result<Vec<RuleOutcome>, SchedulerError> {
        let Some(event_type) = envelope.payload.get("type").and_then(Value::as_str) else {
            debug!(envelope_id = %envelope.id, topic = %envelope.topic, "Event without a type, ignoring");
            return Ok(Vec::new());
        };

        let mut outcomes = Vec::new();
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.event_type != event_type {
                continue;
            }

            let key = format!("event:{}:{index}", envelope.id);
            let outcome = match once(self.kv.as_ref(), &key, self.idempotency_ttl, || {
                self.apply(rule, envelope)
            })
            .await
            {
                Ok(Some(outcome)) => outcome,
                Ok(None) => RuleOutcome::AlreadyApplied,
                Err(OnceError::Store(e)) => return Err(e.into()),
                Err(OnceError::Operation(e)) if skippable(&e) => {
                    warn!(
                        event_type = %event_type,
                        rule = index,
                        error = %e,
                        "Event rule skipped"
                    );
                    RuleOutcome::Skipped {
                        reason: e.to_string(),
                    }
                }
                Err(OnceError::Operation(e)) => return Err(e),
            };
            outcomes.push(outcome);
        }

        if !outcomes.is_empty() {
            debug!(event_type = %event_type, envelope_id = %envelope.id, ?outcomes, "Event handled");
        }
        Ok(outcomes)
    }

    async fn apply(
        &self,
        rule: &EventRule,
        envelope: &Envelope<Value>,
    ) -> Result<RuleOutcome, SchedulerError> {
        match &rule.action {
            EventAction::CreateOneTimeJob {
                name,
                handler_name,
                handler_type,
                payload,
                delay_ms,
            } => {
                let execute_at = i64::try_from(*delay_ms)
                    .ok()
                    .and_then(TimeDelta::try_milliseconds)
                    .and_then(|delay| self.scheduler.clock().now().checked_add_signed(delay))
                    .ok_or_else(|| {
                        SchedulerError::validation(format!(
                            "delay_ms {delay_ms} of rule for {} is out of range",
                            rule.event_type
                        ))
                    })?;
                let mut spec = JobSpec::event(name.clone(), execute_at, handler_name.clone())
                    .with_payload(merge_event(payload, &envelope.payload))
                    .with_tags([rule.event_type.clone()]);
                if let Some(handler_type) = handler_type {
                    spec = spec.with_handler_type(handler_type.clone());
                }
                let job = self.scheduler.schedule(spec).await?;
                info!(job_id = %job.id, event_type = %rule.event_type, "Event job created");
                Ok(RuleOutcome::JobCreated { job_id: job.id })
            }
            EventAction::TriggerJob { job_id } => {
                let reason = format!("event:{}", rule.event_type);
                match self.dispatcher.trigger(*job_id, reason).await? {
                    DispatchOutcome::Dispatched { dispatch_id } => Ok(RuleOutcome::JobTriggered {
                        job_id: *job_id,
                        dispatch_id,
                    }),
                    DispatchOutcome::Contended => Ok(RuleOutcome::Skipped {
                        reason: format!("job {job_id} is being dispatched by another replica"),
                    }),
                    DispatchOutcome::Stale => Ok(RuleOutcome::Skipped {
                        reason: format!("job {job_id} is not active"),
                    }),
                }
            }
        }
    }
}

/// Failures that no redelivery would fix
fn skippable(error: &SchedulerError) -> bool {
    error.is_validation() || matches!(error, SchedulerError::JobNotFound { .. })
}

/// The rule payload with the triggering event under `event`
fn merge_event(rule_payload: &Value, event: &Value) -> Value {
    match rule_payload {
        Value::Object(map) => {
            let mut merged = map.clone();
            merged.insert("event".to_string(), event.clone());
            Value::Object(merged)
        }
        Value::Null => json!({ "event": event }),
        other => json!({ "data": other, "event": event }),
    }
}
