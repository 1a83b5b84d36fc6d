//! # Executor
//!
//! Consumes the job-dispatch topic and runs the registered handler for each
//! dispatch. Each attempt is recorded as its own [`JobExecution`] row; a
//! failed or timed-out attempt is retried after the policy's backoff until
//! the job's `maxRetries` is spent.
//!
//! The dispatch envelope id is the idempotency key, so a redelivered
//! dispatch runs its handler once.

use super::errors::SchedulerError;
use super::events::SchedulerEventPublisher;
use super::execution::{ExecutionStatus, JobExecution};
use super::job::{JobDispatch, JobStatus};
use super::registry::{HandlerRegistry, JobContext, JobHandler};
use super::store::{modify_job, JobStore};
use crate::constants::{scheduler_events, DEFAULT_IDEMPOTENCY_TTL};
use crate::kv::KvStore;
use crate::logging::log_job_operation;
use crate::messaging::{handler_fn, Envelope, MessageBus, MessagingError, Subscription};
use crate::resilience::idempotency::{once, OnceError};
use crate::resilience::RetryPolicy;
use crate::utils::clock::Clock;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Final outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub job_id: Uuid,
    pub dispatch_id: Option<Uuid>,
    /// Status of the last attempt
    pub status: ExecutionStatus,
    pub attempts: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Execution ids in attempt order
    pub executions: Vec<Uuid>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

pub struct Executor {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    events: SchedulerEventPublisher,
    clock: Arc<dyn Clock>,
    kv: Arc<dyn KvStore>,
    retry: RetryPolicy,
    idempotency_ttl: Duration,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .field("idempotency_ttl", &self.idempotency_ttl)
            .finish()
    }
}

impl Executor {
    /// `retry` supplies the backoff between attempts; the attempt count comes
    /// from each job's `maxRetries`.
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        events: SchedulerEventPublisher,
        clock: Arc<dyn Clock>,
        kv: Arc<dyn KvStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            clock,
            kv,
            retry,
            idempotency_ttl: DEFAULT_IDEMPOTENCY_TTL,
        }
    }

    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Consume `topic` as a member of `group`
    pub async fn start(
        self: &Arc<Self>,
        bus: &dyn MessageBus,
        topic: &str,
        group: &str,
    ) -> Result<Subscription, MessagingError> {
        let this = Arc::clone(self);
        let handler = handler_fn(move |envelope| {
            let this = Arc::clone(&this);
            async move { this.handle_dispatch(envelope).await }
        });
        let subscription = bus.subscribe(topic, group, handler).await?;
        info!(topic = %topic, group = %group, "Job executor started");
        Ok(subscription)
    }

    /// Run one dispatch envelope at most once.
    ///
    /// Undecodable payloads are acknowledged and dropped. Store failures are
    /// returned so the delivery stays pending.
    pub async fn handle_dispatch(&self, envelope: Envelope<Value>) -> Result<(), MessagingError> {
        let dispatch: JobDispatch = match envelope.decode_payload() {
            Ok(dispatch) => dispatch,
            Err(e) => {
                warn!(envelope_id = %envelope.id, error = %e, "Dropping undecodable dispatch");
                return Ok(());
            }
        };

        let key = format!("dispatch:{}", envelope.id);
        let outcome = once(self.kv.as_ref(), &key, self.idempotency_ttl, || {
            self.execute(&dispatch, Some(envelope.id))
        })
        .await;

        match outcome {
            Ok(Some(report)) => {
                debug!(
                    job_id = %report.job_id,
                    status = %report.status,
                    attempts = report.attempts,
                    "Dispatch handled"
                );
                Ok(())
            }
            Ok(None) => {
                debug!(envelope_id = %envelope.id, job_id = %dispatch.job_id, "Dispatch already executed");
                Ok(())
            }
            Err(OnceError::Store(e)) => Err(MessagingError::handler(e.to_string())),
            Err(OnceError::Operation(e)) => Err(MessagingError::handler(e.to_string())),
        }
    }

    /// Run `dispatch` through its handler with retries.
    ///
    /// Handler failures end up in the report; only store failures are `Err`.
    pub async fn execute(
        &self,
        dispatch: &JobDispatch,
        dispatch_id: Option<Uuid>,
    ) -> Result<ExecutionReport, SchedulerError> {
        let handler = match self.registry.get(&dispatch.handler_name) {
            Ok(handler) => handler,
            Err(e) => return self.fail_unresolved(dispatch, dispatch_id, e.to_string()).await,
        };

        let total_attempts = dispatch.max_retries.saturating_add(1);
        let timeout = Duration::from_millis(dispatch.timeout_ms);
        let mut executions = Vec::new();
        let mut attempt = 1;

        loop {
            let (execution, result) = self
                .run_attempt(handler.as_ref(), dispatch, dispatch_id, attempt, timeout)
                .await?;
            executions.push(execution.execution_id);

            if execution.status == ExecutionStatus::Success {
                self.events
                    .publish(
                        scheduler_events::EXECUTION_SUCCESS,
                        dispatch.job_id,
                        Some(execution.execution_id),
                        json!({
                            "attempt": attempt,
                            "durationMs": execution.duration_ms(),
                        }),
                    )
                    .await;
                self.record_outcome(dispatch, true).await?;
                return Ok(ExecutionReport {
                    job_id: dispatch.job_id,
                    dispatch_id,
                    status: execution.status,
                    attempts: attempt,
                    result,
                    error: None,
                    executions,
                });
            }

            if attempt >= total_attempts {
                self.events
                    .publish(
                        scheduler_events::EXECUTION_FAILED,
                        dispatch.job_id,
                        Some(execution.execution_id),
                        json!({
                            "attempt": attempt,
                            "status": execution.status,
                            "error": execution.error,
                            "retryable": false,
                        }),
                    )
                    .await;
                self.record_outcome(dispatch, false).await?;
                return Ok(ExecutionReport {
                    job_id: dispatch.job_id,
                    dispatch_id,
                    status: execution.status,
                    attempts: attempt,
                    result: None,
                    error: execution.error,
                    executions,
                });
            }

            let delay = self.retry.delay_for(attempt);
            self.events
                .publish(
                    scheduler_events::EXECUTION_RETRY_SCHEDULED,
                    dispatch.job_id,
                    Some(execution.execution_id),
                    json!({
                        "attempt": attempt,
                        "nextAttempt": attempt + 1,
                        "delayMs": delay.as_millis() as u64,
                        "error": execution.error,
                    }),
                )
                .await;
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn run_attempt(
        &self,
        handler: &dyn JobHandler,
        dispatch: &JobDispatch,
        dispatch_id: Option<Uuid>,
        attempt: u32,
        timeout: Duration,
    ) -> Result<(JobExecution, Option<Value>), SchedulerError> {
        let mut execution =
            JobExecution::start(dispatch.job_id, attempt, dispatch_id, self.clock.now());
        self.store.record_execution(&execution).await?;

        let context = JobContext {
            job_id: dispatch.job_id,
            job_name: dispatch.job_name.clone(),
            execution_id: execution.execution_id,
            attempt,
            handler_type: dispatch.handler_type.clone(),
            payload: dispatch.payload.clone(),
        };

        let (status, result, error) = match tokio::time::timeout(timeout, handler.run(context)).await
        {
            Ok(Ok(value)) => (ExecutionStatus::Success, Some(value), None),
            Ok(Err(e)) => (ExecutionStatus::Failed, None, Some(e.0)),
            Err(_) => (
                ExecutionStatus::Timeout,
                None,
                Some(format!("Handler timed out after {}ms", dispatch.timeout_ms)),
            ),
        };

        execution.finish(status, error, self.clock.now());
        self.store.record_execution(&execution).await?;

        let execution_id = execution.execution_id.to_string();
        log_job_operation(
            "execute",
            Some(&dispatch.job_id.to_string()),
            Some(&execution_id),
            status.as_str(),
            execution.error.as_deref(),
        );
        Ok((execution, result))
    }

    /// A missing handler fails the dispatch on its single attempt
    async fn fail_unresolved(
        &self,
        dispatch: &JobDispatch,
        dispatch_id: Option<Uuid>,
        error: String,
    ) -> Result<ExecutionReport, SchedulerError> {
        let now = self.clock.now();
        let mut execution = JobExecution::start(dispatch.job_id, 1, dispatch_id, now);
        execution.finish(ExecutionStatus::Failed, Some(error.clone()), now);
        self.store.record_execution(&execution).await?;

        warn!(
            job_id = %dispatch.job_id,
            handler = %dispatch.handler_name,
            "No handler registered for job"
        );
        self.events
            .publish(
                scheduler_events::EXECUTION_FAILED,
                dispatch.job_id,
                Some(execution.execution_id),
                json!({
                    "attempt": 1,
                    "status": ExecutionStatus::Failed,
                    "error": error,
                    "retryable": false,
                }),
            )
            .await;
        self.record_outcome(dispatch, false).await?;

        Ok(ExecutionReport {
            job_id: dispatch.job_id,
            dispatch_id,
            status: ExecutionStatus::Failed,
            attempts: 1,
            result: None,
            error: Some(error),
            executions: vec![execution.execution_id],
        })
    }

    /// Count the execution on the job; a one-shot job whose dispatch failed
    /// ends `failed` instead of `completed`.
    async fn record_outcome(&self, dispatch: &JobDispatch, succeeded: bool) -> Result<(), SchedulerError> {
        let result = modify_job(self.store.as_ref(), dispatch.job_id, self.clock.now(), |job| {
            job.executions_count += 1;
            if !succeeded && !job.kind.is_recurring() && job.status == JobStatus::Completed {
                job.status = JobStatus::Failed;
            }
            Ok(true)
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(SchedulerError::JobNotFound { job_id }) => {
                debug!(job_id = %job_id, "Job removed before its execution finished");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
