//! # System Constants
//!
//! Topic names, consumer groups, lifecycle event names and coordination TTL
//! defaults shared by the orchestrator and scheduler subsystems.

use std::time::Duration;

/// Well-known topics
pub mod topics {
    /// Workflow lifecycle notifications (created, started, completed, ...)
    pub const WORKFLOW_LIFECYCLE: &str = "workflow.lifecycle";
    /// Scheduler lifecycle events (job.*, execution.*)
    pub const SCHEDULER_EVENTS: &str = "scheduler.events";
    /// Dispatch envelopes consumed by the job executor
    pub const JOB_DISPATCH: &str = "scheduler.job-dispatch";
    /// Suffix appended to a topic name to form its dead-letter topic
    pub const DLQ_SUFFIX: &str = ":dlq";
}

/// Consumer group names for built-in roles
pub mod groups {
    pub const JOB_EXECUTOR: &str = "foreman-executor";
    pub const EVENT_SCHEDULER: &str = "foreman-event-scheduler";
    pub const WORKFLOW_COORDINATOR: &str = "foreman-workflow-coordinator";
}

/// Workflow lifecycle notification names
pub mod workflow_events {
    pub const CREATED: &str = "workflow.created";
    pub const STARTED: &str = "workflow.started";
    pub const STAGE_ADVANCED: &str = "workflow.stage_advanced";
    pub const PAUSED: &str = "workflow.paused";
    pub const RESUMED: &str = "workflow.resumed";
    pub const FAILED: &str = "workflow.failed";
    pub const RETRIED: &str = "workflow.retried";
    pub const CANCELLED: &str = "workflow.cancelled";
    pub const COMPLETED: &str = "workflow.completed";
}

/// Scheduler lifecycle event names published for external consumers
pub mod scheduler_events {
    pub const JOB_CREATED: &str = "job.created";
    pub const JOB_UPDATED: &str = "job.updated";
    pub const JOB_DELETED: &str = "job.deleted";
    pub const JOB_PAUSED: &str = "job.paused";
    pub const JOB_RESUMED: &str = "job.resumed";
    pub const JOB_CANCELLED: &str = "job.cancelled";
    pub const JOB_DISPATCH: &str = "job.dispatch";
    pub const EXECUTION_SUCCESS: &str = "execution.success";
    pub const EXECUTION_FAILED: &str = "execution.failed";
    pub const EXECUTION_RETRY_SCHEDULED: &str = "execution.retry_scheduled";
}

/// Default lifetime of a per-delivery dedup marker
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(60 * 60);

/// Default lifetime of an idempotency completion marker
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default outer retry budget before an envelope is dead-lettered
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default lifetime of a dispatch lock
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Default renewal period for a held dispatch lock
pub const DEFAULT_LOCK_RENEW_INTERVAL: Duration = Duration::from_secs(10);

/// How far in the past a one-time job's `executeAt` may be when scheduled
pub const ONE_TIME_PAST_TOLERANCE: Duration = Duration::from_secs(5);

/// TTL of the `health:<component>` heartbeat keys
pub const HEALTH_KEY_TTL: Duration = Duration::from_secs(30);
