//! # Scheduler
//!
//! Time- and event-triggered job dispatch on top of the message bus and the
//! coordination store.
//!
//! - [`JobScheduler`] - job registry: schedule, update, pause, resume,
//!   cancel, unschedule and queries
//! - [`Dispatcher`] - finds due jobs and publishes one dispatch per due run
//!   under a per-job distributed lock
//! - [`Executor`] - consumes dispatches, runs registered handlers with
//!   timeout and retry, records executions
//! - [`EventScheduler`] - maps lifecycle events to new jobs or triggers
//!
//! Lifecycle events (`job.*`, `execution.*`) go out on the scheduler events
//! topic through [`SchedulerEventPublisher`].

pub mod cron_schedule;
pub mod dispatcher;
pub mod errors;
pub mod event_scheduler;
pub mod events;
pub mod execution;
pub mod executor;
pub mod job;
pub mod registry;
pub mod service;
pub mod store;

pub use cron_schedule::{parse_timezone, CronSchedule};
pub use dispatcher::{DispatchOutcome, Dispatcher, TickReport};
pub use errors::{RegistryError, SchedulerError};
pub use event_scheduler::{EventAction, EventRule, EventScheduler, RuleOutcome};
pub use events::{SchedulerEvent, SchedulerEventPublisher};
pub use execution::{ExecutionStatus, JobExecution};
pub use executor::{ExecutionReport, Executor};
pub use job::{
    DispatchReason, JobDispatch, JobFilter, JobKind, JobPriority, JobSpec, JobStatus, JobUpdate,
    ScheduledJob,
};
pub use registry::{HandlerRegistry, JobContext, JobHandler, JobHandlerError};
pub use service::JobScheduler;
pub use store::{modify_job, InMemoryJobStore, JobStore};
