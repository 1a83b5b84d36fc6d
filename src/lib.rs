#![allow(clippy::doc_markdown)] // Allow technical terms like XAUTOCLAIM, PostgreSQL in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Foreman Core
//!
//! Message-driven coordination of long-running, multi-stage workflows across
//! independent agent processes, plus time- and event-triggered job dispatch.
//!
//! ## Overview
//!
//! Everything in this crate sits on two ports:
//!
//! - a **message bus** ([`messaging::MessageBus`]) with consumer groups and
//!   at-least-once delivery (Redis Streams in production, in-memory for tests)
//! - a **key-value store** ([`kv::KvStore`]) holding short-lived coordination
//!   state: dedup markers, idempotency markers and distributed locks
//!
//! On top of those ports:
//!
//! - [`orchestration::BaseOrchestrator`] runs the subscribe → dedup → execute
//!   with retry → publish / requeue / dead-letter loop for one workflow phase
//! - [`state_machine`] is the per-workflow finite-state machine, written as a
//!   pure transition function returning effects
//! - [`orchestration::WorkflowCoordinator`] turns phase results into workflow
//!   events
//! - [`scheduler`] holds the job registry, dispatcher, executor and event
//!   scheduler
//!
//! The transport is at-least-once. Exactly-once *effect* comes only from the
//! idempotency layer in [`resilience::idempotency`].
//!
//! ## Module Organization
//!
//! - [`messaging`] - Envelopes, key naming, bus port and providers
//! - [`kv`] - Key-value port, providers and distributed locks
//! - [`resilience`] - Retry with backoff and the `once` guard
//! - [`orchestration`] - Base orchestrator and workflow coordinator
//! - [`state_machine`] - Workflow model, transitions and persistence port
//! - [`scheduler`] - Scheduled jobs, dispatch and execution
//! - [`database`] - PostgreSQL stores of record (feature `postgres`)
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging bootstrap
//! - [`error`] - Top-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use foreman_core::kv::InMemoryKvStore;
//! use foreman_core::messaging::InMemoryMessageBus;
//! use foreman_core::scheduler::{JobScheduler, JobSpec, InMemoryJobStore};
//! use foreman_core::scheduler::events::SchedulerEventPublisher;
//! use foreman_core::utils::clock::SystemClock;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = Arc::new(InMemoryMessageBus::new());
//! let scheduler = JobScheduler::new(
//!     Arc::new(InMemoryJobStore::new()),
//!     SchedulerEventPublisher::new(bus.clone(), "scheduler.events"),
//!     Arc::new(SystemClock),
//!     "UTC",
//! );
//!
//! let job = scheduler
//!     .schedule(JobSpec::cron("nightly-report", "0 2 * * *", "reports.nightly").with_timezone("America/New_York"))
//!     .await?;
//! println!("next run: {:?}", job.next_run);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
#[cfg(feature = "postgres")]
pub mod database;
pub mod error;
pub mod kv;
pub mod logging;
pub mod messaging;
pub mod orchestration;
pub mod resilience;
pub mod scheduler;
pub mod state_machine;
pub mod utils;

pub use config::{ConfigManager, ForemanConfig};
pub use error::{ForemanError, Result};
pub use messaging::{create_envelope, retry_envelope, Envelope, MessageBus};
pub use kv::KvStore;
pub use orchestration::{BaseOrchestrator, PhaseHandler, WorkflowCoordinator};
pub use resilience::{once, retry, RetryPolicy};
pub use scheduler::{Dispatcher, EventScheduler, Executor, JobScheduler};
pub use state_machine::{Workflow, WorkflowEvent, WorkflowStateMachine, WorkflowStatus};
