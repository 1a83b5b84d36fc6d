//! # Orchestration
//!
//! - [`BaseOrchestrator`] runs one workflow phase: subscribe, dedup,
//!   idempotent execute with retry, then publish, requeue or dead-letter
//! - [`WorkflowCoordinator`] feeds phase results and dead letters into the
//!   workflow state machine

pub mod base_orchestrator;
pub mod workflow_coordinator;

pub use base_orchestrator::{
    BaseOrchestrator, OrchestratorSettings, PhaseError, PhaseHandler, ProcessOutcome,
};
pub use workflow_coordinator::{PhaseBinding, WorkflowCoordinator};
