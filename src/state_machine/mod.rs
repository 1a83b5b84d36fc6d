//! # Workflow State Machine
//!
//! Explicit finite-state machine per workflow instance. The transition rules
//! live in a pure function ([`transitions::transition`]) that returns the
//! effects to run; [`WorkflowStateMachine`] runs them against the store of
//! record and the bus.
//!
//! Workflows are never held in process memory between events: each event
//! rehydrates the workflow from its [`WorkflowStore`].

pub mod errors;
pub mod events;
pub mod persistence;
pub mod states;
pub mod transitions;
pub mod workflow;
pub mod workflow_state_machine;

pub use errors::StateMachineError;
pub use events::WorkflowEvent;
pub use persistence::{InMemoryWorkflowStore, WorkflowStore};
pub use states::{WorkflowStatus, WorkflowType};
pub use transitions::{transition, Effect, Transition};
pub use workflow::{Workflow, WorkflowNotification, WorkflowNotificationKind};
pub use workflow_state_machine::WorkflowStateMachine;
