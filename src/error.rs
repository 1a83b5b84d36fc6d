//! # Error Types
//!
//! Top-level error for callers that touch more than one subsystem. Each
//! subsystem keeps its own `thiserror` enum; this type only aggregates them.

use crate::config::ConfigurationError;
use crate::kv::KvError;
use crate::messaging::MessagingError;
use crate::scheduler::{RegistryError, SchedulerError};
use crate::state_machine::StateMachineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForemanError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Coordination store error: {0}")]
    Kv(#[from] KvError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

pub type Result<T> = std::result::Result<T, ForemanError>;
