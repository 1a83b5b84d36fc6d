use crate::kv::KvError;
use crate::messaging::MessagingError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Handler not found: {name}")]
    HandlerNotFound { name: String },

    #[error("Handler already registered: {name}")]
    DuplicateHandler { name: String },
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },

    #[error("Unknown timezone: {timezone}")]
    InvalidTimezone { timezone: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: Uuid },

    #[error("Job {job_id} was modified concurrently (expected version {expected_version})")]
    ConcurrentModification { job_id: Uuid, expected_version: i64 },

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] KvError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl SchedulerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn store(message: impl ToString) -> Self {
        Self::Store(message.to_string())
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidCron { .. } | Self::InvalidTimezone { .. }
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(format!("serialization: {err}"))
    }
}
