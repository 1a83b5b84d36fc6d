//! # Messaging Error Types
//!
//! Structured error handling for the message bus and its providers.

use crate::kv::KvError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Broker command failed: {operation}: {message}")]
    Broker { operation: String, message: String },

    #[error("Publish failed: {topic}: {message}")]
    Publish { topic: String, message: String },

    #[error("Subscribe failed: {topic}/{group}: {message}")]
    Subscribe {
        topic: String,
        group: String,
        message: String,
    },

    #[error("Message serialization error: {message}")]
    Serialization { message: String },

    #[error("Message deserialization error: {message}")]
    Deserialization { message: String },

    #[error("Invalid payload: {message}")]
    Validation { message: String },

    #[error("Handler failed: {message}")]
    Handler { message: String },

    #[error("Coordination store error: {0}")]
    Coordination(#[from] KvError),

    #[error("Message bus is disconnected")]
    Disconnected,
}

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn broker(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Broker {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn publish(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn subscribe(
        topic: impl Into<String>,
        group: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            group: group.into(),
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Payload could not be interpreted; retrying will not help
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Deserialization { .. })
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<redis::RedisError> for MessagingError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::connection(err.to_string())
        } else {
            Self::broker(err.code().unwrap_or("redis"), err.to_string())
        }
    }
}
