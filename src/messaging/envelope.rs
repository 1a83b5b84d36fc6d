//! # Message Envelope
//!
//! Every message on the bus travels inside an [`Envelope`]. The envelope
//! carries delivery metadata next to the payload:
//!
//! - `id` is unique per logical message and is only carried forward by
//!   [`retry_envelope`]
//! - `correlation_id` is shared by every message of one causal chain
//! - `attempts` counts republishes into the same input topic
//!
//! Wire format is camelCase JSON:
//!
//! ```json
//! {"id":"…","topic":"phase.scaffold","payload":{…},"correlationId":"…",
//!  "attempts":0,"createdAt":"2026-01-01T00:00:00Z"}
//! ```

use super::errors::MessagingError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T = Value> {
    pub id: Uuid,
    pub topic: String,
    pub payload: T,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Reason attached by [`retry_envelope`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Start a new message. The correlation id defaults to the new envelope id.
pub fn create_envelope<T>(
    topic: impl Into<String>,
    payload: T,
    correlation_id: Option<String>,
    tenant_id: Option<String>,
) -> Envelope<T> {
    let id = Uuid::new_v4();
    Envelope {
        id,
        topic: topic.into(),
        payload,
        correlation_id: correlation_id.unwrap_or_else(|| id.to_string()),
        tenant_id,
        attempts: 0,
        created_at: Utc::now(),
        last_error: None,
    }
}

/// Copy an envelope forward for another processing pass on its input topic.
///
/// Keeps `id`, increments `attempts` and records `reason`.
pub fn retry_envelope<T: Clone>(envelope: &Envelope<T>, reason: impl Into<String>) -> Envelope<T> {
    Envelope {
        attempts: envelope.attempts.saturating_add(1),
        last_error: Some(reason.into()),
        ..envelope.clone()
    }
}

impl<T> Envelope<T> {
    /// New message in the same causal chain (same correlation and tenant)
    pub fn follow_up<U>(&self, topic: impl Into<String>, payload: U) -> Envelope<U> {
        create_envelope(
            topic,
            payload,
            Some(self.correlation_id.clone()),
            self.tenant_id.clone(),
        )
    }

    pub fn map_payload<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            id: self.id,
            topic: self.topic,
            payload: f(self.payload),
            correlation_id: self.correlation_id,
            tenant_id: self.tenant_id,
            attempts: self.attempts,
            created_at: self.created_at,
            last_error: self.last_error,
        }
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn into_json(self) -> Result<Envelope<Value>, MessagingError> {
        let payload = serde_json::to_value(&self.payload)?;
        Ok(self.map_payload(|_| payload))
    }

    pub fn to_json(&self) -> Result<Envelope<Value>, MessagingError>
    where
        T: Clone,
    {
        self.clone().into_json()
    }
}

impl Envelope<Value> {
    /// Decode the JSON payload into a typed value.
    ///
    /// Failure is a validation error: the payload will never decode no
    /// matter how often it is retried.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, MessagingError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            MessagingError::validation(format!(
                "envelope {} on {}: {}",
                self.id, self.topic, e
            ))
        })
    }

    pub fn to_wire(&self) -> Result<String, MessagingError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_wire(raw: &str) -> Result<Self, MessagingError> {
        serde_json::from_str(raw).map_err(|e| MessagingError::deserialization(e.to_string()))
    }
}

/// Payload of an envelope routed to a dead-letter topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub original: Envelope<Value>,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
    /// Topic the original envelope was consumed from
    pub topic: String,
}
