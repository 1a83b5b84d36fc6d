//! Scheduler lifecycle events (`job.*`, `execution.*`) published for
//! external consumers on the scheduler events topic.

use crate::messaging::{create_envelope, publish_envelope, MessageBus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub job_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(default)]
    pub data: Value,
    pub occurred_at: DateTime<Utc>,
}

/// Best-effort publisher: failures are logged, never returned
#[derive(Clone)]
pub struct SchedulerEventPublisher {
    bus: Arc<dyn MessageBus>,
    topic: String,
}

impl std::fmt::Debug for SchedulerEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerEventPublisher")
            .field("topic", &self.topic)
            .finish()
    }
}

impl SchedulerEventPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn publish(
        &self,
        event_type: &str,
        job_id: Uuid,
        execution_id: Option<Uuid>,
        data: Value,
    ) {
        let event = SchedulerEvent {
            event_type: event_type.to_string(),
            job_id,
            execution_id,
            data,
            occurred_at: Utc::now(),
        };
        let envelope = create_envelope(self.topic.clone(), event, Some(job_id.to_string()), None);
        if let Err(e) = publish_envelope(self.bus.as_ref(), &envelope).await {
            warn!(
                event = %event_type,
                job_id = %job_id,
                error = %e,
                "Failed to publish scheduler event"
            );
        }
    }
}
