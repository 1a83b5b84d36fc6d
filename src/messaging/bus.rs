//! # Message Bus Port
//!
//! Provider-agnostic publish/subscribe with consumer groups and
//! at-least-once delivery.
//!
//! Within a consumer group each envelope is handed to exactly one live
//! subscriber; distinct groups each see every envelope. A handler returning
//! `Err` leaves the delivery unacknowledged and the provider redelivers it
//! later, so every handler must be idempotent.

use super::envelope::Envelope;
use super::errors::MessagingError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Receives one envelope at a time from a subscription
#[async_trait]
pub trait EnvelopeHandler: Send + Sync + 'static {
    /// `Ok` acknowledges the delivery, `Err` leaves it pending for redelivery
    async fn handle(&self, envelope: Envelope<Value>) -> Result<(), MessagingError>;
}

/// Adapts an async closure into an [`EnvelopeHandler`]
pub struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<FnHandler<F, Fut>>
where
    F: Fn(Envelope<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), MessagingError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _marker: PhantomData,
    })
}

#[async_trait]
impl<F, Fut> EnvelopeHandler for FnHandler<F, Fut>
where
    F: Fn(Envelope<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), MessagingError>> + Send + 'static,
{
    async fn handle(&self, envelope: Envelope<Value>) -> Result<(), MessagingError> {
        (self.f)(envelope).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    /// Approximate stream length cap (`MAXLEN ~`)
    pub max_len: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusHealth {
    pub ok: bool,
    pub provider: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Handle to a running subscription loop.
///
/// Dropping the handle signals the loop to stop after the in-flight
/// delivery; [`Subscription::unsubscribe`] also waits for it.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    group: String,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        group: impl Into<String>,
        shutdown: watch::Sender<bool>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            shutdown,
            task: Some(task),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub async fn unsubscribe(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!(topic = %self.topic, group = %self.group, error = %e, "Subscription task ended abnormally");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Append an envelope to `topic`; returns the provider's message id
    async fn publish(
        &self,
        topic: &str,
        envelope: &Envelope<Value>,
        options: PublishOptions,
    ) -> Result<String, MessagingError>;

    /// Start delivering `topic` to `handler` as a member of `group`
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> Result<Subscription, MessagingError>;

    async fn health(&self) -> BusHealth;

    /// Stop every subscription loop started by this bus
    async fn disconnect(&self) -> Result<(), MessagingError>;

    fn provider_name(&self) -> &'static str;
}

/// Serialize a typed envelope and publish it on its own topic
pub async fn publish_envelope<T>(
    bus: &dyn MessageBus,
    envelope: &Envelope<T>,
) -> Result<String, MessagingError>
where
    T: Serialize + Clone + Sync,
{
    let json = envelope.to_json()?;
    bus.publish(&envelope.topic, &json, PublishOptions::default())
        .await
}
