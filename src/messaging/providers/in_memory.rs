//! # In-Memory Message Bus
//!
//! In-process bus for tests and single-node development.
//!
//! ## Features
//!
//! - **Consumer groups**: round-robin between live subscribers of a group,
//!   every group sees every envelope
//! - **Backlog**: envelopes for a group without subscribers wait until one
//!   arrives; a group created later starts from the topic's history
//! - **Redelivery**: a handler `Err` requeues the envelope after a delay
//! - **Inspection**: every publication is recorded per topic

use crate::messaging::bus::{BusHealth, EnvelopeHandler, MessageBus, PublishOptions, Subscription};
use crate::messaging::envelope::Envelope;
use crate::messaging::errors::MessagingError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, warn};

const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_millis(50);

struct Consumer {
    id: u64,
    tx: mpsc::UnboundedSender<Envelope<Value>>,
}

#[derive(Default)]
struct GroupState {
    consumers: Vec<Consumer>,
    next: usize,
    backlog: VecDeque<Envelope<Value>>,
}

impl GroupState {
    fn deliver(&mut self, mut envelope: Envelope<Value>) {
        while !self.consumers.is_empty() {
            let index = self.next % self.consumers.len();
            match self.consumers[index].tx.send(envelope) {
                Ok(()) => {
                    self.next = index + 1;
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    self.consumers.remove(index);
                    envelope = returned;
                }
            }
        }
        self.backlog.push_back(envelope);
    }
}

#[derive(Default)]
struct TopicState {
    log: Vec<Envelope<Value>>,
    groups: HashMap<String, GroupState>,
}

struct Inner {
    topics: Mutex<HashMap<String, TopicState>>,
    published: Notify,
    next_message_id: AtomicU64,
    next_consumer_id: AtomicU64,
    redelivery_delay: Duration,
    shutdown: watch::Sender<bool>,
    disconnected: AtomicBool,
}

impl Inner {
    fn requeue(&self, topic: &str, group: &str, envelope: Envelope<Value>) {
        let mut topics = self.topics.lock();
        let state = topics.entry(topic.to_string()).or_default();
        state
            .groups
            .entry(group.to_string())
            .or_default()
            .deliver(envelope);
    }

    fn remove_consumer(&self, topic: &str, group: &str, consumer_id: u64) {
        let mut topics = self.topics.lock();
        if let Some(group) = topics
            .get_mut(topic)
            .and_then(|state| state.groups.get_mut(group))
        {
            group.consumers.retain(|c| c.id != consumer_id);
        }
    }
}

/// Cloneable handle; clones share the same topics
#[derive(Clone)]
pub struct InMemoryMessageBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InMemoryMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMessageBus")
            .field("topics", &self.inner.topics.lock().len())
            .field("redelivery_delay", &self.inner.redelivery_delay)
            .finish()
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::with_redelivery_delay(DEFAULT_REDELIVERY_DELAY)
    }

    pub fn with_redelivery_delay(redelivery_delay: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                published: Notify::new(),
                next_message_id: AtomicU64::new(1),
                next_consumer_id: AtomicU64::new(1),
                redelivery_delay,
                shutdown,
                disconnected: AtomicBool::new(false),
            }),
        }
    }

    /// Every envelope published on `topic`, in publish order
    pub fn published(&self, topic: &str) -> Vec<Envelope<Value>> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map(|state| state.log.clone())
            .unwrap_or_default()
    }

    /// Wait until `topic` has at least `count` publications or `timeout` lapses.
    ///
    /// Returns whatever has been published by then.
    pub async fn wait_for_published(
        &self,
        topic: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<Envelope<Value>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let current = self.published(topic);
            if current.len() >= count {
                return current;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.published(topic);
            }
        }
    }

    /// Envelopes waiting for a subscriber in `group`
    pub fn backlog_len(&self, topic: &str, group: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .and_then(|state| state.groups.get(group))
            .map_or(0, |g| g.backlog.len())
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(
        &self,
        topic: &str,
        envelope: &Envelope<Value>,
        options: PublishOptions,
    ) -> Result<String, MessagingError> {
        if self.inner.disconnected.load(Ordering::SeqCst) {
            return Err(MessagingError::Disconnected);
        }

        let message_id = format!(
            "{}-0",
            self.inner.next_message_id.fetch_add(1, Ordering::SeqCst)
        );
        {
            let mut topics = self.inner.topics.lock();
            let state = topics.entry(topic.to_string()).or_default();
            state.log.push(envelope.clone());
            if let Some(max_len) = options.max_len {
                let excess = state.log.len().saturating_sub(max_len);
                state.log.drain(..excess);
            }
            for group in state.groups.values_mut() {
                group.deliver(envelope.clone());
            }
        }
        self.inner.published.notify_waiters();

        debug!(topic = %topic, envelope_id = %envelope.id, message_id = %message_id, "Published envelope");
        Ok(message_id)
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> Result<Subscription, MessagingError> {
        if self.inner.disconnected.load(Ordering::SeqCst) {
            return Err(MessagingError::Disconnected);
        }

        let consumer_id = self.inner.next_consumer_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut topics = self.inner.topics.lock();
            let state = topics.entry(topic.to_string()).or_default();
            let history = state.log.clone();
            let group_state = state.groups.entry(group.to_string()).or_insert_with(|| GroupState {
                backlog: history.into(),
                ..GroupState::default()
            });
            group_state.consumers.push(Consumer { id: consumer_id, tx });
            while let Some(envelope) = group_state.backlog.pop_front() {
                group_state.deliver(envelope);
            }
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut bus_shutdown = self.inner.shutdown.subscribe();
        let inner = Arc::clone(&self.inner);
        let topic_name = topic.to_string();
        let group_name = group.to_string();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = bus_shutdown.changed() => break,
                    next = rx.recv() => {
                        let Some(envelope) = next else { break };
                        let envelope_id = envelope.id;
                        if let Err(e) = handler.handle(envelope.clone()).await {
                            warn!(
                                topic = %topic_name,
                                group = %group_name,
                                envelope_id = %envelope_id,
                                error = %e,
                                "Handler failed, envelope will be redelivered"
                            );
                            let inner = Arc::clone(&inner);
                            let topic = topic_name.clone();
                            let group = group_name.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(inner.redelivery_delay).await;
                                if !inner.disconnected.load(Ordering::SeqCst) {
                                    inner.requeue(&topic, &group, envelope);
                                }
                            });
                        }
                    }
                }
            }

            // Hand undelivered envelopes back to the group
            inner.remove_consumer(&topic_name, &group_name, consumer_id);
            rx.close();
            while let Ok(envelope) = rx.try_recv() {
                inner.requeue(&topic_name, &group_name, envelope);
            }
            debug!(topic = %topic_name, group = %group_name, consumer_id, "Subscription stopped");
        });

        Ok(Subscription::new(topic, group, shutdown_tx, task))
    }

    async fn health(&self) -> BusHealth {
        let ok = !self.inner.disconnected.load(Ordering::SeqCst);
        BusHealth {
            ok,
            provider: self.provider_name(),
            detail: (!ok).then(|| "disconnected".to_string()),
        }
    }

    async fn disconnect(&self) -> Result<(), MessagingError> {
        self.inner.disconnected.store(true, Ordering::SeqCst);
        let _ = self.inner.shutdown.send(true);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
