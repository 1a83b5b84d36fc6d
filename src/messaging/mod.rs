//! # Messaging Module
//!
//! Envelope format, key naming and the message-bus port with its providers.
//! The orchestrator and the scheduler talk to each other and to agents only
//! through this module.

pub mod bus;
pub mod envelope;
pub mod errors;
pub mod keys;
pub mod providers;

pub use bus::{
    handler_fn, publish_envelope, BusHealth, EnvelopeHandler, MessageBus, PublishOptions,
    Subscription,
};
pub use envelope::{create_envelope, retry_envelope, DeadLetter, Envelope};
pub use errors::MessagingError;
pub use keys::KeySpace;
pub use providers::{InMemoryMessageBus, RedisStreamsBus};
