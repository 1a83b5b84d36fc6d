//! # Message Bus Providers
//!
//! - [`InMemoryMessageBus`] - in-process, for tests and single-node runs
//! - [`RedisStreamsBus`] - Redis Streams with consumer groups

pub mod in_memory;
pub mod redis_streams;

pub use in_memory::InMemoryMessageBus;
pub use redis_streams::RedisStreamsBus;
