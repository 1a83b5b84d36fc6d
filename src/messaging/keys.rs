//! # Key Naming
//!
//! Every key the core writes to the broker or coordination store follows
//! one convention:
//!
//! | Purpose | Key |
//! |---|---|
//! | stream | `stream:<name>` |
//! | dead-letter stream | `stream:<name>:dlq` |
//! | consumer group | `group:<stream>:<group>` |
//! | lock | `lock:<resource>:holder`, `lock:<resource>:token` |
//! | generic coordination | `kv:<key>` |
//! | idempotency | `once:<key>` |
//! | heartbeat | `health:<component>` |
//!
//! Adapters apply the optional tenant prefix through [`KeySpace`].

use crate::constants::topics::DLQ_SUFFIX;

pub fn stream_key(topic: &str) -> String {
    format!("stream:{topic}")
}

/// Dead-letter topic for an input topic
pub fn dlq_topic(topic: &str) -> String {
    format!("{topic}{DLQ_SUFFIX}")
}

pub fn group_key(stream: &str, group: &str) -> String {
    format!("group:{stream}:{group}")
}

pub fn lock_holder_key(resource: &str) -> String {
    format!("lock:{resource}:holder")
}

pub fn lock_token_key(resource: &str) -> String {
    format!("lock:{resource}:token")
}

pub fn kv_key(key: &str) -> String {
    format!("kv:{key}")
}

pub fn once_key(key: &str) -> String {
    format!("once:{key}")
}

pub fn health_key(component: &str) -> String {
    format!("health:{component}")
}

/// Tenant prefix applied by adapters to every physical key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpace {
    tenant: Option<String>,
}

impl KeySpace {
    pub fn new(tenant: Option<String>) -> Self {
        Self {
            tenant: tenant.filter(|t| !t.is_empty()),
        }
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Prefix an already-formed key with the tenant, if any
    pub fn apply(&self, key: &str) -> String {
        match &self.tenant {
            Some(tenant) => format!("{tenant}:{key}"),
            None => key.to_string(),
        }
    }

    pub fn stream(&self, topic: &str) -> String {
        self.apply(&stream_key(topic))
    }

    pub fn group(&self, topic: &str, group: &str) -> String {
        group_key(&self.stream(topic), group)
    }
}
