//! # Distributed Lock
//!
//! TTL-bound mutual exclusion over a [`KvStore`]. A lock on `<resource>`
//! is two keys:
//!
//! - `lock:<resource>:holder` holding `<holder_id>:<token>`, claimed with
//!   `set_if_absent`
//! - `lock:<resource>:token` holding the token
//!
//! While held, a background task resets both TTLs every `renew_interval`
//! through `compare_and_expire`, so a long-running holder keeps the lock and
//! a crashed one loses it once the TTL lapses. Release only deletes keys
//! that still carry this holder's value.

use super::{KvError, KvStore};
use crate::constants::{DEFAULT_LOCK_RENEW_INTERVAL, DEFAULT_LOCK_TTL};
use crate::messaging::keys::{lock_holder_key, lock_token_key};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub ttl: Duration,
    pub renew_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LOCK_TTL,
            renew_interval: DEFAULT_LOCK_RENEW_INTERVAL,
        }
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    kv: Arc<dyn KvStore>,
    holder_id: String,
    options: LockOptions,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("holder_id", &self.holder_id)
            .field("options", &self.options)
            .finish()
    }
}

impl DistributedLock {
    pub fn new(kv: Arc<dyn KvStore>, holder_id: impl Into<String>, options: LockOptions) -> Self {
        Self {
            kv,
            holder_id: holder_id.into(),
            options,
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Try once to take the lock; `None` means another holder has it.
    pub async fn try_acquire(&self, resource: &str) -> Result<Option<LockGuard>, KvError> {
        let token = Uuid::new_v4().to_string();
        let holder_value = format!("{}:{}", self.holder_id, token);
        let holder_key = lock_holder_key(resource);
        let token_key = lock_token_key(resource);

        if !self
            .kv
            .set_if_absent(&holder_key, &holder_value, self.options.ttl)
            .await?
        {
            debug!(resource = %resource, holder = %self.holder_id, "Lock held elsewhere");
            return Ok(None);
        }

        if let Err(e) = self
            .kv
            .set(&token_key, &token, Some(self.options.ttl))
            .await
        {
            if let Err(cleanup) = self.kv.compare_and_delete(&holder_key, &holder_value).await {
                warn!(
                    resource = %resource,
                    error = %cleanup,
                    "Failed to release half-acquired lock; it expires with its TTL"
                );
            }
            return Err(e);
        }

        let lost = Arc::new(AtomicBool::new(false));
        let renewal = tokio::spawn(renew_loop(
            Arc::clone(&self.kv),
            resource.to_string(),
            holder_key.clone(),
            holder_value.clone(),
            token_key.clone(),
            token.clone(),
            self.options,
            Arc::clone(&lost),
        ));

        debug!(resource = %resource, holder = %self.holder_id, "Lock acquired");
        Ok(Some(LockGuard {
            kv: Arc::clone(&self.kv),
            resource: resource.to_string(),
            holder_key,
            holder_value,
            token_key,
            token,
            lost,
            renewal: Some(renewal),
        }))
    }
}

#[allow(clippy::too_many_arguments)]
async fn renew_loop(
    kv: Arc<dyn KvStore>,
    resource: String,
    holder_key: String,
    holder_value: String,
    token_key: String,
    token: String,
    options: LockOptions,
    lost: Arc<AtomicBool>,
) {
    let mut interval = tokio::time::interval(options.renew_interval);
    interval.tick().await;
    loop {
        interval.tick().await;
        let renewed = match kv
            .compare_and_expire(&holder_key, &holder_value, options.ttl)
            .await
        {
            Ok(true) => kv
                .compare_and_expire(&token_key, &token, options.ttl)
                .await
                .unwrap_or(false),
            Ok(false) => false,
            Err(e) => {
                warn!(resource = %resource, error = %e, "Lock renewal failed, will retry");
                continue;
            }
        };

        if !renewed {
            lost.store(true, Ordering::SeqCst);
            warn!(resource = %resource, "Lock lost before release");
            return;
        }
    }
}

/// Held lock. Dropping it stops renewal; the keys then expire with their TTL.
#[derive(Debug)]
pub struct LockGuard {
    kv: Arc<dyn KvStore>,
    resource: String,
    holder_key: String,
    holder_value: String,
    token_key: String,
    token: String,
    lost: Arc<AtomicBool>,
    renewal: Option<JoinHandle<()>>,
}

impl LockGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Renewal found the keys gone or taken over
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Delete both keys if they still belong to this holder.
    ///
    /// Returns `false` when the lock had already expired or changed hands.
    pub async fn release(mut self) -> Result<bool, KvError> {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
        let released = self
            .kv
            .compare_and_delete(&self.holder_key, &self.holder_value)
            .await?;
        self.kv
            .compare_and_delete(&self.token_key, &self.token)
            .await?;

        debug!(resource = %self.resource, released, "Lock released");
        Ok(released)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
    }
}
