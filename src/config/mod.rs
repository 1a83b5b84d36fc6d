//! # Configuration
//!
//! Layered configuration for a foreman node.
//!
//! ## Sources (later wins)
//!
//! 1. Built-in defaults ([`ForemanConfig::default`])
//! 2. `config/foreman.toml`, or the file named by `FOREMAN_CONFIG_PATH`
//! 3. `config/foreman.<environment>.toml`
//! 4. Environment variables: `FOREMAN__<SECTION>__<FIELD>`, e.g.
//!    `FOREMAN__REDIS__URL`, `FOREMAN__SCHEDULER__TICK_INTERVAL_MS`
//!
//! The environment is `FOREMAN_ENV`, then `APP_ENV`, then `development`.
//!
//! ```rust,no_run
//! use foreman_core::config::ConfigManager;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! println!("redis: {}", manager.config().redis.url);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::{groups, topics};
use crate::messaging::keys::dlq_topic;
use crate::resilience::RetryPolicy;
use crate::scheduler::event_scheduler::EventRule;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ForemanConfig {
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

/// Redis connection and stream consumer settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Prefix applied to every stream and key
    pub tenant: Option<String>,
    /// Consumer name inside groups; generated per process when unset
    pub consumer_name: Option<String>,
    /// XREADGROUP BLOCK duration. Keep below the client response timeout.
    pub block_ms: u64,
    /// XREADGROUP / XAUTOCLAIM COUNT
    pub batch_size: usize,
    /// Pending entries idle this long are reclaimed
    pub claim_idle_ms: u64,
    pub claim_interval_ms: u64,
    pub stream_max_len: Option<usize>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            tenant: None,
            consumer_name: None,
            block_ms: 200,
            batch_size: 10,
            claim_idle_ms: 60_000,
            claim_interval_ms: 5_000,
            stream_max_len: None,
        }
    }
}

/// PostgreSQL store of record. In-memory stores are used when `url` is unset.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Create tables on startup
    pub apply_schema: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_secs: 5,
            apply_schema: true,
        }
    }
}

/// Binds a phase's result and dead-letter topics to a workflow stage
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PhaseBindingConfig {
    pub stage: String,
    pub output_topic: String,
    /// Defaults to `<input_topic>:dlq`
    #[serde(default)]
    pub dlq_topic: Option<String>,
    #[serde(default)]
    pub input_topic: Option<String>,
}

impl PhaseBindingConfig {
    pub fn resolved_dlq_topic(&self) -> Option<String> {
        self.dlq_topic
            .clone()
            .or_else(|| self.input_topic.as_deref().map(dlq_topic))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Outer attempts before dead-lettering
    pub max_retries: u32,
    pub dedup_ttl_secs: u64,
    pub idempotency_ttl_secs: u64,
    pub lifecycle_topic: String,
    pub coordinator_group: String,
    pub phases: Vec<PhaseBindingConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: crate::constants::DEFAULT_MAX_RETRIES,
            dedup_ttl_secs: crate::constants::DEFAULT_DEDUP_TTL.as_secs(),
            idempotency_ttl_secs: crate::constants::DEFAULT_IDEMPOTENCY_TTL.as_secs(),
            lifecycle_topic: topics::WORKFLOW_LIFECYCLE.to_string(),
            coordinator_group: groups::WORKFLOW_COORDINATOR.to_string(),
            phases: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }
}

/// Inner retry discipline shared by phase handlers and job execution
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter_factor: policy.jitter_factor,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_factor: self.jitter_factor,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    pub lock_ttl_ms: u64,
    pub lock_renew_interval_ms: u64,
    /// IANA zone used when a job names none
    pub default_timezone: String,
    pub dispatch_topic: String,
    pub events_topic: String,
    pub executor_group: String,
    pub event_scheduler_group: String,
    /// Identifies this replica as a lock holder; generated when unset
    pub replica_id: Option<String>,
    /// Topics the event scheduler listens on besides the workflow lifecycle
    pub event_topics: Vec<String>,
    pub event_rules: Vec<EventRule>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            lock_ttl_ms: crate::constants::DEFAULT_LOCK_TTL.as_millis() as u64,
            lock_renew_interval_ms: crate::constants::DEFAULT_LOCK_RENEW_INTERVAL.as_millis()
                as u64,
            default_timezone: "UTC".to_string(),
            dispatch_topic: topics::JOB_DISPATCH.to_string(),
            events_topic: topics::SCHEDULER_EVENTS.to_string(),
            executor_group: groups::JOB_EXECUTOR.to_string(),
            event_scheduler_group: groups::EVENT_SCHEDULER.to_string(),
            replica_id: None,
            event_topics: Vec::new(),
            event_rules: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn lock_options(&self) -> crate::kv::LockOptions {
        crate::kv::LockOptions {
            ttl: Duration::from_millis(self.lock_ttl_ms),
            renew_interval: Duration::from_millis(self.lock_renew_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Overrides the environment-derived level; `RUST_LOG` overrides both
    pub level: Option<String>,
    /// Directory for the JSON log file; no file output when unset
    pub log_dir: Option<PathBuf>,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            log_dir: Some(PathBuf::from("log")),
            ansi: true,
        }
    }
}

impl ForemanConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.redis.url.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "redis.url",
                "redis configuration",
            ));
        }

        if self.redis.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "redis.batch_size",
                0,
                "batch size must be greater than 0",
            ));
        }

        if self.orchestrator.max_retries == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.max_retries",
                0,
                "at least one attempt is required",
            ));
        }

        for phase in &self.orchestrator.phases {
            if phase.resolved_dlq_topic().is_none() {
                return Err(ConfigurationError::missing_required_field(
                    "dlq_topic or input_topic",
                    format!("orchestrator phase '{}'", phase.stage),
                ));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                0,
                "at least one attempt is required",
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.base_delay_ms",
                self.retry.base_delay_ms,
                "base delay must not exceed retry.max_delay_ms",
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigurationError::invalid_value(
                "retry.jitter_factor",
                self.retry.jitter_factor,
                "jitter factor must be between 0.0 and 1.0",
            ));
        }

        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.tick_interval_ms",
                0,
                "tick interval must be greater than 0",
            ));
        }

        if self.scheduler.lock_renew_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.lock_renew_interval_ms",
                0,
                "renewal interval must be greater than 0",
            ));
        }

        if self.scheduler.lock_renew_interval_ms >= self.scheduler.lock_ttl_ms {
            return Err(ConfigurationError::invalid_value(
                "scheduler.lock_renew_interval_ms",
                self.scheduler.lock_renew_interval_ms,
                "renewal must happen before the lock TTL lapses",
            ));
        }

        for (index, rule) in self.scheduler.event_rules.iter().enumerate() {
            if let Err(e) = rule.validate() {
                return Err(ConfigurationError::invalid_value(
                    format!("scheduler.event_rules[{index}]"),
                    &rule.event_type,
                    e.to_string(),
                ));
            }
        }

        if self
            .scheduler
            .default_timezone
            .parse::<chrono_tz::Tz>()
            .is_err()
        {
            return Err(ConfigurationError::invalid_value(
                "scheduler.default_timezone",
                &self.scheduler.default_timezone,
                "not an IANA timezone name",
            ));
        }

        Ok(())
    }
}
