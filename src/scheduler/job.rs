//! Scheduled job model and the inputs that create or change one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_JOB_MAX_RETRIES: u32 = 3;
pub const DEFAULT_JOB_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Cron,
    OneTime,
    /// One-time job created by the event scheduler
    Event,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cron => "cron",
            Self::OneTime => "one_time",
            Self::Event => "event",
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Self::Cron)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! impl_from_str {
    ($ty:ty, $($name:literal => $variant:expr),+ $(,)?) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($ty))),
                }
            }
        }
    };
}

impl_from_str!(JobKind, "cron" => JobKind::Cron, "one_time" => JobKind::OneTime, "event" => JobKind::Event);
impl_from_str!(
    JobPriority,
    "low" => JobPriority::Low,
    "medium" => JobPriority::Medium,
    "high" => JobPriority::High,
    "critical" => JobPriority::Critical,
);
impl_from_str!(
    JobStatus,
    "active" => JobStatus::Active,
    "paused" => JobStatus::Paused,
    "completed" => JobStatus::Completed,
    "cancelled" => JobStatus::Cancelled,
    "failed" => JobStatus::Failed,
);

/// A job owned by the scheduler.
///
/// Exactly one of `schedule` (cron) and `execute_at` (one-time, event) is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub id: Uuid,
    pub name: String,
    pub kind: JobKind,
    pub schedule: Option<String>,
    pub execute_at: Option<DateTime<Utc>>,
    /// IANA timezone the cron expression is evaluated in
    pub timezone: String,
    pub handler_name: String,
    pub handler_type: Option<String>,
    pub payload: Value,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub executions_count: u64,
    pub tags: Vec<String>,
    pub owner_scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Compare-and-swap counter for [`super::JobStore::save`]
    pub version: i64,
}

impl ScheduledJob {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Active && self.next_run.is_some_and(|next| next <= now)
    }
}

/// Input to [`super::JobScheduler::schedule`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub name: String,
    pub kind: JobKind,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub execute_at: Option<DateTime<Utc>>,
    /// Falls back to the scheduler's default timezone
    #[serde(default)]
    pub timezone: Option<String>,
    pub handler_name: String,
    #[serde(default)]
    pub handler_type: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub owner_scope: Option<String>,
}

impl JobSpec {
    fn base(name: impl Into<String>, kind: JobKind, handler_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            schedule: None,
            execute_at: None,
            timezone: None,
            handler_name: handler_name.into(),
            handler_type: None,
            payload: Value::Null,
            max_retries: None,
            timeout_ms: None,
            priority: JobPriority::default(),
            tags: Vec::new(),
            owner_scope: None,
        }
    }

    pub fn cron(
        name: impl Into<String>,
        expression: impl Into<String>,
        handler_name: impl Into<String>,
    ) -> Self {
        Self {
            schedule: Some(expression.into()),
            ..Self::base(name, JobKind::Cron, handler_name)
        }
    }

    pub fn once(
        name: impl Into<String>,
        execute_at: DateTime<Utc>,
        handler_name: impl Into<String>,
    ) -> Self {
        Self {
            execute_at: Some(execute_at),
            ..Self::base(name, JobKind::OneTime, handler_name)
        }
    }

    pub fn event(
        name: impl Into<String>,
        execute_at: DateTime<Utc>,
        handler_name: impl Into<String>,
    ) -> Self {
        Self {
            execute_at: Some(execute_at),
            ..Self::base(name, JobKind::Event, handler_name)
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_handler_type(mut self, handler_type: impl Into<String>) -> Self {
        self.handler_type = Some(handler_type.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_owner_scope(mut self, owner_scope: impl Into<String>) -> Self {
        self.owner_scope = Some(owner_scope.into());
        self
    }
}

/// Partial update for [`super::JobScheduler::update_job`]; `None` keeps the
/// current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub execute_at: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub handler_name: Option<String>,
    pub payload: Option<Value>,
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub priority: Option<JobPriority>,
    pub tags: Option<Vec<String>>,
}

impl JobUpdate {
    /// Whether `nextRun` has to be recomputed
    pub fn changes_timing(&self) -> bool {
        self.schedule.is_some() || self.execute_at.is_some() || self.timezone.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub tag: Option<String>,
    pub owner_scope: Option<String>,
}

impl JobFilter {
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_owner_scope(mut self, owner_scope: impl Into<String>) -> Self {
        self.owner_scope = Some(owner_scope.into());
        self
    }

    pub fn matches(&self, job: &ScheduledJob) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.kind.map_or(true, |k| job.kind == k)
            && self
                .tag
                .as_ref()
                .map_or(true, |t| job.tags.iter().any(|tag| tag == t))
            && self
                .owner_scope
                .as_ref()
                .map_or(true, |o| job.owner_scope.as_ref() == Some(o))
    }
}

/// Why a dispatch happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchReason {
    /// `nextRun` came due
    Schedule,
    /// Explicit trigger (operator or event rule)
    Trigger { reason: String },
}

/// Payload of an envelope on the job-dispatch topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDispatch {
    pub job_id: Uuid,
    pub job_name: String,
    pub handler_name: String,
    #[serde(default)]
    pub handler_type: Option<String>,
    pub payload: Value,
    pub max_retries: u32,
    pub timeout_ms: u64,
    /// The `nextRun` this dispatch satisfies; absent for triggers
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    pub dispatched_at: DateTime<Utc>,
    pub reason: DispatchReason,
}

impl JobDispatch {
    pub fn for_job(job: &ScheduledJob, reason: DispatchReason, now: DateTime<Utc>) -> Self {
        let scheduled_for = match reason {
            DispatchReason::Schedule => job.next_run,
            DispatchReason::Trigger { .. } => None,
        };
        Self {
            job_id: job.id,
            job_name: job.name.clone(),
            handler_name: job.handler_name.clone(),
            handler_type: job.handler_type.clone(),
            payload: job.payload.clone(),
            max_retries: job.max_retries,
            timeout_ms: job.timeout_ms,
            scheduled_for,
            dispatched_at: now,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job(status: JobStatus, next_run: Option<DateTime<Utc>>) -> ScheduledJob {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        ScheduledJob {
            id: Uuid::new_v4(),
            name: "report".to_string(),
            kind: JobKind::Cron,
            schedule: Some("0 2 * * *".to_string()),
            execute_at: None,
            timezone: "UTC".to_string(),
            handler_name: "reports.nightly".to_string(),
            handler_type: None,
            payload: Value::Null,
            max_retries: 3,
            timeout_ms: 1000,
            priority: JobPriority::High,
            status,
            next_run,
            last_run: None,
            executions_count: 0,
            tags: vec!["reports".to_string()],
            owner_scope: Some("team-a".to_string()),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    #[test]
    fn test_is_due_requires_active_and_past_next_run() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let past = Some(now - chrono::Duration::minutes(1));
        let future = Some(now + chrono::Duration::minutes(1));

        assert!(job(JobStatus::Active, past).is_due(now));
        assert!(job(JobStatus::Active, Some(now)).is_due(now));
        assert!(!job(JobStatus::Active, future).is_due(now));
        assert!(!job(JobStatus::Paused, past).is_due(now));
        assert!(!job(JobStatus::Active, None).is_due(now));
    }

    #[test]
    fn test_filter_matches() {
        let j = job(JobStatus::Active, None);
        assert!(JobFilter::default().matches(&j));
        assert!(JobFilter::default().with_tag("reports").matches(&j));
        assert!(!JobFilter::default().with_tag("billing").matches(&j));
        assert!(JobFilter::default()
            .with_status(JobStatus::Active)
            .with_kind(JobKind::Cron)
            .with_owner_scope("team-a")
            .matches(&j));
        assert!(!JobFilter::default().with_owner_scope("team-b").matches(&j));
    }

    #[test]
    fn test_wire_names() {
        let value = serde_json::to_value(job(JobStatus::Active, None)).unwrap();
        assert_eq!(value["kind"], "cron");
        assert_eq!(value["priority"], "high");
        assert!(value.get("handlerName").is_some());
        assert!(value.get("executionsCount").is_some());
        assert_eq!("one_time".parse::<JobKind>().unwrap(), JobKind::OneTime);
        assert!("weekly".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_priority_orders_low_to_critical() {
        assert!(JobPriority::Critical > JobPriority::High);
        assert!(JobPriority::Low < JobPriority::Medium);
    }
}
