//! # Structured Logging Module
//!
//! Environment-aware structured logging: a console layer plus an optional
//! JSON file layer for following envelopes, jobs and workflows across
//! processes.

use crate::config::loader::detect_environment;
use crate::config::LoggingConfig;
use chrono::Utc;
use std::fs;
use std::process;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize structured logging. Safe to call more than once; never panics
/// when another global subscriber is already installed.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(&environment));
        let filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level))
        };

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(config.ansi)
            .with_filter(filter());

        let pid = process::id();
        let mut log_file = None;
        let file_layer = config
            .log_dir
            .as_ref()
            .filter(|dir| !dir.as_os_str().is_empty())
            .and_then(|dir| match fs::create_dir_all(dir) {
                Ok(()) => Some(dir),
                Err(e) => {
                    eprintln!("foreman: log directory {} unavailable: {e}", dir.display());
                    None
                }
            })
            .map(|dir| {
                let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
                let file_name = format!("{environment}.{pid}.{timestamp}.log");
                log_file = Some(dir.join(&file_name));
                let (writer, guard) =
                    tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
                let _ = FILE_GUARD.set(guard);
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(filter())
            });

        let subscriber = tracing_subscriber::registry().with(console).with(file_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
            return;
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            level = %log_level,
            log_file = ?log_file,
            "Structured logging initialized"
        );
    });
}

/// Current environment name
pub fn get_environment() -> String {
    detect_environment()
}

/// Default log level for an environment
pub fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log a step in an envelope's life: received, duplicate, requeued, dead-lettered
pub fn log_envelope_operation(
    operation: &str,
    envelope_id: &str,
    topic: &str,
    attempts: u32,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        envelope_id = %envelope_id,
        topic = %topic,
        attempts = attempts,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "ENVELOPE_OPERATION"
    );
}

/// Log a scheduled job or execution state change
pub fn log_job_operation(
    operation: &str,
    job_id: Option<&str>,
    execution_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = job_id,
        execution_id = execution_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "JOB_OPERATION"
    );
}

/// Log a workflow transition
pub fn log_workflow_operation(
    operation: &str,
    workflow_id: &str,
    stage: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        workflow_id = %workflow_id,
        stage = stage,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "WORKFLOW_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("staging"), "debug");
    }

    #[test]
    fn test_init_is_idempotent_without_file_output() {
        let config = LoggingConfig {
            level: Some("warn".to_string()),
            log_dir: None,
            ansi: false,
        };
        init_structured_logging(&config);
        init_structured_logging(&config);
        log_envelope_operation("received", "e-1", "orders", 0, "ok", None);
    }
}
