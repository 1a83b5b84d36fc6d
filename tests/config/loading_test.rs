use foreman_core::config::{ConfigManager, ConfigurationError};
use foreman_core::scheduler::EventAction;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_full_node_configuration_loads() {
    let dir = TempDir::new().unwrap();
    let file = write(
        &dir,
        "foreman.toml",
        r##"
[redis]
url = "redis://:secret@redis.internal:6379"
tenant = "acme"

[orchestrator]
max_retries = 3

[[orchestrator.phases]]
stage = "initialization"
output_topic = "phase.initialization.done"
input_topic = "phase.initialization"

[[orchestrator.phases]]
stage = "scaffolding"
output_topic = "phase.scaffolding.done"
dlq_topic = "phase.scaffolding.failed"

[retry]
max_attempts = 4
base_delay_ms = 50
max_delay_ms = 2000
jitter_factor = 0.1

[scheduler]
tick_interval_ms = 250
default_timezone = "Europe/Berlin"
event_topics = ["deployments"]

[[scheduler.event_rules]]
event_type = "workflow.completed"
action = { type = "create_one_time_job", name = "notify", handler_name = "notify.slack", delay_ms = 5000, payload = { channel = "#deploys" } }

[[scheduler.event_rules]]
event_type = "workflow.failed"
action = { type = "trigger_job", job_id = "6f1c0c1e-8f6e-4b7a-9a53-2f1d3f3c9e10" }
"##,
    );

    let manager = ConfigManager::load_with_overrides(&file, "test", config::Map::new()).unwrap();
    let config = manager.config();

    assert_eq!(config.redis.tenant.as_deref(), Some("acme"));
    assert_eq!(config.orchestrator.max_retries, 3);
    assert_eq!(config.orchestrator.phases.len(), 2);
    assert_eq!(
        config.orchestrator.phases[0].resolved_dlq_topic().as_deref(),
        Some("phase.initialization:dlq")
    );
    assert_eq!(
        config.orchestrator.phases[1].resolved_dlq_topic().as_deref(),
        Some("phase.scaffolding.failed")
    );

    let policy = config.retry.policy();
    assert_eq!(policy.max_attempts, 4);
    assert_eq!(policy.base_delay.as_millis(), 50);

    assert_eq!(config.scheduler.tick_interval().as_millis(), 250);
    assert_eq!(config.scheduler.event_topics, vec!["deployments".to_string()]);
    assert_eq!(config.scheduler.event_rules.len(), 2);
    match &config.scheduler.event_rules[0].action {
        EventAction::CreateOneTimeJob {
            handler_name,
            delay_ms,
            payload,
            ..
        } => {
            assert_eq!(handler_name, "notify.slack");
            assert_eq!(*delay_ms, 5000);
            assert_eq!(payload["channel"], "#deploys");
        }
        other => panic!("unexpected action {other:?}"),
    }
    assert!(matches!(
        config.scheduler.event_rules[1].action,
        EventAction::TriggerJob { .. }
    ));
}

#[test]
fn test_environment_overrides_win() {
    let dir = TempDir::new().unwrap();
    let file = write(
        &dir,
        "foreman.toml",
        r#"
[scheduler]
tick_interval_ms = 500
"#,
    );

    let mut overrides = config::Map::new();
    overrides.insert(
        "FOREMAN__SCHEDULER__TICK_INTERVAL_MS".to_string(),
        "100".to_string(),
    );
    let manager = ConfigManager::load_with_overrides(&file, "test", overrides).unwrap();
    assert_eq!(manager.config().scheduler.tick_interval_ms, 100);
}

#[test]
fn test_lock_renewal_must_be_shorter_than_ttl() {
    let dir = TempDir::new().unwrap();
    let file = write(
        &dir,
        "foreman.toml",
        r#"
[scheduler]
lock_ttl_ms = 1000
lock_renew_interval_ms = 1000
"#,
    );

    let result = ConfigManager::load_with_overrides(&file, "test", config::Map::new());
    assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
}

#[test]
fn test_unknown_default_timezone_is_rejected() {
    let dir = TempDir::new().unwrap();
    let file = write(
        &dir,
        "foreman.toml",
        r#"
[scheduler]
default_timezone = "Mars/Olympus_Mons"
"#,
    );

    assert!(ConfigManager::load_with_overrides(&file, "test", config::Map::new()).is_err());
}
