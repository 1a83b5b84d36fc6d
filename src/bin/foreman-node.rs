//! Foreman Node
//!
//! Runs one replica of the scheduler and workflow coordinator against Redis
//! (bus and coordination store) and, when `database.url` is set, PostgreSQL.
//! Phase orchestrators and job handlers are registered by applications that
//! embed `foreman_core`; this binary runs the shared machinery only.

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use foreman_core::config::ConfigManager;
use foreman_core::kv::{DistributedLock, KvStore, RedisKvStore};
use foreman_core::logging::init_structured_logging;
use foreman_core::messaging::{MessageBus, RedisStreamsBus};
use foreman_core::orchestration::{PhaseBinding, WorkflowCoordinator};
use foreman_core::scheduler::{
    Dispatcher, EventScheduler, Executor, HandlerRegistry, InMemoryJobStore, JobScheduler,
    JobStore, SchedulerEventPublisher,
};
use foreman_core::state_machine::{InMemoryWorkflowStore, WorkflowStateMachine, WorkflowStore};
use foreman_core::utils::clock::{Clock, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let manager = ConfigManager::load().context("loading configuration")?;
    let config = manager.config();
    init_structured_logging(&config.logging);

    info!(
        environment = %manager.environment(),
        config_file = %manager.config_file().display(),
        "Starting foreman node"
    );

    let bus: Arc<dyn MessageBus> = Arc::new(
        RedisStreamsBus::connect(&config.redis)
            .await
            .context("connecting message bus")?,
    );
    let kv: Arc<dyn KvStore> = Arc::new(
        RedisKvStore::connect(&config.redis)
            .await
            .context("connecting coordination store")?,
    );
    let (workflow_store, job_store) = open_stores(&manager).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let replica_id = config
        .scheduler
        .replica_id
        .clone()
        .unwrap_or_else(|| format!("foreman-{}", Uuid::new_v4()));

    // Scheduler
    let events = SchedulerEventPublisher::new(Arc::clone(&bus), &config.scheduler.events_topic);
    let scheduler = Arc::new(JobScheduler::new(
        Arc::clone(&job_store),
        events.clone(),
        Arc::clone(&clock),
        &config.scheduler.default_timezone,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&job_store),
        Arc::clone(&bus),
        DistributedLock::new(Arc::clone(&kv), &replica_id, config.scheduler.lock_options()),
        events.clone(),
        Arc::clone(&clock),
        &config.scheduler.dispatch_topic,
    ));

    let registry = Arc::new(HandlerRegistry::new());
    let executor = Arc::new(
        Executor::new(
            Arc::clone(&job_store),
            Arc::clone(&registry),
            events,
            Arc::clone(&clock),
            Arc::clone(&kv),
            config.retry.policy(),
        )
        .with_idempotency_ttl(config.orchestrator.idempotency_ttl()),
    );
    if registry.names().is_empty() {
        warn!("No job handlers registered; dispatched jobs will fail with handler not found");
    }
    let executor_subscription = executor
        .start(
            bus.as_ref(),
            &config.scheduler.dispatch_topic,
            &config.scheduler.executor_group,
        )
        .await
        .context("starting job executor")?;

    let mut event_topics = vec![config.orchestrator.lifecycle_topic.clone()];
    event_topics.extend(config.scheduler.event_topics.iter().cloned());
    let event_scheduler = Arc::new(EventScheduler::new(
        Arc::clone(&scheduler),
        Arc::clone(&dispatcher),
        Arc::clone(&bus),
        Arc::clone(&kv),
        config.scheduler.event_rules.clone(),
        event_topics,
        &config.scheduler.event_scheduler_group,
    ));
    event_scheduler
        .start()
        .await
        .context("starting event scheduler")?;

    // Workflow coordinator
    let bindings = config
        .orchestrator
        .phases
        .iter()
        .map(PhaseBinding::from_config)
        .collect::<Result<Vec<_>, _>>()
        .context("resolving phase bindings")?;
    let coordinator = Arc::new(WorkflowCoordinator::new(
        WorkflowStateMachine::new(
            workflow_store,
            Arc::clone(&bus),
            Arc::clone(&clock),
            &config.orchestrator.lifecycle_topic,
        ),
        Arc::clone(&bus),
        bindings,
        &config.orchestrator.coordinator_group,
    ));
    coordinator
        .start()
        .await
        .context("starting workflow coordinator")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_task = tokio::spawn(
        Arc::clone(&dispatcher).run(config.scheduler.tick_interval(), shutdown_rx),
    );

    info!(replica_id = %replica_id, "Foreman node running");
    signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Err(e) = dispatcher_task.await {
        warn!(error = %e, "Dispatcher task ended abnormally");
    }
    coordinator.stop().await;
    event_scheduler.stop().await;
    executor_subscription.unsubscribe().await;
    bus.disconnect().await.context("disconnecting message bus")?;

    info!("Foreman node stopped");
    Ok(())
}

#[cfg(feature = "postgres")]
async fn open_stores(
    manager: &ConfigManager,
) -> anyhow::Result<(Arc<dyn WorkflowStore>, Arc<dyn JobStore>)> {
    use foreman_core::database::{schema, DatabaseConnection, PgJobStore, PgWorkflowStore};

    let database = &manager.config().database;
    if database.url.is_none() {
        return Ok(in_memory_stores());
    }

    let connection = DatabaseConnection::connect(database)
        .await
        .context("connecting database")?;
    if database.apply_schema {
        schema::apply(connection.pool())
            .await
            .context("applying database schema")?;
    }
    let pool = connection.pool().clone();
    Ok((
        Arc::new(PgWorkflowStore::new(pool.clone())),
        Arc::new(PgJobStore::new(pool)),
    ))
}

#[cfg(not(feature = "postgres"))]
async fn open_stores(
    manager: &ConfigManager,
) -> anyhow::Result<(Arc<dyn WorkflowStore>, Arc<dyn JobStore>)> {
    if manager.config().database.url.is_some() {
        warn!("database.url is set but the postgres feature is disabled; using in-memory stores");
    }
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (Arc<dyn WorkflowStore>, Arc<dyn JobStore>) {
    warn!("No database configured; workflows and jobs are kept in memory");
    (
        Arc::new(InMemoryWorkflowStore::new()),
        Arc::new(InMemoryJobStore::new()),
    )
}
