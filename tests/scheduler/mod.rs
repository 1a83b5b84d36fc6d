mod cron_dst_test;
mod dispatch_test;
mod event_rules_test;
mod execution_test;

use foreman_core::kv::{DistributedLock, InMemoryKvStore, LockOptions};
use foreman_core::messaging::InMemoryMessageBus;
use foreman_core::scheduler::{Dispatcher, InMemoryJobStore, JobScheduler, SchedulerEventPublisher};
use foreman_core::utils::clock::ManualClock;
use std::sync::Arc;

pub const EVENTS: &str = "scheduler.events";
pub const DISPATCH: &str = "scheduler.job-dispatch";

/// One scheduler deployment on in-memory ports with a manual clock
pub struct Fleet {
    pub scheduler: Arc<JobScheduler>,
    pub store: InMemoryJobStore,
    pub bus: InMemoryMessageBus,
    pub kv: InMemoryKvStore,
    pub clock: ManualClock,
}

impl Fleet {
    pub fn starting_at(now: chrono::DateTime<chrono::Utc>) -> Self {
        let store = InMemoryJobStore::new();
        let (bus, kv) = crate::common::ports();
        let clock = ManualClock::new(now);
        let scheduler = JobScheduler::new(
            Arc::new(store.clone()),
            SchedulerEventPublisher::new(Arc::new(bus.clone()), EVENTS),
            Arc::new(clock.clone()),
            "UTC",
        );
        Self {
            scheduler: Arc::new(scheduler),
            store,
            bus,
            kv,
            clock,
        }
    }

    pub fn dispatcher(&self, replica: &str) -> Dispatcher {
        Dispatcher::new(
            Arc::new(self.store.clone()),
            Arc::new(self.bus.clone()),
            DistributedLock::new(Arc::new(self.kv.clone()), replica, LockOptions::default()),
            SchedulerEventPublisher::new(Arc::new(self.bus.clone()), EVENTS),
            Arc::new(self.clock.clone()),
            DISPATCH,
        )
    }
}
