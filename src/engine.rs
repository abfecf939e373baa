//! Process-wide engine state.
//!
//! An [`EngineContext`] is built once at startup and shared by every job: it
//! owns the configuration, the lock manager, the job factory, the data store,
//! the execution counter and the cache of recently finished jobs. Jobs receive
//! it explicitly. For code that cannot thread it through, one instance may be
//! installed as the process global with [`EngineContext::install`];
//! [`EngineContext::reset_global`] exists for tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock, const_rwlock};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::data::{DataStore, LockManager};
use crate::error::ExecutionError;
use crate::job::{Job, JobFactory, JobState};
use crate::logging::{LogSink, TracingSink};

static GLOBAL: RwLock<Option<Arc<EngineContext>>> = const_rwlock(None);

/// Summary of a job that left `Running`.
#[derive(Debug, Clone, Serialize)]
pub struct FinishedJob {
    pub id: Uuid,
    pub name: String,
    pub version: u32,
    pub state: JobState,
    pub finished_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) finished_instant: Instant,
}

impl FinishedJob {
    pub fn age(&self) -> Duration {
        self.finished_instant.elapsed()
    }
}

pub struct EngineContext {
    config: EngineConfig,
    locks: Arc<LockManager>,
    factory: Arc<dyn JobFactory>,
    store: Arc<dyn DataStore>,
    sink: Arc<dyn LogSink>,
    execution_counter: AtomicU64,
    finished: Mutex<VecDeque<FinishedJob>>,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        factory: Arc<dyn JobFactory>,
        store: Arc<dyn DataStore>,
    ) -> Arc<Self> {
        Self::with_sink(config, factory, store, Arc::new(TracingSink))
    }

    pub fn with_sink(
        config: EngineConfig,
        factory: Arc<dyn JobFactory>,
        store: Arc<dyn DataStore>,
        sink: Arc<dyn LogSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            locks: Arc::new(LockManager::new()),
            factory,
            store,
            sink,
            execution_counter: AtomicU64::new(0),
            finished: Mutex::new(VecDeque::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn factory(&self) -> &Arc<dyn JobFactory> {
        &self.factory
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// Next value of the monotonically increasing execution counter, starting at 1.
    pub fn next_execution_count(&self) -> u64 {
        self.execution_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Builds and initializes a job from the factory.
    pub fn create_job(self: &Arc<Self>, name: &str, version: u32) -> Result<Job, ExecutionError> {
        let body = self
            .factory
            .create(name, version)
            .ok_or_else(|| ExecutionError::UnknownJob {
                name: name.to_string(),
                version,
            })?;
        let mut job = Job::new(body, Arc::clone(self));
        job.initialize()?;
        Ok(job)
    }

    /// As [`create_job`](Self::create_job) with the latest registered version.
    pub fn create_latest(self: &Arc<Self>, name: &str) -> Result<Job, ExecutionError> {
        let version = self
            .factory
            .latest_version(name)
            .ok_or_else(|| ExecutionError::UnknownJob {
                name: name.to_string(),
                version: 0,
            })?;
        self.create_job(name, version)
    }

    pub(crate) fn record_finished(&self, job: FinishedJob) {
        let mut finished = self.finished.lock();
        finished.push_back(job);
        while finished.len() > self.config.finished_job_cache {
            finished.pop_front();
        }
    }

    /// Recently finished jobs, oldest first.
    pub fn recently_finished(&self) -> Vec<FinishedJob> {
        self.finished.lock().iter().cloned().collect()
    }

    /// Drops cached summaries older than the grace period; returns how many.
    pub fn collect_garbage(&self) -> usize {
        let grace = self.config.gc_grace_period();
        let mut finished = self.finished.lock();
        let before = finished.len();
        finished.retain(|f| f.age() < grace);
        let removed = before - finished.len();
        if removed > 0 {
            debug!(removed, "collected finished job summaries");
        }
        removed
    }

    /// Makes `ctx` the process-wide instance.
    pub fn install(ctx: Arc<EngineContext>) {
        *GLOBAL.write() = Some(ctx);
    }

    pub fn global() -> Option<Arc<EngineContext>> {
        GLOBAL.read().clone()
    }

    /// Clears the process-wide instance. Intended for tests.
    pub fn reset_global() {
        *GLOBAL.write() = None;
    }
}
