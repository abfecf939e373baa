use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{Job, JobState};
use crate::engine::EngineContext;
use crate::error::ExecutionError;
use crate::history::{HistoryRecord, HistoryRecorder};
use crate::logging::Logger;
use crate::progress::ProgressHub;

/// Spawns and runs child jobs on behalf of a running parent.
///
/// Children report progress into a sub-range of the parent's hub, observe the
/// parent's cancellation through a child token, and run under the locks the
/// parent already holds.
#[derive(Clone)]
pub struct ChildJobOrchestrator {
    engine: Arc<EngineContext>,
    hub: Arc<ProgressHub>,
    cancel: CancellationToken,
    logger: Logger,
    record_history: bool,
}

impl ChildJobOrchestrator {
    pub(crate) fn new(
        engine: Arc<EngineContext>,
        hub: Arc<ProgressHub>,
        cancel: CancellationToken,
        logger: Logger,
        record_history: bool,
    ) -> Self {
        Self {
            engine,
            hub,
            cancel,
            logger,
            record_history,
        }
    }

    /// Creates and initializes a child whose progress maps into `[start, end]`
    /// of the parent's range.
    pub fn spawn(
        &self,
        name: &str,
        version: u32,
        start: f64,
        end: f64,
        enable_logging: bool,
    ) -> Result<Job, ExecutionError> {
        let body = self
            .engine
            .factory()
            .create(name, version)
            .ok_or_else(|| ExecutionError::UnknownJob {
                name: name.to_string(),
                version,
            })?;
        let hub = ProgressHub::scoped_child_range(&self.hub, start, end);
        let mut child = Job::child(
            body,
            Arc::clone(&self.engine),
            hub,
            self.cancel.child_token(),
            enable_logging,
            self.record_history,
        );
        child.initialize()?;
        self.logger
            .debug(&format!("spawned child {name} v{version} for [{start:.3}, {end:.3}]"));
        Ok(child)
    }

    /// Runs `child` to completion.
    ///
    /// On success the child's history is grafted into `record` and `Ok(true)`
    /// is returned. Cancellation always propagates. Any other failure is
    /// returned as [`ExecutionError::ChildFailed`] if the child rethrows, or
    /// logged and reported as `Ok(false)` if it does not.
    pub fn run(&self, child: &mut Job, record: &mut HistoryRecord) -> Result<bool, ExecutionError> {
        let name = child.name().to_string();
        match child.execute() {
            Ok(JobState::Cancelled) => Err(ExecutionError::Cancelled),
            Ok(_) => {
                if self.record_history
                    && let Some(history) = child.history()
                {
                    HistoryRecorder::attach_child(record, history);
                }
                Ok(true)
            }
            Err(e) if e.is_cancellation() => Err(ExecutionError::Cancelled),
            Err(e) if child.rethrows() => Err(ExecutionError::ChildFailed {
                job: name,
                source: Box::new(e),
            }),
            Err(e) => {
                self.logger
                    .warning(&format!("child job {name} failed, parent continues: {e}"));
                Ok(false)
            }
        }
    }
}
