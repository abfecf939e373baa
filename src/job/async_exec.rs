//! Running a job on its own worker thread.
//!
//! [`Job::execute_async`] hands the job to a dedicated thread and returns an
//! [`AsyncExecution`] that can cancel it, poll it, block on it, or await it.
//! The job comes back with the outcome, so its outputs and history remain
//! available after the worker finishes.

use std::thread::{self, JoinHandle};

use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::{Job, JobState};
use crate::error::ExecutionError;

/// A finished background run.
pub struct AsyncOutcome {
    pub job: Job,
    pub result: Result<JobState, ExecutionError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStatus {
    Pending,
    Ready,
    /// The worker ended without reporting a result.
    Lost,
}

pub struct AsyncExecution {
    cancel: CancellationToken,
    receiver: oneshot::Receiver<AsyncOutcome>,
    outcome: Option<AsyncOutcome>,
    worker: Option<JoinHandle<()>>,
    lost: bool,
}

impl Job {
    /// Executes the job on a new thread.
    ///
    /// Dropping the returned handle does not stop the job; call
    /// [`AsyncExecution::cancel`] for that.
    pub fn execute_async(mut self) -> AsyncExecution {
        let cancel = self.cancel_token();
        let (sender, receiver) = oneshot::channel();
        let worker = thread::Builder::new()
            .name(format!("jobflow-{}", self.name()))
            .spawn(move || {
                let result = self.execute();
                // The receiver may be gone; the job has still finished.
                let _ = sender.send(AsyncOutcome { job: self, result });
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "failed to spawn job worker thread");
                None
            }
        };

        AsyncExecution {
            cancel,
            receiver,
            outcome: None,
            worker,
            lost: false,
        }
    }
}

impl AsyncExecution {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Checks for completion without blocking.
    pub fn poll(&mut self) -> AsyncStatus {
        if self.outcome.is_some() {
            return AsyncStatus::Ready;
        }
        if self.lost {
            return AsyncStatus::Lost;
        }
        match self.receiver.try_recv() {
            Ok(outcome) => {
                self.outcome = Some(outcome);
                self.reap();
                AsyncStatus::Ready
            }
            Err(TryRecvError::Empty) => AsyncStatus::Pending,
            Err(TryRecvError::Closed) => {
                self.lost = true;
                self.reap();
                AsyncStatus::Lost
            }
        }
    }

    /// The outcome, once [`poll`](Self::poll) has returned `Ready`.
    pub fn outcome(&self) -> Option<&AsyncOutcome> {
        self.outcome.as_ref()
    }

    /// Blocks the calling thread until the job finishes. Must not be called
    /// from inside an async runtime; use [`join`](Self::join) there.
    pub fn wait(mut self) -> Result<AsyncOutcome, ExecutionError> {
        if let Some(outcome) = self.outcome.take() {
            return Ok(outcome);
        }
        let outcome = self
            .receiver
            .blocking_recv()
            .map_err(|_| ExecutionError::WorkerLost);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        outcome
    }

    /// Awaits the job without blocking the runtime.
    pub async fn join(mut self) -> Result<AsyncOutcome, ExecutionError> {
        if let Some(outcome) = self.outcome.take() {
            return Ok(outcome);
        }
        self.receiver.await.map_err(|_| ExecutionError::WorkerLost)
    }

    fn reap(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for AsyncExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncExecution")
            .field("ready", &self.outcome.is_some())
            .field("lost", &self.lost)
            .finish()
    }
}
