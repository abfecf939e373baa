use tokio_util::sync::CancellationToken;

use super::Job;
use super::child::ChildJobOrchestrator;
use crate::data::DataObjectHandle;
use crate::error::{ExecutionError, PropertyError};
use crate::history::HistoryRecord;
use crate::logging::Logger;
use crate::progress::ProgressHub;
use crate::property::{DataRef, PropertyRegistry, Value};

/// What a running [`JobBody`](super::JobBody) can see and do.
pub struct ExecutionContext<'a> {
    job_name: &'a str,
    props: &'a mut PropertyRegistry,
    hub: &'a ProgressHub,
    cancel: &'a CancellationToken,
    logger: &'a Logger,
    record: &'a mut HistoryRecord,
    children: &'a ChildJobOrchestrator,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        job_name: &'a str,
        props: &'a mut PropertyRegistry,
        hub: &'a ProgressHub,
        cancel: &'a CancellationToken,
        logger: &'a Logger,
        record: &'a mut HistoryRecord,
        children: &'a ChildJobOrchestrator,
    ) -> Self {
        Self {
            job_name,
            props,
            hub,
            cancel,
            logger,
            record,
            children,
        }
    }

    pub fn job_name(&self) -> &str {
        self.job_name
    }

    pub fn props(&self) -> &PropertyRegistry {
        &*self.props
    }

    pub fn props_mut(&mut self) -> &mut PropertyRegistry {
        &mut *self.props
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<Value>) -> Result<(), PropertyError> {
        self.props.set(name, value)
    }

    /// The name requested for a data output; empty if none was given.
    pub fn output_name(&self, name: &str) -> Result<String, PropertyError> {
        let value = self.props.get(name)?;
        Ok(value
            .as_data()
            .map(|d| d.name().to_string())
            .unwrap_or_default())
    }

    /// Binds a produced object to a data output, keeping the requested name.
    pub fn set_output_data(
        &mut self,
        name: &str,
        handle: DataObjectHandle,
    ) -> Result<(), PropertyError> {
        let requested = self.output_name(name)?;
        let data = if requested.is_empty() {
            DataRef::from(handle)
        } else {
            DataRef::bound(requested, handle)
        };
        self.props.set(name, data)
    }

    /// Publishes a `Progress` event; `fraction` is clamped to `[0, 1]`.
    pub fn progress(&self, fraction: f64, message: impl Into<String>) {
        self.hub.report(fraction, message);
    }

    /// Returns `Err(Cancelled)` once cancellation has been requested. Bodies
    /// call this between units of work.
    pub fn interruption_point(&self) -> Result<(), ExecutionError> {
        if self.cancel.is_cancelled() {
            Err(ExecutionError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn log(&self) -> &Logger {
        self.logger
    }

    /// Creates a child job reporting into `[start, end]` of this job's range.
    pub fn spawn_child(
        &self,
        name: &str,
        version: u32,
        start: f64,
        end: f64,
        enable_logging: bool,
    ) -> Result<Job, ExecutionError> {
        self.children.spawn(name, version, start, end, enable_logging)
    }

    /// See [`ChildJobOrchestrator::run`].
    pub fn run_child(&mut self, child: &mut Job) -> Result<bool, ExecutionError> {
        self.children.run(child, &mut *self.record)
    }

    /// This invocation's record so far.
    pub fn history(&self) -> &HistoryRecord {
        &*self.record
    }
}
