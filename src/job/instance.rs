use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::body::JobBody;
use super::child::ChildJobOrchestrator;
use super::context::ExecutionContext;
use super::group::{DEFAULT_FAN_OUT, GroupExpander, GroupPlan, MemberFailure, shared_tickets};
use super::state::{JobEvent, JobState, StateMachine};
use crate::data::{DataObjectHandle, LockTicket};
use crate::engine::{EngineContext, FinishedJob};
use crate::error::{ExecutionError, InitializationError, PropertyError, ValidationErrors};
use crate::history::{HistoryRecord, HistoryRecorder, NodeId};
use crate::logging::Logger;
use crate::progress::{ProgressEvent, ProgressHub};
use crate::property::{Direction, Property, PropertyRegistry, Value, ValueKind};

/// A configured invocation of a [`JobBody`].
///
/// A job is single-shot: once it reaches a terminal state it cannot run
/// again, and replaying the same work means building a new instance, for
/// example with [`Job::from_history`].
pub struct Job {
    id: Uuid,
    body: Box<dyn JobBody>,
    props: PropertyRegistry,
    state: JobState,
    state_history: Vec<JobState>,
    engine: Arc<EngineContext>,
    hub: Arc<ProgressHub>,
    logger: Logger,
    cancel: CancellationToken,
    is_child: bool,
    rethrow: bool,
    record_history: bool,
    continue_on_member_failure: bool,
    history: Option<HistoryRecord>,
    member_failures: Vec<MemberFailure>,
    last_error: Option<String>,
    finished_at: Option<Instant>,
}

impl Job {
    /// A top-level job. Call [`initialize`](Self::initialize) before use, or
    /// build it with [`EngineContext::create_job`] which does so.
    pub fn new(body: Box<dyn JobBody>, engine: Arc<EngineContext>) -> Self {
        let logger = Logger::new(Arc::clone(engine.sink()), body.name());
        let record_history = engine.config().record_history;
        let continue_on_member_failure = engine.config().continue_on_member_failure;
        Self {
            id: Uuid::new_v4(),
            body,
            props: PropertyRegistry::new(),
            state: JobState::Uninitialized,
            state_history: Vec::new(),
            engine,
            hub: ProgressHub::new(),
            logger,
            cancel: CancellationToken::new(),
            is_child: false,
            rethrow: true,
            record_history,
            continue_on_member_failure,
            history: None,
            member_failures: Vec::new(),
            last_error: None,
            finished_at: None,
        }
    }

    pub(crate) fn child(
        body: Box<dyn JobBody>,
        engine: Arc<EngineContext>,
        hub: Arc<ProgressHub>,
        cancel: CancellationToken,
        enable_logging: bool,
        record_history: bool,
    ) -> Self {
        let mut job = Self::new(body, engine);
        job.hub = hub;
        job.cancel = cancel;
        job.is_child = true;
        job.logger = job.logger.with_enabled(enable_logging);
        job.record_history = record_history;
        job
    }

    /// Rebuilds the job recorded at `node` of `record`, configured with the
    /// recorded non-default properties, ready to execute again.
    ///
    /// A child node may read objects that only existed inside its parent's
    /// run, such as a sibling's output. Those are regenerated first by
    /// replaying the earlier node that wrote them, which leaves them in the
    /// store.
    pub fn from_history(
        record: &HistoryRecord,
        node: NodeId,
        engine: &Arc<EngineContext>,
    ) -> Result<Job, ExecutionError> {
        let recorded = record
            .node(node)
            .ok_or_else(|| anyhow!("history has no node {node}"))?;
        let mut job = engine.create_job(&recorded.job_name, recorded.version)?;
        for (name, literal) in recorded.literals() {
            let reads_data = job
                .props
                .property(&name)
                .is_ok_and(|p| p.kind() == ValueKind::Data && p.direction().is_input());
            if reads_data
                && !literal.is_empty()
                && engine.store().resolve(&literal).is_none()
                && let Some(producer) = producer_of(record, node, &literal)
            {
                let mut rerun = Job::from_history(record, producer, engine)?;
                match rerun.execute()? {
                    JobState::Succeeded => {}
                    state => {
                        return Err(anyhow!(
                            "replaying {} to regenerate '{literal}' ended {state}",
                            rerun.name()
                        )
                        .into());
                    }
                }
            }
            job.set_property_value(&name, &literal)?;
        }
        Ok(job)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        self.body.name()
    }

    pub fn version(&self) -> u32 {
        self.body.version()
    }

    pub fn summary(&self) -> &str {
        self.body.summary()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Every state the job has left, oldest first.
    pub fn state_history(&self) -> &[JobState] {
        &self.state_history
    }

    pub fn is_child(&self) -> bool {
        self.is_child
    }

    pub fn is_executed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn engine(&self) -> &Arc<EngineContext> {
        &self.engine
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Declares the body's properties. Calling it again is a no-op.
    pub fn initialize(&mut self) -> Result<(), InitializationError> {
        if self.state != JobState::Uninitialized {
            return Ok(());
        }
        let failed = |reason: String| InitializationError {
            job: self.body.name().to_string(),
            reason,
        };
        self.body
            .declare(&mut self.props)
            .map_err(|e| failed(e.to_string()))?;
        let next = StateMachine::next(self.state, JobEvent::Initialize)
            .map_err(|e| failed(e.to_string()))?;
        self.state_history.push(self.state);
        self.state = next;
        Ok(())
    }

    fn advance(&mut self, event: JobEvent) -> Result<(), ExecutionError> {
        let next = StateMachine::next(self.state, event)?;
        self.state_history.push(self.state);
        self.state = next;
        Ok(())
    }

    // Properties

    pub fn properties(&self) -> &PropertyRegistry {
        &self.props
    }

    pub fn property(&self, name: &str) -> Result<&Property, PropertyError> {
        self.props.property(name)
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<Value>) -> Result<(), PropertyError> {
        self.props.set(name, value)?;
        self.body.after_property_set(name, &mut self.props)
    }

    /// Sets a property from its literal form. Data literals are resolved
    /// against the engine's store.
    pub fn set_property_value(&mut self, name: &str, literal: &str) -> Result<(), PropertyError> {
        let store = Arc::clone(self.engine.store());
        self.props.set_literal(name, literal, Some(store.as_ref()))?;
        self.body.after_property_set(name, &mut self.props)
    }

    pub fn set_properties_from_string(&mut self, input: &str) -> Result<(), PropertyError> {
        for (name, literal) in PropertyRegistry::parse_literal_string(input)? {
            self.set_property_value(&name, &literal)?;
        }
        Ok(())
    }

    pub fn properties_to_string(&self) -> String {
        self.props.to_literal_string()
    }

    /// The object bound to a data property, e.g. an output after execution.
    pub fn output_data(&self, name: &str) -> Result<DataObjectHandle, PropertyError> {
        self.props.get_data(name)
    }

    /// Per-property validators merged with the body's cross-property checks.
    /// Empty means the job may run.
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = self.props.validate_all();
        for (name, reason) in self.body.validate_inputs(&self.props) {
            errors.0.entry(name).or_insert(reason);
        }
        errors
    }

    // Flags

    pub fn set_rethrow(&mut self, rethrow: bool) {
        self.rethrow = rethrow;
    }

    pub fn rethrows(&self) -> bool {
        self.rethrow
    }

    pub fn set_record_history(&mut self, record: bool) {
        self.record_history = record;
    }

    pub fn set_continue_on_member_failure(&mut self, enabled: bool) {
        self.continue_on_member_failure = enabled;
    }

    pub fn continue_on_member_failure(&self) -> bool {
        self.continue_on_member_failure
    }

    pub fn set_logging(&mut self, enabled: bool) {
        self.logger = self.logger.clone().with_enabled(enabled);
    }

    // Progress and cancellation

    pub fn progress_hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }

    /// Requests cancellation. The body stops at its next interruption point;
    /// children observe the request too.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A handle that cancels this job from elsewhere, e.g. another thread.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // Results

    /// This invocation's provenance, set once the job succeeded.
    pub fn history(&self) -> Option<&HistoryRecord> {
        self.history.as_ref()
    }

    pub fn member_failures(&self) -> &[MemberFailure] {
        &self.member_failures
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True once the job is terminal and the grace period has passed.
    pub fn is_ready_for_garbage_collection(&self) -> bool {
        self.state.is_terminal()
            && self
                .finished_at
                .is_some_and(|t| t.elapsed() >= self.engine.config().gc_grace_period())
    }

    /// Runs the job once.
    ///
    /// Returns the terminal state for success and cancellation; any other
    /// failure is returned as an error after the job moved to `Failed`.
    /// Executing a job that is not `Initialized` is rejected without side
    /// effects.
    pub fn execute(&mut self) -> Result<JobState, ExecutionError> {
        match self.state {
            JobState::Uninitialized => return Err(ExecutionError::NotInitialized),
            JobState::Initialized => {}
            other => return Err(ExecutionError::AlreadyExecuted(other)),
        }
        self.advance(JobEvent::Start)?;

        let name = self.body.name().to_string();
        self.hub
            .publish(&ProgressEvent::started(format!("{name} started")));
        self.logger
            .debug(&format!("{name} v{} started", self.body.version()));

        let started = Instant::now();
        let (event, result) = match self.run(&name, started) {
            Ok(()) => (JobEvent::Succeed, Ok(JobState::Succeeded)),
            Err(e) if e.is_cancellation() => (JobEvent::Cancel, Ok(JobState::Cancelled)),
            Err(e) => (JobEvent::Fail, Err(e)),
        };
        self.advance(event)?;
        self.finished_at = Some(Instant::now());

        match &result {
            Ok(JobState::Cancelled) => {
                self.logger.warning(&format!("{name} cancelled"));
                self.hub
                    .publish(&ProgressEvent::error(format!("{name} cancelled")));
            }
            Ok(_) => {
                self.logger.info(&format!(
                    "{name} successful, duration {:.3}s",
                    started.elapsed().as_secs_f64()
                ));
                self.hub
                    .publish(&ProgressEvent::finished(format!("{name} finished")));
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.logger
                    .error(&format!("Error in execution of {name}: {e}"));
                self.hub
                    .publish(&ProgressEvent::error(format!("{name} failed: {e}")));
            }
        }

        if !self.is_child {
            self.engine.record_finished(FinishedJob {
                id: self.id,
                name,
                version: self.body.version(),
                state: self.state,
                finished_at: Utc::now(),
                finished_instant: Instant::now(),
            });
        }
        result
    }

    fn run(&mut self, name: &str, started: Instant) -> Result<(), ExecutionError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(ExecutionError::Validation(errors));
        }
        if self.cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let plan = match self.body.group_fan_out() {
            Some(_) => GroupExpander::plan(&self.props)?,
            None => None,
        };

        // Children run under the locks their top-level ancestor holds.
        let _locks = if self.is_child {
            None
        } else {
            let tickets = lock_tickets(&self.props, plan.as_ref());
            Some(self.engine.locks().acquire(&tickets)?)
        };

        let mut record = HistoryRecorder::begin(
            name,
            self.body.version(),
            self.engine.next_execution_count(),
            self.props.snapshot(),
        );
        let orchestrator = ChildJobOrchestrator::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.hub),
            self.cancel.clone(),
            self.logger.clone(),
            self.record_history,
        );

        if let Some(plan) = plan {
            let expander = GroupExpander {
                job_name: name,
                version: self.body.version(),
                orchestrator: &orchestrator,
                fan_out: self.body.group_fan_out().unwrap_or(&DEFAULT_FAN_OUT),
                locks: (!self.is_child).then(|| self.engine.locks()),
                retry: &self.engine.config().lock_retry,
                continue_on_member_failure: self.continue_on_member_failure,
                logger: &self.logger,
                cancel: &self.cancel,
            };
            self.member_failures = expander.run(&plan, &mut self.props, &mut record)?;
        } else {
            let mut ctx = ExecutionContext::new(
                name,
                &mut self.props,
                &self.hub,
                &self.cancel,
                &self.logger,
                &mut record,
                &orchestrator,
            );
            self.body.execute(&mut ctx)?;
        }

        let elapsed = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        HistoryRecorder::finish(&mut record, elapsed);
        self.publish_outputs(&record);
        self.history = Some(record);
        Ok(())
    }

    /// Names, stores and stamps the objects bound to output properties.
    ///
    /// Children leave this to the top-level job, which sees their outputs
    /// through its own properties.
    fn publish_outputs(&self, record: &HistoryRecord) {
        if self.is_child {
            return;
        }
        let inputs: Vec<DataObjectHandle> = self
            .props
            .iter()
            .filter(|p| p.direction() == Direction::Input)
            .filter_map(|p| p.data_handle().cloned())
            .collect();

        let mut stamped: Vec<DataObjectHandle> = Vec::new();
        for p in self.props.iter().filter(|p| p.direction().is_output()) {
            let Some(data) = p.value().as_data() else {
                continue;
            };
            let Some(handle) = data.handle() else {
                if !data.is_empty() {
                    self.logger
                        .warning(&format!("output '{}' was not produced", p.name()));
                }
                continue;
            };
            if !data.name().is_empty() {
                if handle.name() != data.name() {
                    handle.rename(data.name());
                }
                self.engine.store().store(data.name(), handle.clone());
                for member in handle.members() {
                    let member_name = member.name();
                    if !member_name.is_empty() {
                        self.engine.store().store(&member_name, member);
                    }
                }
            }
            if p.direction() == Direction::Output {
                for input in &inputs {
                    handle.copy_history_from(input);
                }
            }
            stamped.extend(handle.flatten());
        }

        if self.record_history {
            stamped.sort();
            stamped.dedup();
            HistoryRecorder::stamp_on_outputs(record, &stamped);
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.body.name())
            .field("version", &self.body.version())
            .field("state", &self.state)
            .field("is_child", &self.is_child)
            .finish()
    }
}

/// Tickets the top-level job holds for the whole run. Objects inside an
/// unrolled collection are left to the expander, which locks them per member.
fn lock_tickets(props: &PropertyRegistry, plan: Option<&GroupPlan>) -> Vec<LockTicket> {
    let mut tickets = shared_tickets(props, plan);
    if let Some(plan) = plan {
        let fanned = plan.fanned_objects(props);
        tickets.retain(|t| !fanned.contains(&t.object));
    }
    tickets
}

/// The latest node before `node` that wrote an object called `object`, not
/// counting `node`'s own ancestors.
fn producer_of(record: &HistoryRecord, node: NodeId, object: &str) -> Option<NodeId> {
    let mut ancestors = Vec::new();
    let mut cursor = record.parent(node);
    while let Some(id) = cursor {
        ancestors.push(id);
        cursor = record.parent(id);
    }
    (0..node).rev().filter(|id| !ancestors.contains(id)).find(|&id| {
        record.node(id).is_some_and(|n| {
            n.properties
                .iter()
                .any(|p| p.direction.is_output() && !p.is_default && p.value == object)
        })
    })
}
