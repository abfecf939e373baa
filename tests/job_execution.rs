mod common;

use std::sync::Arc;

use common::{Harness, numbers};
use jobflow::config::EngineConfig;
use jobflow::data::{DataObjectHandle, DataStore, LockTicket};
use jobflow::error::{ExecutionError, PropertyError};
use jobflow::history::{HistoryRecord, ROOT};
use jobflow::job::{AsyncStatus, ExecutionContext, Job, JobBody, JobState};
use jobflow::jobs::{INPUT, OUTPUT};
use jobflow::logging::LogLevel;
use jobflow::progress::{ProgressEvent, ProgressPhase};
use jobflow::property::{DataMode, Direction, PropertyRegistry};
use parking_lot::Mutex;
use serde_json::json;

fn record_events(job: &Job) -> Arc<Mutex<Vec<ProgressEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    job.progress_hub()
        .subscribe(move |e: &ProgressEvent| -> anyhow::Result<()> {
            sink.lock().push(e.clone());
            Ok(())
        });
    events
}

#[test]
fn scale_produces_named_stored_output() {
    let h = Harness::new();
    h.put("in", numbers(&[1.0, 2.0, 3.0]));

    let mut job = h.engine.create_job("Scale", 1).unwrap();
    job.set_properties_from_string("InputData=in;Factor=2;OutputData=out")
        .unwrap();
    assert_eq!(job.execute().unwrap(), JobState::Succeeded);

    let out = h.store.retrieve("out").unwrap();
    assert_eq!(out.name(), "out");
    assert_eq!(out.payload(), Some(json!([2.0, 4.0, 6.0])));
    assert_eq!(out.history().len(), 1);
    assert_eq!(out.history()[0].root().job_name, "Scale");
    assert!(job.is_executed());
    assert_eq!(
        job.state_history(),
        &[JobState::Uninitialized, JobState::Initialized, JobState::Running]
    );
    assert_eq!(h.engine.locks().outstanding(), 0);
}

#[test]
fn invalid_properties_are_reported_together_and_the_job_is_final() {
    let h = Harness::new();
    let mut job = h.engine.create_job("Scale", 1).unwrap();

    let errors = job.validate();
    assert!(errors.get(INPUT).is_some());
    assert!(errors.get(OUTPUT).is_some());
    assert!(errors.get("Factor").is_none());

    match job.execute() {
        Err(ExecutionError::Validation(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("expected validation failure, got {other:?}"),
    }
    assert_eq!(job.state(), JobState::Failed);
    assert!(job.last_error().is_some());
    assert!(matches!(
        job.execute(),
        Err(ExecutionError::AlreadyExecuted(JobState::Failed))
    ));
}

#[test]
fn rejected_value_keeps_the_default() {
    let h = Harness::new();
    let mut job = h.engine.create_job("Scale", 1).unwrap();
    assert!(matches!(
        job.set_property("Factor", -1.0),
        Err(PropertyError::Validation { .. })
    ));
    assert_eq!(job.properties().get_f64("Factor").unwrap(), 1.0);
    assert!(matches!(
        job.set_property("Nope", 1),
        Err(PropertyError::Unknown(_))
    ));
}

#[test]
fn failed_job_publishes_error_and_releases_locks() {
    let h = Harness::new();
    h.put("in", json!(["not", "numbers"]));
    let mut job = h.engine.create_job("Scale", 1).unwrap();
    job.set_properties_from_string("InputData=in;OutputData=out")
        .unwrap();
    let events = record_events(&job);

    assert!(matches!(job.execute(), Err(ExecutionError::Body(_))));
    assert_eq!(job.state(), JobState::Failed);
    assert_eq!(h.engine.locks().outstanding(), 0);
    assert!(!h.store.exists("out"));

    let events = events.lock();
    assert_eq!(events.first().unwrap().phase, ProgressPhase::Started);
    assert_eq!(events.last().unwrap().phase, ProgressPhase::Error);
    assert!(h.sink.contains(LogLevel::Error, "Error in execution of Scale"));
}

#[test]
fn write_locked_object_makes_second_job_busy() {
    let h = Harness::new();
    let x = h.put("x", json!(0));

    let held = h.engine.locks().acquire(&[LockTicket::write(&x)]).unwrap();

    let mut blocked = h.engine.create_job("Countdown", 1).unwrap();
    blocked.set_property_value("Target", "x").unwrap();
    blocked.set_property("Iterations", 2).unwrap();
    assert!(matches!(
        blocked.execute(),
        Err(ExecutionError::ResourceBusy(_))
    ));
    assert_eq!(blocked.state(), JobState::Failed);

    drop(held);
    assert_eq!(h.engine.locks().outstanding(), 0);

    let mut retry = h.engine.create_job("Countdown", 1).unwrap();
    retry.set_property_value("Target", "x").unwrap();
    retry.set_property("Iterations", 2).unwrap();
    assert_eq!(retry.execute().unwrap(), JobState::Succeeded);
    assert_eq!(x.payload(), Some(json!(2)));
    assert_eq!(retry.properties().get_i64("Completed").unwrap(), 2);
}

#[test]
fn readers_share_an_object() {
    let h = Harness::new();
    let input = h.put("in", numbers(&[1.0]));
    let _reader = h.engine.locks().acquire(&[LockTicket::read(&input)]).unwrap();

    let mut job = h.engine.create_job("Shift", 1).unwrap();
    job.set_properties_from_string("InputData=in;Offset=1;OutputData=out")
        .unwrap();
    assert_eq!(job.execute().unwrap(), JobState::Succeeded);
    assert_eq!(h.engine.locks().outstanding(), 1);
}

#[test]
fn composite_job_nests_progress_and_history() {
    let h = Harness::new();
    h.put("in", numbers(&[1.0, 2.0]));

    let mut job = h.engine.create_job("ScaleAndShift", 1).unwrap();
    job.set_properties_from_string("InputData=in;Factor=3;Offset=1;OutputData=out")
        .unwrap();
    let events = record_events(&job);
    assert_eq!(job.execute().unwrap(), JobState::Succeeded);

    assert_eq!(
        h.store.retrieve("out").unwrap().payload(),
        Some(json!([4.0, 7.0]))
    );
    assert!(!h.store.exists("out.scaled"));

    let fractions: Vec<f64> = events
        .lock()
        .iter()
        .filter(|e| e.phase == ProgressPhase::Progress)
        .map(|e| e.fraction)
        .collect();
    assert_eq!(fractions, vec![0.25, 0.5, 0.75, 1.0]);

    let record = job.history().unwrap();
    let children: Vec<&str> = record
        .children(ROOT)
        .into_iter()
        .map(|id| record.node(id).unwrap().job_name.as_str())
        .collect();
    assert_eq!(children, vec!["Scale", "Shift"]);
}

#[test]
fn history_replay_reproduces_the_outcome() {
    let h = Harness::new();
    h.put("in", numbers(&[1.0, 2.0]));

    let mut job = h.engine.create_job("ScaleAndShift", 1).unwrap();
    job.set_properties_from_string("InputData=in;Factor=2;Offset=0.5;OutputData=out")
        .unwrap();
    assert_eq!(job.execute().unwrap(), JobState::Succeeded);
    let first = h.store.retrieve("out").unwrap().payload();

    let json = h.store.retrieve("out").unwrap().history()[0].to_json().unwrap();
    let record = HistoryRecord::from_json(&json).unwrap();
    assert_eq!(record.len(), 3);

    let mut replay = Job::from_history(&record, ROOT, &h.engine).unwrap();
    assert_eq!(replay.properties_to_string(), job.properties_to_string());
    assert_eq!(replay.execute().unwrap(), JobState::Succeeded);
    assert_eq!(h.store.retrieve("out").unwrap().payload(), first);

    // Shift reads the intermediate object its sibling wrote, which never
    // reached the store; replaying Shift regenerates it first.
    assert!(!h.store.exists("out.scaled"));
    h.store.remove("out");
    let shift_node = record.children(ROOT)[1];
    let mut shift_replay = Job::from_history(&record, shift_node, &h.engine).unwrap();
    assert_eq!(shift_replay.name(), "Shift");
    assert!(h.store.exists("out.scaled"));
    assert_eq!(shift_replay.execute().unwrap(), JobState::Succeeded);
    assert_eq!(h.store.retrieve("out").unwrap().payload(), first);

    let scale_node = record.children(ROOT)[0];
    let mut child_replay = Job::from_history(&record, scale_node, &h.engine).unwrap();
    assert_eq!(child_replay.name(), "Scale");
    assert!(child_replay.validate().is_empty());
    assert_eq!(child_replay.execute().unwrap(), JobState::Succeeded);

    // A fan-out member reads one member of a stored collection.
    h.put_collection("c", vec![numbers(&[1.0]), numbers(&[3.0])]);
    let mut fanned = h.engine.create_job("Scale", 1).unwrap();
    fanned
        .set_properties_from_string("InputData=c;Factor=2;OutputData=fanned")
        .unwrap();
    assert_eq!(fanned.execute().unwrap(), JobState::Succeeded);
    assert!(h.store.exists("fanned_1"));
    assert!(h.store.exists("fanned_2"));

    let record = fanned.history().unwrap().clone();
    let member_node = record.children(ROOT)[1];
    h.store.remove("fanned_2");
    let mut member_replay = Job::from_history(&record, member_node, &h.engine).unwrap();
    assert_eq!(
        member_replay.properties().get_data(INPUT).unwrap().name(),
        "c_2"
    );
    assert_eq!(member_replay.execute().unwrap(), JobState::Succeeded);
    assert_eq!(
        h.store.retrieve("fanned_2").unwrap().payload(),
        Some(json!([6.0]))
    );
}

#[test]
fn outputs_inherit_input_provenance() {
    let h = Harness::new();
    h.put("in", numbers(&[1.0]));

    let mut first = h.engine.create_job("Scale", 1).unwrap();
    first
        .set_properties_from_string("InputData=in;Factor=2;OutputData=mid")
        .unwrap();
    first.execute().unwrap();

    let mut second = h.engine.create_job("Shift", 1).unwrap();
    second
        .set_properties_from_string("InputData=mid;Offset=1;OutputData=out")
        .unwrap();
    second.execute().unwrap();

    let names: Vec<String> = h
        .store
        .retrieve("out")
        .unwrap()
        .history()
        .iter()
        .map(|r| r.root().job_name.clone())
        .collect();
    assert_eq!(names, vec!["Scale", "Shift"]);
}

#[test]
fn history_can_be_disabled() {
    let h = Harness::with_config(
        EngineConfig {
            record_history: false,
            ..EngineConfig::default()
        },
        |_| {},
    );
    h.put("in", numbers(&[1.0]));
    let mut job = h.engine.create_job("Scale", 1).unwrap();
    job.set_properties_from_string("InputData=in;OutputData=out")
        .unwrap();
    job.execute().unwrap();
    assert!(h.store.retrieve("out").unwrap().history().is_empty());
}

/// Runs a child that cannot succeed and reports whether it did.
struct Refine {
    rethrow: bool,
}

impl JobBody for Refine {
    fn name(&self) -> &str {
        if self.rethrow { "StrictRefine" } else { "Refine" }
    }

    fn declare(&self, props: &mut PropertyRegistry) -> Result<(), PropertyError> {
        props.declare("Refined", Direction::Output, true, None)
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let mut child = ctx.spawn_child("Scale", 1, 0.0, 1.0, true)?;
        child.set_rethrow(self.rethrow);
        let refined = ctx.run_child(&mut child)?;
        ctx.set_property("Refined", refined)?;
        Ok(())
    }
}

#[test]
fn optional_child_failure_is_logged_not_raised() {
    let h = Harness::with_config(EngineConfig::default(), |c| {
        c.register(|| Box::new(Refine { rethrow: false }));
        c.register(|| Box::new(Refine { rethrow: true }));
    });

    let mut lenient = h.engine.create_job("Refine", 1).unwrap();
    assert_eq!(lenient.execute().unwrap(), JobState::Succeeded);
    assert!(!lenient.properties().get_bool("Refined").unwrap());
    assert!(h.sink.contains(LogLevel::Warning, "child job Scale failed"));

    let mut strict = h.engine.create_job("StrictRefine", 1).unwrap();
    match strict.execute() {
        Err(ExecutionError::ChildFailed { job, source }) => {
            assert_eq!(job, "Scale");
            assert!(matches!(*source, ExecutionError::Validation(_)));
        }
        other => panic!("expected child failure, got {other:?}"),
    }
    assert_eq!(strict.state(), JobState::Failed);
}

/// Holds a read lock on `Resource` and runs a long countdown as a child.
struct Supervisor;

impl JobBody for Supervisor {
    fn name(&self) -> &str {
        "Supervisor"
    }

    fn declare(&self, props: &mut PropertyRegistry) -> Result<(), PropertyError> {
        props.declare_data("Resource", Direction::Input, DataMode::Mandatory)
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let mut child = ctx.spawn_child("Countdown", 1, 0.0, 1.0, true)?;
        child.set_property("Iterations", 1_000_000)?;
        child.set_property("ReportEvery", 1)?;
        ctx.run_child(&mut child)?;
        Ok(())
    }
}

#[test]
fn cancelling_parent_stops_child_at_next_interruption_point() {
    let h = Harness::with_body(|| Box::new(Supervisor));
    h.put("r", json!(null));

    let mut job = h.engine.create_job("Supervisor", 1).unwrap();
    job.set_property_value("Resource", "r").unwrap();

    let cancel = job.cancel_token();
    let seen = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&seen);
    job.progress_hub()
        .subscribe(move |e: &ProgressEvent| -> anyhow::Result<()> {
            if e.phase == ProgressPhase::Progress {
                *counter.lock() += 1;
                cancel.cancel();
            }
            Ok(())
        });
    let events = record_events(&job);

    assert_eq!(job.execute().unwrap(), JobState::Cancelled);
    assert_eq!(*seen.lock(), 1);
    assert_eq!(h.engine.locks().outstanding(), 0);
    assert!(job.history().is_none());

    let last = events.lock().last().cloned().unwrap();
    assert_eq!(last.phase, ProgressPhase::Error);
    assert!(last.message.contains("cancelled"));
}

#[test]
fn cancel_before_execute_is_observed() {
    let h = Harness::new();
    let mut job = h.engine.create_job("Countdown", 1).unwrap();
    job.cancel();
    assert_eq!(job.execute().unwrap(), JobState::Cancelled);
}

#[test]
fn async_execution_can_be_polled_and_cancelled() {
    let h = Harness::new();
    let mut job = h.engine.create_job("Countdown", 1).unwrap();
    job.set_property("Iterations", 10_000).unwrap();
    job.set_property("DelayMs", 5).unwrap();

    let mut execution = job.execute_async();
    assert_eq!(execution.poll(), AsyncStatus::Pending);
    execution.cancel();

    let outcome = execution.wait().unwrap();
    assert_eq!(outcome.result.unwrap(), JobState::Cancelled);
    assert_eq!(outcome.job.state(), JobState::Cancelled);
}

#[tokio::test]
async fn async_execution_hands_back_the_job() {
    let h = Harness::new();
    h.put("in", numbers(&[2.0]));
    let mut job = h.engine.create_job("Scale", 1).unwrap();
    job.set_properties_from_string("InputData=in;Factor=5;OutputData=out")
        .unwrap();

    let outcome = job.execute_async().join().await.unwrap();
    assert_eq!(outcome.result.unwrap(), JobState::Succeeded);
    assert_eq!(
        outcome.job.output_data(OUTPUT).unwrap().payload(),
        Some(json!([10.0]))
    );
}

#[test]
fn finished_jobs_are_cached_and_collectable() {
    let h = Harness::with_config(
        EngineConfig {
            gc_grace_period_ms: 0,
            ..EngineConfig::default()
        },
        |_| {},
    );
    let mut job = h.engine.create_job("Countdown", 1).unwrap();
    job.set_property("Iterations", 1).unwrap();
    assert!(!job.is_ready_for_garbage_collection());
    job.execute().unwrap();

    assert!(job.is_ready_for_garbage_collection());
    let finished = h.engine.recently_finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].id, job.id());
    assert_eq!(finished[0].state, JobState::Succeeded);
    assert_eq!(h.engine.collect_garbage(), 1);
}

#[test]
fn objects_outside_the_store_can_be_bound_directly() {
    let h = Harness::new();
    let handle = DataObjectHandle::new("loose", numbers(&[1.0]));
    let mut job = h.engine.create_job("Scale", 1).unwrap();
    job.set_property(INPUT, handle).unwrap();
    job.set_property_value(OUTPUT, "named").unwrap();
    assert_eq!(job.execute().unwrap(), JobState::Succeeded);
    assert!(h.store.exists("named"));
}
