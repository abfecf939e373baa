//! Terminal output: a progress bar fed by a job's [`ProgressHub`] and
//! colored summaries.
//!
//! [`JobProgress`] subscribes to the hub as an ordinary observer, so it sees
//! child progress already rescaled into the job's own range.
//!
//! [`ProgressHub`]: crate::progress::ProgressHub

use std::sync::Arc;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{ExecutionError, ValidationErrors};
use crate::history::HistoryRecord;
use crate::job::{Job, JobState, MemberFailure};
use crate::progress::{ProgressEvent, ProgressObserver, ProgressPhase};
use crate::property::Direction;

const STEPS: u64 = 1000;

pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    pub fn start(description: &str) -> Arc<Self> {
        let pb = ProgressBar::new(STEPS);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style.progress_chars("=> "));
        pb.set_message(description.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Arc::new(Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        })
    }

    pub fn interrupted(&self) {
        self.pb
            .println(format!("  {} Cancelling...", self.yellow.apply_to("↻")));
    }

    /// Clears the bar and prints the final state.
    pub fn complete(&self, result: &Result<JobState, ExecutionError>) {
        self.pb.finish_and_clear();
        match result {
            Ok(JobState::Succeeded) => {
                println!("  {} Job completed successfully", self.green.apply_to("✓"));
            }
            Ok(state) => {
                println!("  {} Job {state}", self.yellow.apply_to("■"));
            }
            Err(e) => {
                println!("  {} Job failed: {e}", self.red.apply_to("✗"));
            }
        }
    }

    pub fn print_member_failures(&self, failures: &[MemberFailure]) {
        for failure in failures {
            println!(
                "  {} member {} skipped: {}",
                self.yellow.apply_to("!"),
                failure.index + 1,
                failure.error
            );
        }
    }
}

impl ProgressObserver for JobProgress {
    fn on_event(&self, event: &ProgressEvent) -> anyhow::Result<()> {
        match event.phase {
            ProgressPhase::Started => self.pb.set_message(event.message.clone()),
            ProgressPhase::Progress => {
                self.pb.set_position((event.fraction * STEPS as f64).round() as u64);
                self.pb.set_message(event.message.clone());
            }
            ProgressPhase::Finished => self.pb.set_position(STEPS),
            ProgressPhase::Error => self
                .pb
                .println(format!("  {} {}", self.red.apply_to("✗"), event.message)),
        }
        Ok(())
    }
}

pub fn print_validation(job: &str, errors: &ValidationErrors) {
    let red = Style::new().red().bold();
    println!("{} {job} cannot run:", red.apply_to("✗"));
    for (name, reason) in &errors.0 {
        println!("    {name}: {reason}");
    }
}

pub fn print_catalog(entries: &[(String, u32, String)]) {
    let bold = Style::new().bold();
    for (name, version, summary) in entries {
        println!("{} v{version}  {summary}", bold.apply_to(name));
    }
}

/// Every bound output with its payload.
pub fn print_outputs(job: &Job) {
    let cyan = Style::new().cyan();
    for p in job.properties().iter().filter(|p| p.direction().is_output()) {
        match p.data_handle() {
            Some(handle) if handle.is_collection() => {
                println!("{} = {}", cyan.apply_to(p.name()), handle.name());
                for member in handle.members() {
                    let payload = member.payload().unwrap_or_default();
                    println!("    {} = {payload}", member.name());
                }
            }
            Some(handle) => {
                let payload = handle.payload().unwrap_or_default();
                println!("{} = {} {payload}", cyan.apply_to(p.name()), handle.name());
            }
            None if p.direction() == Direction::Output => {
                println!("{} = {}", cyan.apply_to(p.name()), p.value().to_literal());
            }
            None => {}
        }
    }
}

/// The record as pretty JSON.
pub fn print_history(record: &HistoryRecord) {
    let green = Style::new().green().bold();
    println!();
    println!("{}", green.apply_to("─── History ───"));
    println!("{}", record.to_json().unwrap_or_default());
}
