use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use console::style;

use jobflow::cli::{Cli, Command};
use jobflow::config::EngineConfig;
use jobflow::data::{DataStore, InMemoryDataStore};
use jobflow::engine::EngineContext;
use jobflow::history::HistoryRecord;
use jobflow::job::{Job, JobState};
use jobflow::logging::init_tracing;
use jobflow::{jobs, ui};

const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    let catalog = Arc::new(jobs::catalog());
    let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
    let engine = EngineContext::new(config, catalog.clone(), Arc::clone(&store));
    EngineContext::install(Arc::clone(&engine));

    match cli.command {
        Command::List => {
            ui::print_catalog(&catalog.available());
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            job,
            job_version,
            set,
            data,
            history,
            continue_on_member_failure,
        } => {
            data.load_into(store.as_ref())?;
            let mut job = match job_version {
                Some(version) => engine.create_job(&job, version)?,
                None => engine.create_latest(&job)?,
            };
            if continue_on_member_failure {
                job.set_continue_on_member_failure(true);
            }
            for (name, literal) in &set {
                job.set_property_value(name, literal)?;
            }
            execute(job, history).await
        }
        Command::Replay { file, node, data } => {
            data.load_into(store.as_ref())?;
            let record = HistoryRecord::from_json(&std::fs::read_to_string(&file)?)?;
            let job = Job::from_history(&record, node, &engine)?;
            execute(job, true).await
        }
    }
}

/// Runs `job` on a worker thread; Ctrl-C requests cancellation.
async fn execute(job: Job, show_history: bool) -> anyhow::Result<ExitCode> {
    let errors = job.validate();
    if !errors.is_empty() {
        ui::print_validation(job.name(), &errors);
        return Ok(ExitCode::FAILURE);
    }

    let progress = ui::JobProgress::start(job.name());
    job.progress_hub().subscribe_shared(progress.clone());

    let execution = job.execute_async();
    let cancel = execution.cancel_token();
    let join = execution.join();
    tokio::pin!(join);

    let outcome = tokio::select! {
        outcome = &mut join => outcome?,
        _ = tokio::signal::ctrl_c() => {
            progress.interrupted();
            cancel.cancel();
            join.await?
        }
    };

    progress.complete(&outcome.result);
    progress.print_member_failures(outcome.job.member_failures());

    match outcome.result {
        Ok(JobState::Succeeded) => {
            ui::print_outputs(&outcome.job);
            if show_history && let Some(record) = outcome.job.history() {
                ui::print_history(record);
            }
            Ok(ExitCode::SUCCESS)
        }
        Ok(JobState::Cancelled) => Ok(ExitCode::from(EXIT_CANCELLED)),
        Ok(_) | Err(_) => Ok(ExitCode::FAILURE),
    }
}
