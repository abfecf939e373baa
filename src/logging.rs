//! Per-job logging.
//!
//! Every job gets a [`Logger`] bound to its name. The logger writes to a
//! [`LogSink`]; the default sink forwards to `tracing`, and tests swap in a
//! [`MemorySink`] to assert on what a job reported.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, job: &str, message: &str);
}

/// Forwards to the `tracing` macros with the job name as a field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, job: &str, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(job = %job, "{message}"),
            LogLevel::Info => tracing::info!(job = %job, "{message}"),
            LogLevel::Warning => tracing::warn!(job = %job, "{message}"),
            LogLevel::Error => tracing::error!(job = %job, "{message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: LogLevel,
    pub job: String,
    pub message: String,
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<LogLine>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|l| l.level == level && l.message.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: LogLevel, job: &str, message: &str) {
        self.lines.lock().push(LogLine {
            level,
            job: job.to_string(),
            message: message.to_string(),
        });
    }
}

#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    job: String,
    enabled: bool,
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>, job: impl Into<String>) -> Self {
        Self {
            sink,
            job: job.into(),
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if self.enabled {
            self.sink.log(level, &self.job, message);
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("job", &self.job)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "jobflow=debug" } else { "jobflow=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
