use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::data::LockMode;
use crate::job::{InvalidTransition, JobState};

/// Crate-level error for the CLI and configuration surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Property error: {0}")]
    Property(#[from] PropertyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failures raised by the property registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropertyError {
    #[error("Property '{0}' is already declared")]
    Duplicate(String),

    #[error("Unknown property '{0}'")]
    Unknown(String),

    #[error("Invalid value for '{name}': {reason}")]
    Validation { name: String, reason: String },

    #[error("Property '{name}' expects {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Cannot parse '{literal}' for '{name}': {reason}")]
    Parse {
        name: String,
        literal: String,
        reason: String,
    },

    #[error("Data object '{object}' for property '{name}' does not exist")]
    MissingObject { name: String, object: String },
}

/// Aggregated validation failures, one entry per invalid property.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub BTreeMap<String, String>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(name, reason)| format!("{name}: {reason}"))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// A lock request that collided with an outstanding ticket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Data object '{object}' is busy, cannot take {mode} lock")]
pub struct ResourceBusyError {
    pub object: String,
    pub mode: LockMode,
}

/// A job body could not declare its properties.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to initialize job '{job}': {reason}")]
pub struct InitializationError {
    pub job: String,
    pub reason: String,
}

/// Everything that can take a job out of `Running` other than success.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Job must be initialized before it is executed")]
    NotInitialized,

    #[error("Job has already finished in state {0}; construct a fresh instance")]
    AlreadyExecuted(JobState),

    #[error(transparent)]
    Initialization(#[from] InitializationError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Invalid properties: {0}")]
    Validation(ValidationErrors),

    #[error(transparent)]
    ResourceBusy(#[from] ResourceBusyError),

    #[error("Collection inputs disagree on member count: {}", format_sizes(.sizes))]
    GroupSizeMismatch { sizes: Vec<(String, usize)> },

    #[error("Collection bound to '{0}' has no members")]
    EmptyCollection(String),

    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error("No job registered as '{name}' v{version}")]
    UnknownJob { name: String, version: u32 },

    #[error("Child job '{job}' failed: {source}")]
    ChildFailed {
        job: String,
        #[source]
        source: Box<ExecutionError>,
    },

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Worker thread ended without reporting a result")]
    WorkerLost,

    #[error(transparent)]
    Body(#[from] anyhow::Error),
}

impl ExecutionError {
    /// True when this error, or the child failure it wraps, is a cancellation.
    pub fn is_cancellation(&self) -> bool {
        match self {
            ExecutionError::Cancelled => true,
            ExecutionError::ChildFailed { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}

fn format_sizes(sizes: &[(String, usize)]) -> String {
    sizes
        .iter()
        .map(|(name, count)| format!("{name}={count}"))
        .collect::<Vec<_>>()
        .join(", ")
}
