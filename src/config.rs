//! Engine configuration loaded from `jobflow.toml`.
//!
//! [`EngineConfig`] holds every tunable. Keys missing from the file fall back
//! to defaults, and `JOBFLOW_CONTINUE_ON_MEMBER_FAILURE` overrides the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const CONFIG_FILE: &str = "jobflow.toml";

/// Retry policy for contended lock acquisition during group fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts after the first before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    10
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a finished job stays cached before it may be collected.
    #[serde(default = "default_gc_grace_period_ms")]
    pub gc_grace_period_ms: u64,

    /// Default for jobs that do not set the flag themselves.
    #[serde(default)]
    pub continue_on_member_failure: bool,

    #[serde(default = "default_record_history")]
    pub record_history: bool,

    /// Number of finished-job summaries kept for introspection.
    #[serde(default = "default_finished_job_cache")]
    pub finished_job_cache: usize,

    #[serde(default)]
    pub lock_retry: RetryConfig,
}

fn default_gc_grace_period_ms() -> u64 {
    5000
}

fn default_record_history() -> bool {
    true
}

fn default_finished_job_cache() -> usize {
    32
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gc_grace_period_ms: default_gc_grace_period_ms(),
            continue_on_member_failure: false,
            record_history: default_record_history(),
            finished_job_cache: default_finished_job_cache(),
            lock_retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads `jobflow.toml` from the working directory, or defaults if absent.
    pub fn load() -> Result<Self, EngineError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self, EngineError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<EngineConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(raw) = std::env::var("JOBFLOW_CONTINUE_ON_MEMBER_FAILURE")
            && !raw.is_empty()
        {
            config.continue_on_member_failure = match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(EngineError::Config(format!(
                        "JOBFLOW_CONTINUE_ON_MEMBER_FAILURE: '{other}' is not a boolean"
                    )));
                }
            };
        }

        Ok(config)
    }

    pub fn gc_grace_period(&self) -> Duration {
        Duration::from_millis(self.gc_grace_period_ms)
    }
}
