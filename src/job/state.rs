use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of a single job instance.
///
/// Uninitialized → Initialized → Running → Succeeded | Failed | Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Uninitialized,
    Initialized,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// Terminal states never transition again; a fresh instance is needed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Uninitialized => write!(f, "uninitialized"),
            JobState::Initialized => write!(f, "initialized"),
            JobState::Running => write!(f, "running"),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uninitialized" => Ok(Self::Uninitialized),
            "initialized" => Ok(Self::Initialized),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

/// What happened to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Initialize,
    Start,
    Succeed,
    Fail,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot apply {event:?} to a job in state {from}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub event: JobEvent,
}

/// Transition table for [`JobState`].
pub struct StateMachine;

impl StateMachine {
    /// The state `event` moves a job in `from` to.
    ///
    /// - `Initialize` is only valid before the first initialization.
    /// - `Start` is only valid from `Initialized`.
    /// - `Succeed`, `Fail` and `Cancel` are only valid while `Running`.
    pub fn next(from: JobState, event: JobEvent) -> Result<JobState, InvalidTransition> {
        let to = match (from, event) {
            (JobState::Uninitialized, JobEvent::Initialize) => JobState::Initialized,
            (JobState::Initialized, JobEvent::Start) => JobState::Running,
            (JobState::Running, JobEvent::Succeed) => JobState::Succeeded,
            (JobState::Running, JobEvent::Fail) => JobState::Failed,
            (JobState::Running, JobEvent::Cancel) => JobState::Cancelled,
            _ => return Err(InvalidTransition { from, event }),
        };
        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [JobState; 6] = [
        JobState::Uninitialized,
        JobState::Initialized,
        JobState::Running,
        JobState::Succeeded,
        JobState::Failed,
        JobState::Cancelled,
    ];

    const ALL_EVENTS: [JobEvent; 5] = [
        JobEvent::Initialize,
        JobEvent::Start,
        JobEvent::Succeed,
        JobEvent::Fail,
        JobEvent::Cancel,
    ];

    #[test]
    fn happy_path_walks_all_states() {
        let s = StateMachine::next(JobState::Uninitialized, JobEvent::Initialize).unwrap();
        assert_eq!(s, JobState::Initialized);
        let s = StateMachine::next(s, JobEvent::Start).unwrap();
        assert_eq!(s, JobState::Running);
        let s = StateMachine::next(s, JobEvent::Succeed).unwrap();
        assert_eq!(s, JobState::Succeeded);
        assert!(s.is_terminal());
    }

    #[test]
    fn running_can_fail_or_cancel() {
        assert_eq!(
            StateMachine::next(JobState::Running, JobEvent::Fail),
            Ok(JobState::Failed)
        );
        assert_eq!(
            StateMachine::next(JobState::Running, JobEvent::Cancel),
            Ok(JobState::Cancelled)
        );
    }

    #[test]
    fn terminal_states_reject_every_event() {
        for from in ALL_STATES.into_iter().filter(JobState::is_terminal) {
            for event in ALL_EVENTS {
                assert_eq!(
                    StateMachine::next(from, event),
                    Err(InvalidTransition { from, event })
                );
            }
        }
    }

    #[test]
    fn cannot_start_without_initializing() {
        assert!(StateMachine::next(JobState::Uninitialized, JobEvent::Start).is_err());
        assert!(StateMachine::next(JobState::Initialized, JobEvent::Succeed).is_err());
    }

    #[test]
    fn state_display_round_trips() {
        for state in ALL_STATES {
            assert_eq!(state.to_string().parse::<JobState>(), Ok(state));
        }
        assert_eq!(JobState::Succeeded.to_string(), "succeeded");
        assert!("done".parse::<JobState>().is_err());
    }
}
