//! Jobs: the state machine, the body trait, and the machinery that runs a
//! body with locking, progress, cancellation, fan-out and provenance.

mod async_exec;
mod body;
mod child;
mod context;
mod factory;
mod group;
mod instance;
mod state;

pub use async_exec::{AsyncExecution, AsyncOutcome, AsyncStatus};
pub use body::JobBody;
pub use child::ChildJobOrchestrator;
pub use context::ExecutionContext;
pub use factory::{JobCatalog, JobFactory};
pub use group::{DEFAULT_FAN_OUT, DefaultFanOut, GroupExpander, GroupPlan, MemberFailure, SupportsGroupFanOut};
pub use instance::Job;
pub use state::{InvalidTransition, JobEvent, JobState, StateMachine};
