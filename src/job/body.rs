use std::collections::BTreeMap;

use super::context::ExecutionContext;
use super::group::{DEFAULT_FAN_OUT, SupportsGroupFanOut};
use crate::error::{ExecutionError, PropertyError};
use crate::property::PropertyRegistry;

/// The unit of work a [`Job`](super::Job) runs.
///
/// The engine treats the body as opaque: it declares properties, is handed an
/// [`ExecutionContext`] when it runs, and reports success or failure.
pub trait JobBody: Send {
    fn name(&self) -> &str;

    fn version(&self) -> u32 {
        1
    }

    /// One-line description for listings.
    fn summary(&self) -> &str {
        ""
    }

    /// Declares every property. Called once by `Job::initialize`.
    fn declare(&self, props: &mut PropertyRegistry) -> Result<(), PropertyError>;

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError>;

    /// Runs after every successful property set, e.g. to re-derive dependent
    /// properties.
    fn after_property_set(
        &mut self,
        _name: &str,
        _props: &mut PropertyRegistry,
    ) -> Result<(), PropertyError> {
        Ok(())
    }

    /// Cross-property checks, merged with the per-property validators.
    fn validate_inputs(&self, _props: &PropertyRegistry) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Collection inputs are unrolled one member per child job unless the body
    /// opts out by returning `None` and handles collections itself.
    fn group_fan_out(&self) -> Option<&dyn SupportsGroupFanOut> {
        Some(&DEFAULT_FAN_OUT)
    }
}
