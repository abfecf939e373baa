//! Built-in jobs.
//!
//! Small numeric transforms over data objects whose payload is a JSON array
//! of numbers, a composite that chains two of them as child jobs, and a
//! cancellable countdown.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use serde_json::Value as Json;

use crate::data::DataObjectHandle;
use crate::error::{ExecutionError, PropertyError};
use crate::job::{ExecutionContext, JobBody, JobCatalog, SupportsGroupFanOut};
use crate::property::validators;
use crate::property::{DataMode, DataRef, Direction, PropertyRegistry};

pub const INPUT: &str = "InputData";
pub const OUTPUT: &str = "OutputData";

/// A catalog holding every built-in job.
pub fn catalog() -> JobCatalog {
    let catalog = JobCatalog::new();
    register_builtins(&catalog);
    catalog
}

pub fn register_builtins(catalog: &JobCatalog) {
    catalog.register(|| Box::new(Scale));
    catalog.register(|| Box::new(Shift));
    catalog.register(|| Box::new(ScaleAndShift));
    catalog.register(|| Box::new(Countdown));
}

fn declare_io(props: &mut PropertyRegistry) -> Result<(), PropertyError> {
    props.declare_data(INPUT, Direction::Input, DataMode::Mandatory)?;
    props.declare_data(OUTPUT, Direction::Output, DataMode::Mandatory)
}

/// Applies `op` to every number of the input array and binds the result to
/// the output.
fn map_numbers(
    ctx: &mut ExecutionContext<'_>,
    op: impl Fn(f64) -> f64,
) -> Result<(), ExecutionError> {
    let input = ctx.props().get_data(INPUT)?;
    let Some(Json::Array(items)) = input.payload() else {
        return Err(anyhow!("'{}' does not hold an array of numbers", input.name()).into());
    };

    let total = items.len().max(1) as f64;
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        ctx.interruption_point()?;
        let x = item
            .as_f64()
            .ok_or_else(|| anyhow!("'{}'[{i}] is not a number: {item}", input.name()))?;
        out.push(Json::from(op(x)));
        ctx.progress((i + 1) as f64 / total, format!("{} of {}", i + 1, items.len()));
    }

    let name = ctx.output_name(OUTPUT)?;
    ctx.set_output_data(OUTPUT, DataObjectHandle::new(name, Json::Array(out)))?;
    Ok(())
}

/// Multiplies every element by `Factor`.
pub struct Scale;

impl JobBody for Scale {
    fn name(&self) -> &str {
        "Scale"
    }

    fn summary(&self) -> &str {
        "Multiply every number by Factor"
    }

    fn declare(&self, props: &mut PropertyRegistry) -> Result<(), PropertyError> {
        declare_io(props)?;
        props.declare("Factor", Direction::Input, 1.0, Some(validators::positive()))
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let factor = ctx.props().get_f64("Factor")?;
        map_numbers(ctx, |x| x * factor)
    }
}

/// Adds `Offset` to every element.
pub struct Shift;

impl JobBody for Shift {
    fn name(&self) -> &str {
        "Shift"
    }

    fn summary(&self) -> &str {
        "Add Offset to every number"
    }

    fn declare(&self, props: &mut PropertyRegistry) -> Result<(), PropertyError> {
        declare_io(props)?;
        props.declare("Offset", Direction::Input, 0.0, None)
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let offset = ctx.props().get_f64("Offset")?;
        map_numbers(ctx, |x| x + offset)
    }
}

/// `Scale` then `Shift`, each as a child job taking half of the progress range.
pub struct ScaleAndShift;

impl SupportsGroupFanOut for ScaleAndShift {
    fn member_output_name(&self, _property: &str, output_name: &str, index: usize) -> String {
        format!("{output_name}[{index}]")
    }
}

impl JobBody for ScaleAndShift {
    fn name(&self) -> &str {
        "ScaleAndShift"
    }

    fn summary(&self) -> &str {
        "Scale, then shift, as two child jobs"
    }

    fn declare(&self, props: &mut PropertyRegistry) -> Result<(), PropertyError> {
        declare_io(props)?;
        props.declare("Factor", Direction::Input, 1.0, Some(validators::positive()))?;
        props.declare("Offset", Direction::Input, 0.0, None)
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let input = ctx.props().get_data(INPUT)?;
        let factor = ctx.props().get_f64("Factor")?;
        let offset = ctx.props().get_f64("Offset")?;
        let output = ctx.output_name(OUTPUT)?;

        let mut scale = ctx.spawn_child("Scale", 1, 0.0, 0.5, true)?;
        scale.set_property(INPUT, input)?;
        scale.set_property("Factor", factor)?;
        scale.set_property(OUTPUT, DataRef::named(format!("{output}.scaled")))?;
        ctx.run_child(&mut scale)?;
        let scaled = scale.output_data(OUTPUT)?;

        ctx.interruption_point()?;

        let mut shift = ctx.spawn_child("Shift", 1, 0.5, 1.0, true)?;
        shift.set_property(INPUT, scaled)?;
        shift.set_property("Offset", offset)?;
        shift.set_property(OUTPUT, DataRef::named(output))?;
        ctx.run_child(&mut shift)?;

        ctx.set_output_data(OUTPUT, shift.output_data(OUTPUT)?)?;
        Ok(())
    }

    fn group_fan_out(&self) -> Option<&dyn SupportsGroupFanOut> {
        Some(self)
    }
}

/// Counts down `Iterations` steps, sleeping `DelayMs` between them and
/// checking for cancellation at every step.
///
/// `FailAt` makes step N fail. A bound `Target` is write-locked for the whole
/// run and receives the number of completed steps.
pub struct Countdown;

impl JobBody for Countdown {
    fn name(&self) -> &str {
        "Countdown"
    }

    fn summary(&self) -> &str {
        "Cancellable loop, for exercising interruption"
    }

    fn declare(&self, props: &mut PropertyRegistry) -> Result<(), PropertyError> {
        props.declare("Iterations", Direction::Input, 10i64, Some(validators::positive()))?;
        props.declare(
            "DelayMs",
            Direction::Input,
            0i64,
            Some(validators::bounded(Some(0.0), None)),
        )?;
        props.declare(
            "ReportEvery",
            Direction::Input,
            1i64,
            Some(validators::positive()),
        )?;
        props.declare(
            "FailAt",
            Direction::Input,
            -1i64,
            Some(validators::bounded(Some(-1.0), None)),
        )?;
        props.declare_data("Target", Direction::InOut, DataMode::Optional)?;
        props.declare("Completed", Direction::Output, 0i64, None)
    }

    /// Keeps roughly ten progress reports per run.
    fn after_property_set(
        &mut self,
        name: &str,
        props: &mut PropertyRegistry,
    ) -> Result<(), PropertyError> {
        if name == "Iterations" {
            let every = (props.get_i64("Iterations")? / 10).max(1);
            props.set("ReportEvery", every)?;
        }
        Ok(())
    }

    fn validate_inputs(&self, props: &PropertyRegistry) -> BTreeMap<String, String> {
        let mut errors = BTreeMap::new();
        if let (Ok(fail_at), Ok(iterations)) = (props.get_i64("FailAt"), props.get_i64("Iterations"))
            && fail_at >= iterations
        {
            errors.insert(
                "FailAt".to_string(),
                format!("must be below Iterations ({iterations})"),
            );
        }
        errors
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let iterations = ctx.props().get_i64("Iterations")?;
        let delay = Duration::from_millis(u64::try_from(ctx.props().get_i64("DelayMs")?).unwrap_or(0));
        let every = ctx.props().get_i64("ReportEvery")?.max(1);
        let fail_at = ctx.props().get_i64("FailAt")?;

        for step in 0..iterations {
            ctx.interruption_point()?;
            if step == fail_at {
                return Err(anyhow!("step {step} failed as configured").into());
            }
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            let done = step + 1;
            if done % every == 0 || done == iterations {
                ctx.progress(done as f64 / iterations as f64, format!("{done}/{iterations}"));
            }
        }

        ctx.set_property("Completed", iterations)?;
        if let Ok(target) = ctx.props().get_data("Target") {
            target.set_payload(Json::from(iterations));
        }
        ctx.log().debug(&format!("counted down {iterations} steps"));
        Ok(())
    }

    fn group_fan_out(&self) -> Option<&dyn SupportsGroupFanOut> {
        None
    }
}
