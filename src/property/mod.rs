//! Typed, named, directional job parameters.

mod registry;
pub mod validators;
mod value;

pub use registry::{DataMode, Direction, Property, PropertyRegistry};
pub use validators::Validator;
pub use value::{DataRef, Value, ValueKind, parse_literal};
