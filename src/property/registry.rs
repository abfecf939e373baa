use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::validators::{self, Validator};
use super::value::{DataRef, Value, ValueKind, parse_literal};
use crate::data::{DataObjectHandle, DataStore};
use crate::error::{PropertyError, ValidationErrors};
use crate::history::PropertySnapshot;

/// Which way data flows through a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
    InOut,
}

impl Direction {
    pub fn is_input(self) -> bool {
        matches!(self, Direction::Input | Direction::InOut)
    }

    pub fn is_output(self) -> bool {
        matches!(self, Direction::Output | Direction::InOut)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "Input"),
            Direction::Output => write!(f, "Output"),
            Direction::InOut => write!(f, "InOut"),
        }
    }
}

/// Whether a data property must be supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    Mandatory,
    Optional,
}

/// One declared parameter of a job.
#[derive(Clone)]
pub struct Property {
    name: String,
    direction: Direction,
    kind: ValueKind,
    default: Value,
    value: Option<Value>,
    validator: Option<Validator>,
}

impl Property {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// The explicitly set value, or the declared default if never set.
    pub fn value(&self) -> &Value {
        self.value.as_ref().unwrap_or(&self.default)
    }

    pub fn is_default(&self) -> bool {
        self.value.is_none()
    }

    /// The reason the current value is invalid, if any.
    pub fn check(&self) -> Option<String> {
        self.validator.as_ref().and_then(|v| v(self.value()).err())
    }

    /// The live data handle this property references, if it is a bound data property.
    pub fn data_handle(&self) -> Option<&DataObjectHandle> {
        self.value().as_data().and_then(DataRef::handle)
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("kind", &self.kind)
            .field("value", self.value())
            .field("is_default", &self.is_default())
            .finish()
    }
}

/// Ordered, typed property storage owned by a single job.
#[derive(Debug, Clone, Default)]
pub struct PropertyRegistry {
    properties: Vec<Property>,
    index: HashMap<String, usize>,
}

impl PropertyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a property. Its kind is taken from `default`.
    pub fn declare(
        &mut self,
        name: &str,
        direction: Direction,
        default: impl Into<Value>,
        validator: Option<Validator>,
    ) -> Result<(), PropertyError> {
        if self.index.contains_key(name) {
            return Err(PropertyError::Duplicate(name.to_string()));
        }
        let default = default.into();
        self.index.insert(name.to_string(), self.properties.len());
        self.properties.push(Property {
            name: name.to_string(),
            direction,
            kind: default.kind(),
            default,
            value: None,
            validator,
        });
        Ok(())
    }

    /// Declares a data object property. Mandatory inputs must resolve to a
    /// live object; mandatory outputs must be given a name.
    pub fn declare_data(
        &mut self,
        name: &str,
        direction: Direction,
        mode: DataMode,
    ) -> Result<(), PropertyError> {
        let validator = match (mode, direction) {
            (DataMode::Optional, _) => None,
            (DataMode::Mandatory, Direction::Output) => Some(validators::named_data()),
            (DataMode::Mandatory, _) => Some(validators::bound_data()),
        };
        self.declare(name, direction, DataRef::default(), validator)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Properties in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    pub fn property(&self, name: &str) -> Result<&Property, PropertyError> {
        self.index
            .get(name)
            .map(|&i| &self.properties[i])
            .ok_or_else(|| PropertyError::Unknown(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<&Value, PropertyError> {
        self.property(name).map(Property::value)
    }

    /// Sets a value. The property keeps its previous value if the value has the
    /// wrong type or the validator rejects it.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), PropertyError> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| PropertyError::Unknown(name.to_string()))?;
        let property = &mut self.properties[i];
        let value = value
            .into()
            .coerce(property.kind)
            .map_err(|v| PropertyError::TypeMismatch {
                name: name.to_string(),
                expected: property.kind.to_string(),
                actual: v.kind().to_string(),
            })?;
        if let Some(validator) = &property.validator {
            validator(&value).map_err(|reason| PropertyError::Validation {
                name: name.to_string(),
                reason,
            })?;
        }
        property.value = Some(value);
        Ok(())
    }

    /// Parses `literal` according to the property's kind and sets it.
    pub fn set_literal(
        &mut self,
        name: &str,
        literal: &str,
        store: Option<&dyn DataStore>,
    ) -> Result<(), PropertyError> {
        let kind = self.property(name)?.kind;
        let value = parse_literal(kind, literal, store).map_err(|reason| PropertyError::Parse {
            name: name.to_string(),
            literal: literal.to_string(),
            reason,
        })?;
        self.set(name, value)
    }

    /// Every property whose current value its validator rejects. An empty
    /// result means the registry is valid.
    pub fn validate_all(&self) -> ValidationErrors {
        let errors: BTreeMap<String, String> = self
            .properties
            .iter()
            .filter_map(|p| p.check().map(|reason| (p.name.clone(), reason)))
            .collect();
        ValidationErrors(errors)
    }

    pub fn get_f64(&self, name: &str) -> Result<f64, PropertyError> {
        let value = self.get(name)?;
        value.as_f64().ok_or_else(|| mismatch(name, ValueKind::Float, value))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, PropertyError> {
        let value = self.get(name)?;
        value.as_i64().ok_or_else(|| mismatch(name, ValueKind::Int, value))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, PropertyError> {
        let value = self.get(name)?;
        value.as_bool().ok_or_else(|| mismatch(name, ValueKind::Bool, value))
    }

    pub fn get_str(&self, name: &str) -> Result<&str, PropertyError> {
        let value = self.get(name)?;
        value.as_str().ok_or_else(|| mismatch(name, ValueKind::Str, value))
    }

    /// The live handle behind a data property.
    pub fn get_data(&self, name: &str) -> Result<DataObjectHandle, PropertyError> {
        let value = self.get(name)?;
        let data = value
            .as_data()
            .ok_or_else(|| mismatch(name, ValueKind::Data, value))?;
        data.handle()
            .cloned()
            .ok_or_else(|| PropertyError::MissingObject {
                name: name.to_string(),
                object: data.name().to_string(),
            })
    }

    /// Every non-default property as `name=literal` pairs separated by `;`.
    /// `\`, `=` and `;` inside literals are backslash-escaped.
    pub fn to_literal_string(&self) -> String {
        self.properties
            .iter()
            .filter(|p| !p.is_default())
            .map(|p| format!("{}={}", escape(&p.name), escape(&p.value().to_literal())))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Splits a string produced by [`to_literal_string`](Self::to_literal_string)
    /// into unescaped `(name, literal)` pairs without applying them.
    pub fn parse_literal_string(input: &str) -> Result<Vec<(String, String)>, PropertyError> {
        parse_pairs(input).map_err(|reason| PropertyError::Parse {
            name: String::new(),
            literal: input.to_string(),
            reason,
        })
    }

    /// Applies a string produced by [`to_literal_string`](Self::to_literal_string).
    pub fn set_from_literal_string(
        &mut self,
        input: &str,
        store: Option<&dyn DataStore>,
    ) -> Result<(), PropertyError> {
        for (name, literal) in Self::parse_literal_string(input)? {
            self.set_literal(&name, &literal, store)?;
        }
        Ok(())
    }

    /// Literal snapshot of every property, for provenance.
    pub fn snapshot(&self) -> Vec<PropertySnapshot> {
        self.properties
            .iter()
            .map(|p| PropertySnapshot {
                name: p.name.clone(),
                value: p.value().to_literal(),
                direction: p.direction,
                is_default: p.is_default(),
            })
            .collect()
    }
}

fn mismatch(name: &str, expected: ValueKind, actual: &Value) -> PropertyError {
    PropertyError::TypeMismatch {
        name: name.to_string(),
        expected: expected.to_string(),
        actual: actual.kind().to_string(),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '=' | ';') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn parse_pairs(input: &str) -> Result<Vec<(String, String)>, String> {
    let mut pairs = Vec::new();
    let mut name = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let next = chars.next().ok_or("dangling escape at end of input")?;
                if in_value {
                    value.push(next);
                } else {
                    name.push(next);
                }
            }
            '=' if !in_value => in_value = true,
            ';' => {
                push_pair(&mut pairs, &mut name, &mut value, in_value)?;
                in_value = false;
            }
            _ if in_value => value.push(c),
            _ => name.push(c),
        }
    }
    push_pair(&mut pairs, &mut name, &mut value, in_value)?;
    Ok(pairs)
}

fn push_pair(
    pairs: &mut Vec<(String, String)>,
    name: &mut String,
    value: &mut String,
    in_value: bool,
) -> Result<(), String> {
    let key = std::mem::take(name);
    let literal = std::mem::take(value);
    if !in_value {
        if key.trim().is_empty() {
            return Ok(());
        }
        return Err(format!("missing '=' after '{}'", key.trim()));
    }
    pairs.push((key.trim().to_string(), literal));
    Ok(())
}
