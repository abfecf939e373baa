use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::{DataObjectHandle, DataStore};

/// The type a property was declared with. Fixed for the property's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Str,
    IntList,
    FloatList,
    Data,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
            ValueKind::IntList => "int list",
            ValueKind::FloatList => "float list",
            ValueKind::Data => "data object",
        };
        write!(f, "{name}")
    }
}

/// A named reference to a data object, possibly not yet bound to a live handle.
///
/// Output properties usually hold only a name until the job body produces the
/// object; input properties resolve the name against the data store.
#[derive(Debug, Clone, Default)]
pub struct DataRef {
    name: String,
    handle: Option<DataObjectHandle>,
}

impl DataRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: None,
        }
    }

    pub fn bound(name: impl Into<String>, handle: DataObjectHandle) -> Self {
        Self {
            name: name.into(),
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> Option<&DataObjectHandle> {
        self.handle.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.handle.is_none()
    }
}

impl PartialEq for DataRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.handle.as_ref().map(DataObjectHandle::id)
                == other.handle.as_ref().map(DataObjectHandle::id)
    }
}

impl From<DataObjectHandle> for DataRef {
    fn from(handle: DataObjectHandle) -> Self {
        Self::bound(handle.name(), handle)
    }
}

/// The current value of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    Data(DataRef),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::IntList(_) => ValueKind::IntList,
            Value::FloatList(_) => ValueKind::FloatList,
            Value::Data(_) => ValueKind::Data,
        }
    }

    /// Renders the value as a literal that [`parse_literal`] reads back.
    /// Data objects render as their name, never their contents.
    pub fn to_literal(&self) -> String {
        match self {
            Value::Bool(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Str(v) => v.clone(),
            Value::IntList(v) => join(v),
            Value::FloatList(v) => join(v),
            Value::Data(r) => match r.handle() {
                Some(handle) if r.name().is_empty() => handle.name(),
                _ => r.name().to_string(),
            },
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&DataRef> {
        match self {
            Value::Data(r) => Some(r),
            _ => None,
        }
    }

    /// Converts into `kind` where the conversion is lossless in intent
    /// (integers widen to floats). Hands the value back on mismatch.
    pub(crate) fn coerce(self, kind: ValueKind) -> Result<Value, Value> {
        match (self, kind) {
            (v, k) if v.kind() == k => Ok(v),
            (Value::Int(v), ValueKind::Float) => Ok(Value::Float(v as f64)),
            (Value::IntList(v), ValueKind::FloatList) => {
                Ok(Value::FloatList(v.into_iter().map(|x| x as f64).collect()))
            }
            (v, _) => Err(v),
        }
    }
}

fn join<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_list<T: std::str::FromStr>(literal: &str) -> Result<Vec<T>, String>
where
    T::Err: fmt::Display,
{
    if literal.trim().is_empty() {
        return Ok(Vec::new());
    }
    literal
        .split(',')
        .map(|item| item.trim().parse::<T>().map_err(|e| e.to_string()))
        .collect()
}

/// Parses a literal into a value of `kind`. Data literals are resolved against
/// `store` (collection members included) when one is given; unknown names stay
/// unbound.
pub fn parse_literal(
    kind: ValueKind,
    literal: &str,
    store: Option<&dyn DataStore>,
) -> Result<Value, String> {
    match kind {
        ValueKind::Bool => match literal.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            other => Err(format!("'{other}' is not a boolean")),
        },
        ValueKind::Int => literal
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| e.to_string()),
        ValueKind::Float => literal
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| e.to_string()),
        ValueKind::Str => Ok(Value::Str(literal.to_string())),
        ValueKind::IntList => parse_list(literal).map(Value::IntList),
        ValueKind::FloatList => parse_list(literal).map(Value::FloatList),
        ValueKind::Data => {
            let name = literal.trim();
            let handle = store.and_then(|s| s.resolve(name));
            Ok(Value::Data(DataRef {
                name: name.to_string(),
                handle,
            }))
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::IntList(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::FloatList(v)
    }
}

impl From<DataRef> for Value {
    fn from(v: DataRef) -> Self {
        Value::Data(v)
    }
}

impl From<DataObjectHandle> for Value {
    fn from(v: DataObjectHandle) -> Self {
        Value::Data(v.into())
    }
}
