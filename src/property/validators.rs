//! Reusable single-property validators.
//!
//! A validator inspects one value and returns the reason it is rejected.
//! They fail fast per property; [`PropertyRegistry::validate_all`] is what
//! aggregates them.
//!
//! [`PropertyRegistry::validate_all`]: super::PropertyRegistry::validate_all

use std::sync::Arc;

use super::value::Value;

pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Accepts numbers strictly greater than zero.
pub fn positive() -> Validator {
    Arc::new(|value| match value.as_f64() {
        Some(v) if v > 0.0 => Ok(()),
        Some(v) => Err(format!("must be > 0, got {v}")),
        None => Err("must be a number".to_string()),
    })
}

/// Accepts numbers inside the inclusive range; either bound may be open.
pub fn bounded(lower: Option<f64>, upper: Option<f64>) -> Validator {
    Arc::new(move |value| {
        let v = value
            .as_f64()
            .ok_or_else(|| "must be a number".to_string())?;
        if let Some(lo) = lower
            && v < lo
        {
            return Err(format!("must be >= {lo}, got {v}"));
        }
        if let Some(hi) = upper
            && v > hi
        {
            return Err(format!("must be <= {hi}, got {v}"));
        }
        Ok(())
    })
}

/// Rejects empty strings and empty lists.
pub fn non_empty() -> Validator {
    Arc::new(|value| {
        let empty = match value {
            Value::Str(s) => s.trim().is_empty(),
            Value::IntList(v) => v.is_empty(),
            Value::FloatList(v) => v.is_empty(),
            _ => false,
        };
        if empty {
            Err("must not be empty".to_string())
        } else {
            Ok(())
        }
    })
}

/// Accepts only one of the listed strings.
pub fn one_of(options: &[&str]) -> Validator {
    let options: Vec<String> = options.iter().map(|s| s.to_string()).collect();
    Arc::new(move |value| match value.as_str() {
        Some(s) if options.iter().any(|o| o == s) => Ok(()),
        _ => Err(format!("must be one of [{}]", options.join(", "))),
    })
}

/// Requires a data property to reference a live object.
pub fn bound_data() -> Validator {
    Arc::new(|value| match value.as_data() {
        Some(r) if r.is_bound() => Ok(()),
        Some(r) if r.name().is_empty() => Err("a data object is required".to_string()),
        Some(r) => Err(format!("data object '{}' does not exist", r.name())),
        None => Err("must be a data object".to_string()),
    })
}

/// Requires a data property to carry a name for the object it will produce.
pub fn named_data() -> Validator {
    Arc::new(|value| match value.as_data() {
        Some(r) if !r.name().is_empty() => Ok(()),
        Some(_) => Err("an output name is required".to_string()),
        None => Err("must be a data object".to_string()),
    })
}

/// Runs every validator in order and reports the first rejection.
pub fn all_of(validators: Vec<Validator>) -> Validator {
    Arc::new(move |value| validators.iter().try_for_each(|v| v(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataObjectHandle;
    use crate::property::DataRef;
    use serde_json::json;

    #[test]
    fn positive_rejects_zero_and_negatives() {
        let v = positive();
        assert!(v(&Value::Float(0.5)).is_ok());
        assert!(v(&Value::Int(3)).is_ok());
        assert_eq!(v(&Value::Float(-1.0)), Err("must be > 0, got -1".to_string()));
        assert!(v(&Value::Float(0.0)).is_err());
    }

    #[test]
    fn bounded_checks_each_side() {
        let v = bounded(Some(0.0), Some(10.0));
        assert!(v(&Value::Int(0)).is_ok());
        assert!(v(&Value::Int(10)).is_ok());
        assert!(v(&Value::Int(11)).is_err());
        assert!(v(&Value::Float(-0.1)).is_err());
        assert!(bounded(None, None)(&Value::Float(1e9)).is_ok());
    }

    #[test]
    fn data_validators() {
        let handle = DataObjectHandle::new("ws", json!([]));
        assert!(bound_data()(&Value::from(handle)).is_ok());
        assert!(bound_data()(&Value::Data(DataRef::named("ghost"))).is_err());
        assert!(named_data()(&Value::Data(DataRef::named("out"))).is_ok());
        assert!(named_data()(&Value::Data(DataRef::default())).is_err());
    }

    #[test]
    fn all_of_reports_first_failure() {
        let v = all_of(vec![non_empty(), one_of(&["sum", "mean"])]);
        assert!(v(&Value::Str("sum".into())).is_ok());
        assert_eq!(v(&Value::Str("".into())), Err("must not be empty".to_string()));
        assert!(v(&Value::Str("max".into())).is_err());
    }
}
