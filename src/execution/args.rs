//! Execution requests, parameter coercion and bound arguments.

use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Number, Value};
use thiserror::Error;

use crate::command::{ParameterSpec, SharedDescriptor, TypeTag};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required parameter `{0}`")]
    Missing(String),
    #[error("parameter `{name}` expects {expected}, got {value}")]
    Invalid {
        name: String,
        expected: TypeTag,
        value: String,
    },
    #[error("unknown parameter `{0}`")]
    Unknown(String),
}

/// A command plus the values the operator supplied for it.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    descriptor: SharedDescriptor,
    values: IndexMap<String, Value>,
}

impl ExecutionRequest {
    pub fn new(descriptor: SharedDescriptor) -> Self {
        Self {
            descriptor,
            values: IndexMap::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn descriptor(&self) -> &SharedDescriptor {
        &self.descriptor
    }

    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    /// Checks presence and coerces every value to its declared type.
    ///
    /// `null` counts as not supplied. Defaults fill the gaps; the result is in
    /// declaration order.
    pub fn validate(&self) -> Result<BoundArgs, ValidationError> {
        if let Some(unknown) = self
            .values
            .keys()
            .find(|name| self.descriptor.param(name).is_none())
        {
            return Err(ValidationError::Unknown(unknown.clone()));
        }

        let mut bound = IndexMap::with_capacity(self.descriptor.params().len());
        for spec in self.descriptor.params() {
            let supplied = self.values.get(&spec.name).filter(|v| !v.is_null());
            let value = match (supplied, &spec.default) {
                (Some(v), _) => coerce(spec, v)?,
                (None, Some(default)) => default.clone(),
                (None, None) => return Err(ValidationError::Missing(spec.name.clone())),
            };
            bound.insert(spec.name.clone(), value);
        }
        Ok(BoundArgs { values: bound })
    }
}

/// Coerces one supplied value to the parameter's type tag.
///
/// Strings are parsed; already-typed JSON values are checked. Numbers follow
/// Rust's locale-independent parsing, so `1,5` or `1 000` never pass.
pub fn coerce(spec: &ParameterSpec, value: &Value) -> Result<Value, ValidationError> {
    let invalid = || ValidationError::Invalid {
        name: spec.name.clone(),
        expected: spec.type_tag,
        value: match value {
            Value::String(s) => format!("{:?}", s),
            other => other.to_string(),
        },
    };

    match spec.type_tag {
        TypeTag::Untyped => Ok(value.clone()),
        TypeTag::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(invalid()),
        },
        TypeTag::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => parse_bool(s).map(Value::Bool).ok_or_else(invalid),
            Value::Number(n) => match n.as_u64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        },
        TypeTag::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= -TWO_POW_63 && *f < TWO_POW_63)
                .map(|f| Value::from(f as i64))
                .ok_or_else(invalid),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        TypeTag::Float => {
            let parsed = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            parsed
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(invalid)
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// 2^63, the first float past `i64::MAX`.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// Validated arguments in declaration order, defaults filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoundArgs {
    values: IndexMap<String, Value>,
}

impl BoundArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn value(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| anyhow!("no argument named `{}`", name))
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        self.value(name)?
            .as_str()
            .ok_or_else(|| anyhow!("argument `{}` is not a string", name))
    }

    pub fn i64(&self, name: &str) -> Result<i64> {
        self.value(name)?
            .as_i64()
            .ok_or_else(|| anyhow!("argument `{}` is not an integer", name))
    }

    pub fn f64(&self, name: &str) -> Result<f64> {
        self.value(name)?
            .as_f64()
            .ok_or_else(|| anyhow!("argument `{}` is not a number", name))
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        self.value(name)?
            .as_bool()
            .ok_or_else(|| anyhow!("argument `{}` is not a boolean", name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ParamKind;
    use serde_json::json;

    fn spec(name: &str, type_tag: TypeTag) -> ParameterSpec {
        ParameterSpec {
            name: name.into(),
            type_tag,
            default: None,
            kind: ParamKind::PositionalOrKeyword,
        }
    }

    #[test]
    fn booleans_accept_the_usual_spellings() {
        let s = spec("x", TypeTag::Boolean);
        for text in ["true", "Yes", "1", " TRUE "] {
            assert_eq!(coerce(&s, &json!(text)), Ok(json!(true)), "{text}");
        }
        for text in ["false", "NO", "0"] {
            assert_eq!(coerce(&s, &json!(text)), Ok(json!(false)), "{text}");
        }
        assert!(coerce(&s, &json!("maybe")).is_err());
        assert!(coerce(&s, &json!("")).is_err());
    }

    #[test]
    fn numbers_are_locale_independent() {
        let i = spec("n", TypeTag::Integer);
        assert_eq!(coerce(&i, &json!("3")), Ok(json!(3)));
        assert_eq!(coerce(&i, &json!(4.0)), Ok(json!(4)));
        assert!(coerce(&i, &json!("3.5")).is_err());
        assert!(coerce(&i, &json!("1,000")).is_err());

        let f = spec("y", TypeTag::Float);
        let y = coerce(&f, &json!("2.5")).unwrap();
        assert!(y.is_f64());
        assert_eq!(y.as_f64(), Some(2.5));
        assert_eq!(coerce(&f, &json!("3")).unwrap().as_f64(), Some(3.0));
        assert!(coerce(&f, &json!("2,5")).is_err());
        assert!(coerce(&f, &json!("inf")).is_err());
    }

    #[test]
    fn integral_floats_outside_i64_are_rejected() {
        let i = spec("n", TypeTag::Integer);
        assert!(coerce(&i, &json!(9_223_372_036_854_775_808.0_f64)).is_err());
        assert!(coerce(&i, &json!(1e19)).is_err());
        assert_eq!(
            coerce(&i, &json!(-9_223_372_036_854_775_808.0_f64)),
            Ok(json!(i64::MIN))
        );
    }

    #[test]
    fn bound_args_serialize_in_declaration_order() {
        let args = BoundArgs {
            values: [("y".to_string(), json!(2.5)), ("x".to_string(), json!(3))]
                .into_iter()
                .collect(),
        };
        assert_eq!(serde_json::to_string(&args).unwrap(), r#"{"values":{"y":2.5,"x":3}}"#);
    }

    #[test]
    fn untyped_passes_through() {
        let u = spec("arg", TypeTag::Untyped);
        assert_eq!(coerce(&u, &json!("  a ")), Ok(json!("  a ")));
    }
}
