// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Attribute value transforms.
//!
//! An attribute may declare a transform kind. Ingestion passes each incoming
//! value through [`AttributeTransform::deserialize`]; outbound rendering
//! passes it through [`AttributeTransform::serialize`]. Kinds with no
//! registered transform pass values through unchanged.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Number, Value};
use thiserror::Error;

/// A value a transform could not convert.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} transform cannot convert {value}")]
pub struct TransformError {
    /// Transform kind that failed.
    pub kind: Arc<str>,
    /// The offending value.
    pub value: Value,
}

impl TransformError {
    fn new(kind: &str, value: &Value) -> Self {
        Self {
            kind: Arc::from(kind),
            value: value.clone(),
        }
    }
}

/// Conversion between wire values and cached values for one attribute kind.
pub trait AttributeTransform: Send + Sync {
    /// Wire value to cached value.
    ///
    /// # Errors
    /// Returns [`TransformError`] when `value` cannot be represented.
    fn deserialize(&self, value: &Value) -> Result<Value, TransformError>;

    /// Cached value to wire value.
    ///
    /// # Errors
    /// Returns [`TransformError`] when `value` cannot be represented.
    fn serialize(&self, value: &Value) -> Result<Value, TransformError>;
}

/// `string`: scalars become strings, `null` stays `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringTransform;

impl StringTransform {
    fn convert(value: &Value) -> Result<Value, TransformError> {
        match value {
            Value::Null | Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            Value::Array(_) | Value::Object(_) => Err(TransformError::new("string", value)),
        }
    }
}

impl AttributeTransform for StringTransform {
    fn deserialize(&self, value: &Value) -> Result<Value, TransformError> {
        Self::convert(value)
    }

    fn serialize(&self, value: &Value) -> Result<Value, TransformError> {
        Self::convert(value)
    }
}

/// `number`: numeric strings are parsed, empty strings become `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberTransform;

impl NumberTransform {
    fn convert(value: &Value) -> Result<Value, TransformError> {
        match value {
            Value::Null | Value::Number(_) => Ok(value.clone()),
            Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
            Value::String(s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Ok(Value::from(i));
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| TransformError::new("number", value))
            }
            Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
                Err(TransformError::new("number", value))
            }
        }
    }
}

impl AttributeTransform for NumberTransform {
    fn deserialize(&self, value: &Value) -> Result<Value, TransformError> {
        Self::convert(value)
    }

    fn serialize(&self, value: &Value) -> Result<Value, TransformError> {
        Self::convert(value)
    }
}

/// `boolean`: `"true"`, `"t"`, `"1"` (any case) and `1` are true.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanTransform;

impl AttributeTransform for BooleanTransform {
    fn deserialize(&self, value: &Value) -> Result<Value, TransformError> {
        match value {
            Value::Null | Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => Ok(Value::Bool(matches!(
                s.to_ascii_lowercase().as_str(),
                "true" | "t" | "1"
            ))),
            Value::Number(n) => Ok(Value::Bool(
                matches!(n.as_f64(), Some(f) if (f - 1.0).abs() < f64::EPSILON),
            )),
            Value::Array(_) | Value::Object(_) => Err(TransformError::new("boolean", value)),
        }
    }

    fn serialize(&self, value: &Value) -> Result<Value, TransformError> {
        match value {
            Value::Null | Value::Bool(_) => Ok(value.clone()),
            _ => Err(TransformError::new("boolean", value)),
        }
    }
}

/// Errors returned when registering transforms.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A transform is already registered for this kind.
    #[error("duplicate transform registration for kind: {0}")]
    DuplicateKind(String),
}

/// Registry of transforms keyed by kind name.
#[derive(Default)]
pub struct TransformRegistry {
    transforms: HashMap<Arc<str>, Box<dyn AttributeTransform>>,
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.transforms.keys().map(AsRef::as_ref).collect();
        kinds.sort_unstable();
        f.debug_struct("TransformRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl TransformRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `string`, `number` and `boolean`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut transforms: HashMap<Arc<str>, Box<dyn AttributeTransform>> = HashMap::new();
        transforms.insert(Arc::from("string"), Box::new(StringTransform));
        transforms.insert(Arc::from("number"), Box::new(NumberTransform));
        transforms.insert(Arc::from("boolean"), Box::new(BooleanTransform));
        Self { transforms }
    }

    /// Registers a transform for `kind`.
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateKind`] if `kind` is already registered.
    pub fn register<T>(&mut self, kind: &str, transform: T) -> Result<(), RegistryError>
    where
        T: AttributeTransform + 'static,
    {
        if self.transforms.contains_key(kind) {
            return Err(RegistryError::DuplicateKind(kind.to_owned()));
        }
        self.transforms.insert(Arc::from(kind), Box::new(transform));
        Ok(())
    }

    /// Returns the transform for `kind`, if any.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&dyn AttributeTransform> {
        self.transforms.get(kind).map(AsRef::as_ref)
    }

    /// Applies the `kind` transform's `deserialize`, or passes through.
    ///
    /// # Errors
    /// Propagates the transform's failure.
    pub fn deserialize(&self, kind: Option<&str>, value: &Value) -> Result<Value, TransformError> {
        match kind.and_then(|k| self.get(k)) {
            Some(t) => t.deserialize(value),
            None => Ok(value.clone()),
        }
    }

    /// Applies the `kind` transform's `serialize`, or passes through.
    ///
    /// # Errors
    /// Propagates the transform's failure.
    pub fn serialize(&self, kind: Option<&str>, value: &Value) -> Result<Value, TransformError> {
        match kind.and_then(|k| self.get(k)) {
            Some(t) => t.serialize(value),
            None => Ok(value.clone()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_convert_scalars() {
        let reg = TransformRegistry::with_builtins();
        assert_eq!(reg.deserialize(Some("string"), &json!(5)).unwrap(), json!("5"));
        assert_eq!(reg.deserialize(Some("number"), &json!("42")).unwrap(), json!(42));
        assert_eq!(reg.deserialize(Some("number"), &json!("1.5")).unwrap(), json!(1.5));
        assert_eq!(reg.deserialize(Some("number"), &json!("")).unwrap(), Value::Null);
        assert_eq!(reg.deserialize(Some("boolean"), &json!("T")).unwrap(), json!(true));
        assert_eq!(reg.deserialize(Some("boolean"), &json!(0)).unwrap(), json!(false));
    }

    #[test]
    fn failures_and_pass_through() {
        let reg = TransformRegistry::with_builtins();
        let err = reg.deserialize(Some("number"), &json!("abc")).unwrap_err();
        assert_eq!(&*err.kind, "number");
        assert!(reg.deserialize(Some("string"), &json!([1])).is_err());
        assert_eq!(reg.deserialize(Some("date"), &json!({ "a": 1 })).unwrap(), json!({ "a": 1 }));
        assert_eq!(reg.serialize(None, &json!([1])).unwrap(), json!([1]));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = TransformRegistry::with_builtins();
        let err = reg.register("number", NumberTransform).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateKind("number".into()));
        reg.register("text", StringTransform).unwrap();
        assert!(reg.get("text").is_some());
    }
}
