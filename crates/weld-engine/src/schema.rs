//! Argument schemas for type-directed command matching.
//!
//! A schema validates one candidate value (usually a command token) and
//! returns the converted value on success. Schemas appear as target-sequence
//! elements (`command.prefix_of([...])`), as `SingletonOf` operands and in
//! `ValidateBy` nodes; a successful validation publishes the converted value
//! as a parsed argument.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use weld_core::Value;

use crate::error::SchemaError;

/// Validates a candidate value, converting it on success.
///
/// Rejection is a non-match, not an evaluation fault.
pub trait ArgSchema: Send + Sync {
    /// Schema name, used in cache fingerprints and logs.
    fn name(&self) -> &str;

    /// Validates `raw`, returning the converted value.
    fn validate(&self, raw: &Value) -> Result<Value, SchemaError>;
}

/// Accepts integers and strings that parse as integers.
pub struct IntSchema;

impl ArgSchema for IntSchema {
    fn name(&self) -> &str {
        "int"
    }

    fn validate(&self, raw: &Value) -> Result<Value, SchemaError> {
        match raw {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|e| SchemaError {
                schema: "int".into(),
                reason: e.to_string(),
            }),
            other => Err(SchemaError {
                schema: "int".into(),
                reason: format!("expected integer, got {other}"),
            }),
        }
    }
}

/// Accepts booleans and the usual textual spellings.
pub struct BoolSchema;

impl ArgSchema for BoolSchema {
    fn name(&self) -> &str {
        "bool"
    }

    fn validate(&self, raw: &Value) -> Result<Value, SchemaError> {
        match raw {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Str(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
                _ => Err(SchemaError {
                    schema: "bool".into(),
                    reason: format!("'{s}' is not a boolean"),
                }),
            },
            other => Err(SchemaError {
                schema: "bool".into(),
                reason: format!("expected boolean, got {other}"),
            }),
        }
    }
}

/// Validates through serde: the candidate must deserialize as `T`.
///
/// String candidates that are not valid JSON are retried as JSON strings,
/// so `Typed::<String>` accepts bare tokens.
pub struct Typed<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Typed<T> {
    /// Creates a schema named after `T`.
    pub fn new() -> Self {
        Self {
            name: std::any::type_name::<T>().rsplit("::").next().unwrap_or("typed").to_string(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + Serialize + Send + Sync> ArgSchema for Typed<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, raw: &Value) -> Result<Value, SchemaError> {
        let candidate = match raw {
            Value::Str(s) => serde_json::from_str::<serde_json::Value>(s)
                .unwrap_or_else(|_| serde_json::Value::String(s.clone())),
            other => other.to_json(),
        };
        let typed: T = serde_json::from_value(candidate).map_err(|e| SchemaError {
            schema: self.name.clone(),
            reason: e.to_string(),
        })?;
        let back = serde_json::to_value(typed).map_err(|e| SchemaError {
            schema: self.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Value::Json(back))
    }
}

/// Boxes a schema for use as an operand or target element.
pub fn schema(s: impl ArgSchema + 'static) -> Arc<dyn ArgSchema> {
    Arc::new(s)
}
