//! Structured project models produced by plugins.
//!
//! The orchestrator never looks inside a model: it only parses plugin
//! output into one and merges several of them. [`JsonProject`] is the
//! default model, a JSON document merged structurally.

use serde_json::{Map, Value};

use crate::error::{Result, SrctoolError};

/// A partial or complete analysis of one project.
pub trait ProjectModel: Sized + Send + 'static {
    /// Parse one plugin's standard output.
    fn parse(bytes: &[u8]) -> Result<Self>;

    /// Combine models into one. The orchestrator passes them sorted by
    /// plugin name, so the result never depends on completion order.
    fn merge_all(models: Vec<Self>) -> Result<Self>;

    /// Serialize the model for output.
    fn to_json(&self) -> Result<String>;
}

/// A project model backed by an arbitrary JSON object.
///
/// Merging is structural:
/// - objects are merged key by key, recursively
/// - arrays are concatenated
/// - numbers are added
/// - any other conflicting values keep the first one
#[derive(Debug, Clone, PartialEq)]
pub struct JsonProject(pub Value);

impl ProjectModel for JsonProject {
    fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| SrctoolError::InvalidOutput {
                reason: e.to_string(),
            })?;
        if !value.is_object() {
            return Err(SrctoolError::InvalidOutput {
                reason: "not a JSON object".to_string(),
            });
        }
        Ok(Self(value))
    }

    fn merge_all(models: Vec<Self>) -> Result<Self> {
        let mut models = models.into_iter();
        let Some(Self(mut merged)) = models.next() else {
            return Err(SrctoolError::Merge {
                reason: "no plugin output to merge".to_string(),
            });
        };
        for Self(value) in models {
            merge_value(&mut merged, value);
        }
        Ok(Self(merged))
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.0).map_err(|e| SrctoolError::Merge {
            reason: format!("unable to serialize the merged model: {e}"),
        })
    }
}

fn merge_value(into: &mut Value, from: Value) {
    match (into, from) {
        (Value::Object(into), Value::Object(from)) => merge_object(into, from),
        (Value::Array(into), Value::Array(from)) => into.extend(from),
        (Value::Number(into), Value::Number(from)) => {
            if let Some(sum) = add_numbers(into, &from) {
                *into = sum;
            }
        }
        (into, from) if into.is_null() => *into = from,
        _ => {}
    }
}

fn merge_object(into: &mut Map<String, Value>, from: Map<String, Value>) {
    for (key, value) in from {
        match into.get_mut(&key) {
            Some(existing) => merge_value(existing, value),
            None => {
                into.insert(key, value);
            }
        }
    }
}

fn add_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Option<serde_json::Number> {
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return a.checked_add(b).map(Into::into);
    }
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a.checked_add(b).map(Into::into);
    }
    serde_json::Number::from_f64(a.as_f64()? + b.as_f64()?)
}
