//! Reading values sampled from the simulator

use serde::{Deserialize, Serialize};

/// Runtime value of a single telemetry reading.
///
/// Serialized untagged so recordings and wire payloads read as plain JSON
/// (`true`, `3`, `41.2`, `"m/s"`, `[0.1, 0.2]`). Anything else (`null`,
/// objects) lands in [`Value::Other`], which every typed view rejects, so one
/// bad reading never spoils the rest of a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<Value>),
    Other(serde_json::Value),
}

impl Value {
    /// Boolean view. Only genuine booleans qualify.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view. Floats are rejected rather than truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Floating point view. Integers widen; NaN and infinities are treated as
    /// unreadable since they have no JSON representation.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) if f.is_finite() => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

/// One named reading in a tick: a value plus its optional unit.
///
/// Deserializes from either `{"value": .., "unit": ".."}` or a bare value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ReadingRepr")]
pub struct Reading {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Reading {
    pub fn new(value: impl Into<Value>) -> Self {
        Self { value: value.into(), unit: None }
    }

    pub fn with_unit(value: impl Into<Value>, unit: impl Into<String>) -> Self {
        Self { value: value.into(), unit: Some(unit.into()) }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReadingRepr {
    Full {
        value: Value,
        // Kept loose so a bad unit only costs the unit
        #[serde(default)]
        unit: serde_json::Value,
    },
    Bare(Value),
}

impl From<ReadingRepr> for Reading {
    fn from(repr: ReadingRepr) -> Self {
        match repr {
            ReadingRepr::Full { value, unit } => {
                let unit = match unit {
                    serde_json::Value::String(unit) => Some(unit),
                    _ => None,
                };
                Reading { value, unit }
            }
            ReadingRepr::Bare(value) => Reading { value, unit: None },
        }
    }
}
