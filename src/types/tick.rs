//! Tick and source event types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Reading, Value};

/// Tick variable names as the simulator publishes them.
pub mod vars {
    pub const IS_ON_TRACK: &str = "IsOnTrack";
    pub const LAP: &str = "Lap";
    pub const LAP_LAST_LAP_TIME: &str = "LapLastLapTime";
    pub const THROTTLE: &str = "Throttle";
    pub const BRAKE: &str = "Brake";
    pub const STEERING_WHEEL_ANGLE: &str = "SteeringWheelAngle";
    pub const SPEED: &str = "Speed";
    pub const GEAR: &str = "Gear";
}

/// One sampled snapshot of simulation state
///
/// Readings are keyed by variable name. A tick makes no promise that any
/// particular variable is present or well-typed; consumers look readings up
/// through the typed accessors, which return `None` for missing or malformed
/// entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tick {
    readings: HashMap<String, Reading>,
}

impl Tick {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, reading: impl Into<Reading>) -> Self {
        self.insert(name, reading);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, reading: impl Into<Reading>) {
        self.readings.insert(name.into(), reading.into());
    }

    pub fn reading(&self, name: &str) -> Option<&Reading> {
        self.readings.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.readings.get(name).map(|r| &r.value)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.value(name).and_then(Value::as_bool)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.value(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.value(name).and_then(Value::as_f64)
    }

    pub fn unit(&self, name: &str) -> Option<&str> {
        self.readings.get(name).and_then(|r| r.unit.as_deref())
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

macro_rules! reading_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Reading {
                fn from(value: $ty) -> Self {
                    Reading::new(value)
                }
            }
        )*
    };
}

reading_from!(bool, i32, i64, f32, f64, &str, String, Value);

/// Everything a telemetry source can report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "readings", rename_all = "snake_case")]
pub enum SourceEvent {
    /// The simulator attached
    Connected,
    /// The simulator went away
    Disconnected,
    /// One sampled snapshot
    Tick(Tick),
}
