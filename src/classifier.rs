//! Event classifier
//!
//! Turns one [`Tick`] into an ordered list of [`TelemetryEvent`]s:
//!
//! 1. `is-on-track` (queued) when the on-track flag flips
//! 2. `LastLapTimeValue` (queued) when a new lap beyond the first completes
//! 3. `TelemetryDictionary` (immediate) with every readable continuous channel
//!
//! State that must survive between ticks lives in a [`SessionContext`] owned
//! by the caller. Missing or malformed readings never fail classification;
//! the affected field is skipped and everything else is still emitted.

use serde_json::{Map, Value as Json};
use tracing::trace;

use crate::types::{TelemetryEvent, Tick, names, vars};

/// Per-session classifier state
///
/// Reset whenever the simulator (re)attaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionContext {
    on_track: bool,
    lap: i64,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last observed on-track flag
    pub fn on_track(&self) -> bool {
        self.on_track
    }

    /// Highest lap reported so far
    pub fn lap(&self) -> i64 {
        self.lap
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Classify one tick against the session context.
pub fn classify(ctx: &mut SessionContext, tick: &Tick) -> Vec<TelemetryEvent> {
    let mut events = Vec::with_capacity(3);

    match tick.bool(vars::IS_ON_TRACK) {
        Some(on_track) if on_track != ctx.on_track => {
            ctx.on_track = on_track;
            events.push(TelemetryEvent::queued(names::IS_ON_TRACK, on_track));
        }
        Some(_) => {}
        None => trace!("tick has no readable {}", vars::IS_ON_TRACK),
    }

    if let Some(lap) = tick.i64(vars::LAP) {
        // Out-lap, first lap, repeats and rewinds are never reported
        if lap > ctx.lap && lap > 1 {
            ctx.lap = lap;
            match tick.f64(vars::LAP_LAST_LAP_TIME) {
                Some(lap_time) => {
                    events.push(TelemetryEvent::queued(names::LAST_LAP_TIME, lap_time))
                }
                None => trace!(lap, "lap completed without a readable lap time"),
            }
        }
    }

    let channels = continuous_channels(tick);
    if !channels.is_empty() {
        events.push(TelemetryEvent::immediate(names::TELEMETRY_DICTIONARY, channels));
    }

    events
}

fn continuous_channels(tick: &Tick) -> Map<String, Json> {
    let mut channels = Map::new();

    let mut number = |key: &str, value: Option<f64>| {
        if let Some(v) = value.and_then(serde_json::Number::from_f64) {
            channels.insert(key.to_string(), Json::Number(v));
        }
    };
    number(names::THROTTLE_INPUT, tick.f64(vars::THROTTLE));
    number(names::BRAKE_INPUT, tick.f64(vars::BRAKE));
    number(names::STEERING_INPUT, tick.f64(vars::STEERING_WHEEL_ANGLE));
    number(names::SPEED, tick.f64(vars::SPEED));

    if let Some(unit) = tick.unit(vars::STEERING_WHEEL_ANGLE) {
        channels.insert(names::STEERING_UNIT.to_string(), unit.into());
    }
    if let Some(unit) = tick.unit(vars::SPEED) {
        channels.insert(names::SPEED_UNIT.to_string(), unit.into());
    }
    if let Some(gear) = tick.i64(vars::GEAR) {
        channels.insert(names::GEAR.to_string(), gear.into());
    }

    channels
}
