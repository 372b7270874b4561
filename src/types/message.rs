//! Messages produced by the classifier and written to the UI client

use serde::{Deserialize, Serialize};

use crate::Result;

/// Message names understood by the UI client.
pub mod names {
    pub const SDK_CONNECTED: &str = "sdk-connected";
    pub const GAME_OPENED: &str = "game-opened";
    pub const GAME_CLOSED: &str = "game-closed";
    pub const IS_ON_TRACK: &str = "is-on-track";
    pub const LAST_LAP_TIME: &str = "LastLapTimeValue";
    pub const TELEMETRY_DICTIONARY: &str = "TelemetryDictionary";
    pub const THROTTLE_INPUT: &str = "ThrottleInputValue";
    pub const BRAKE_INPUT: &str = "BrakeInputValue";
    pub const STEERING_INPUT: &str = "SteeringInputValue";
    pub const STEERING_UNIT: &str = "SteeringInputUnit";
    pub const SPEED: &str = "SpeedValue";
    pub const SPEED_UNIT: &str = "SpeedUnit";
    pub const GEAR: &str = "GearValue";
}

/// Greeting sent on every new connection.
pub const GREETING: &str = "You are connected to the SDK Service. Waiting for the simulator to open.";

/// Payload of the `game-opened` lifecycle message.
pub const GAME_OPENED_VALUE: &str = "game opened";

/// Payload of the `game-closed` lifecycle message.
pub const GAME_CLOSED_VALUE: &str = "game closed";

/// How a classified event reaches the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Sent as soon as it is produced; dropped when no client is attached
    Immediate,
    /// Buffered in the delivery queue until the drain task picks it up
    Queued,
}

/// Event produced by the classifier for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub name: String,
    pub value: serde_json::Value,
    pub delivery: Delivery,
}

impl TelemetryEvent {
    pub fn immediate(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self { name: name.into(), value: value.into(), delivery: Delivery::Immediate }
    }

    pub fn queued(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self { name: name.into(), value: value.into(), delivery: Delivery::Queued }
    }

    pub fn is_queued(&self) -> bool {
        self.delivery == Delivery::Queued
    }

    pub fn into_message(self) -> QueuedMessage {
        QueuedMessage { name: self.name, value: self.value }
    }
}

/// Entry owned by the delivery queue between enqueue and dequeue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub name: String,
    pub value: serde_json::Value,
}

impl QueuedMessage {
    pub fn new(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    /// Returns the on-track flag if this is an `is-on-track` message.
    pub fn on_track(&self) -> Option<bool> {
        if self.name == names::IS_ON_TRACK { self.value.as_bool() } else { None }
    }

    pub fn as_wire(&self) -> WireMessage<'_> {
        WireMessage { name: &self.name, value: &self.value }
    }
}

/// Wire form of a message: `{"name": .., "value": ..}` in one text frame
#[derive(Debug, Serialize)]
pub struct WireMessage<'a> {
    pub name: &'a str,
    pub value: &'a serde_json::Value,
}

impl<'a> WireMessage<'a> {
    pub fn new(name: &'a str, value: &'a serde_json::Value) -> Self {
        Self { name, value }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
