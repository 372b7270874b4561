//! Core types flowing through the relay.
//!
//! ## Architecture
//!
//! - [`Tick`] is one sampled snapshot of simulator state, a bag of named
//!   [`Reading`]s that may be incomplete or malformed
//! - [`SourceEvent`] is what a telemetry source yields: attach, detach, or a tick
//! - [`TelemetryEvent`] is what the classifier produces from a tick, tagged
//!   with its [`Delivery`] path
//! - [`QueuedMessage`] is an entry owned by the delivery queue
//! - [`WireMessage`] is the `{"name", "value"}` JSON object written to the client
//! - [`SamplingFrequency`] is the polling rate the rate controller hands to sources

mod message;
mod sampling;
mod tick;
mod value;

pub use message::{
    Delivery, GAME_CLOSED_VALUE, GAME_OPENED_VALUE, GREETING, QueuedMessage, TelemetryEvent,
    WireMessage, names,
};
pub use sampling::SamplingFrequency;
pub use tick::{SourceEvent, Tick, vars};
pub use value::{Reading, Value};
