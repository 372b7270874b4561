//! Concrete telemetry sources
//!
//! - [`ChannelSource`] lets an external acquisition layer push events in
//! - [`ReplaySource`] plays back a JSON-lines session recording

mod channel;
mod replay;

pub use channel::{ChannelSource, SourceFeed};
pub use replay::ReplaySource;
