//! Telemetry source trait

use crate::Result;
use crate::types::SourceEvent;

/// Trait for upstream telemetry sources
///
/// A source is a lazy, non-restartable sequence of [`SourceEvent`]s. It paces
/// itself: sources are handed a `watch::Receiver<SamplingFrequency>` by the
/// rate controller and read it before each polling cycle, so frequency
/// changes apply to future polls only.
#[async_trait::async_trait]
pub trait TelemetrySource: Send + 'static {
    /// Get the next event
    ///
    /// Returns:
    /// - `Ok(Some(event))` - Simulator attached/detached, or a new tick
    /// - `Ok(None)` - Source ended (normal termination)
    /// - `Err(e)` - Error occurred; the driver may call again
    async fn next_event(&mut self) -> Result<Option<SourceEvent>>;
}
