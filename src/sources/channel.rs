//! Channel-fed telemetry source

use tokio::sync::mpsc;

use crate::Result;
use crate::source::TelemetrySource;
use crate::types::{SourceEvent, Tick};

/// Source whose events are pushed through a [`SourceFeed`]
///
/// The stream ends once every feed handle has been dropped.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<SourceEvent>,
}

/// Sending half of a [`ChannelSource`]
#[derive(Debug, Clone)]
pub struct SourceFeed {
    tx: mpsc::Sender<SourceEvent>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (SourceFeed, ChannelSource) {
        let (tx, rx) = mpsc::channel(capacity);
        (SourceFeed { tx }, ChannelSource { rx })
    }
}

impl SourceFeed {
    /// Push one event. Returns `false` once the source has gone away.
    pub async fn push(&self, event: SourceEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub async fn connected(&self) -> bool {
        self.push(SourceEvent::Connected).await
    }

    pub async fn disconnected(&self) -> bool {
        self.push(SourceEvent::Disconnected).await
    }

    pub async fn tick(&self, tick: Tick) -> bool {
        self.push(SourceEvent::Tick(tick)).await
    }
}

#[async_trait::async_trait]
impl TelemetrySource for ChannelSource {
    async fn next_event(&mut self) -> Result<Option<SourceEvent>> {
        Ok(self.rx.recv().await)
    }
}
