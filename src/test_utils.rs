//! Test utilities: an in-memory transport and tick builders
//!
//! [`RecordingSink`] stands in for the websocket write half and records every
//! frame it accepts; [`ScriptedClient`] feeds the read half. Together they let
//! the connection manager run without a network.

#![cfg(any(test, feature = "benchmark"))]

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::connection::{FrameSink, InboundFrame, InboundStream, OutboundFrame};
use crate::types::{Reading, Tick, vars};
use crate::{RelayError, Result};

#[derive(Debug, Default)]
struct SinkRecord {
    frames: Vec<OutboundFrame>,
    closed: Option<String>,
}

/// Shared view of what a [`RecordingSink`] received
#[derive(Debug, Clone, Default)]
pub struct SinkLog {
    record: Arc<Mutex<SinkRecord>>,
    failing: Arc<AtomicBool>,
}

impl SinkLog {
    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.record.lock().unwrap().frames.clone()
    }

    /// Decoded `(name, value)` pairs of every text frame, in write order
    pub fn messages(&self) -> Vec<(String, serde_json::Value)> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                OutboundFrame::Text(text) => {
                    let mut json: serde_json::Value = serde_json::from_str(&text).ok()?;
                    let name = json.get("name")?.as_str()?.to_string();
                    Some((name, json.get_mut("value")?.take()))
                }
                OutboundFrame::Ping => None,
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.messages().into_iter().map(|(name, _)| name).collect()
    }

    pub fn pings(&self) -> usize {
        self.frames().iter().filter(|f| **f == OutboundFrame::Ping).count()
    }

    /// Close description, once the sink has been closed
    pub fn closed(&self) -> Option<String> {
        self.record.lock().unwrap().closed.clone()
    }

    /// Make every following write fail as an aborted transport would.
    pub fn fail_writes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

/// In-memory [`FrameSink`]
#[derive(Debug)]
pub struct RecordingSink {
    log: SinkLog,
}

impl RecordingSink {
    pub fn new() -> (Self, SinkLog) {
        let log = SinkLog::default();
        (Self { log: log.clone() }, log)
    }
}

#[async_trait::async_trait]
impl FrameSink for RecordingSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        if self.log.failing.load(Ordering::SeqCst) {
            return Err(RelayError::transport("connection aborted"));
        }
        let mut record = self.log.record.lock().unwrap();
        if record.closed.is_some() {
            return Err(RelayError::transport("write after close"));
        }
        record.frames.push(frame);
        Ok(())
    }

    async fn close(&mut self, reason: &str) -> Result<()> {
        let mut record = self.log.record.lock().unwrap();
        if record.closed.is_some() {
            return Err(RelayError::transport("already closed"));
        }
        record.closed = Some(reason.to_string());
        Ok(())
    }
}

/// Client side of the inbound stream
///
/// Dropping it ends the stream, which the relay treats as an aborted transport.
#[derive(Debug)]
pub struct ScriptedClient {
    tx: mpsc::UnboundedSender<Result<InboundFrame>>,
}

impl ScriptedClient {
    pub fn new() -> (Self, InboundStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx).boxed())
    }

    pub fn text(&self, text: &str) {
        let _ = self.tx.send(Ok(InboundFrame::Text(text.to_string())));
    }

    pub fn close(&self, description: &str) {
        let _ = self.tx.send(Ok(InboundFrame::Close(Some(description.to_string()))));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Err(RelayError::transport(reason.to_string())));
    }
}

/// A recording sink plus its scripted client, ready for `attach`
pub fn transport() -> (RecordingSink, SinkLog, ScriptedClient, InboundStream) {
    let (sink, log) = RecordingSink::new();
    let (client, inbound) = ScriptedClient::new();
    (sink, log, client, inbound)
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await a future with a test-friendly timeout.
pub async fn within<F: Future>(timeout: Duration, future: F) -> F::Output {
    tokio::time::timeout(timeout, future).await.expect("timed out")
}

pub fn on_track_tick(on_track: bool) -> Tick {
    Tick::new().with(vars::IS_ON_TRACK, on_track)
}

pub fn lap_tick(lap: i64, last_lap_time: f64) -> Tick {
    Tick::new().with(vars::LAP, lap).with(vars::LAP_LAST_LAP_TIME, last_lap_time)
}

/// A complete on-track tick with every continuous channel
pub fn driving_tick(lap: i64, speed: f64) -> Tick {
    Tick::new()
        .with(vars::IS_ON_TRACK, true)
        .with(vars::LAP, lap)
        .with(vars::LAP_LAST_LAP_TIME, 90.0 + lap as f64 / 10.0)
        .with(vars::THROTTLE, 0.9)
        .with(vars::BRAKE, 0.0)
        .with(vars::STEERING_WHEEL_ANGLE, Reading::with_unit(0.1, "rad"))
        .with(vars::SPEED, Reading::with_unit(speed, "m/s"))
        .with(vars::GEAR, 4)
}
