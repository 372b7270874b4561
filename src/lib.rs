//! Telemetry relay between a racing simulator and a single websocket UI client.
//!
//! Pitwall Relay samples simulator telemetry, turns raw ticks into named
//! events, and forwards them to one connected UI client over a websocket.
//!
//! # Features
//!
//! - **Single client**: a new client cleanly replaces the old one, with no
//!   cross-talk between connection generations
//! - **Ordered delivery**: state-change events go through a FIFO queue and
//!   survive client reconnects
//! - **Adaptive sampling**: the polling rate follows the on-track state the
//!   client has actually been told about
//!
//! # Architecture
//!
//! ```text
//! TelemetrySource -> Driver -> classify -> DeliveryQueue -> drain task -+
//!                                     \                                 |
//!                                      +-> ConnectionManager <----------+
//!                                                 |
//!                                           FrameSink (websocket)
//! ```
//!
//! ## Example (session replay)
//!
//! ```rust,no_run
//! use pitwall_relay::{Relay, RelayConfig, sources::ReplaySource};
//!
//! #[tokio::main]
//! async fn main() -> pitwall_relay::Result<()> {
//!     let relay = Relay::new(RelayConfig::default());
//!     let source = ReplaySource::open("session.jsonl", relay.sampling()).await?;
//!     let driver = relay.spawn_source(source);
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:7125").await?;
//!     pitwall_relay::server::serve(listener, relay.connections().clone(), Default::default())
//!         .await?;
//!
//!     driver.cancel();
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Relay pipeline
pub mod classifier;
pub mod connection;
pub mod driver;
pub mod queue;
pub mod rate;
pub mod source;
pub mod sources;

// Outer surfaces
pub mod logging;
pub mod preferences;
pub mod server;

pub use error::*;
pub use types::*;

pub use classifier::{SessionContext, classify};
pub use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState};
pub use driver::{Driver, DriverHandle, DriverStats};
pub use preferences::{PreferenceStore, Preferences};
pub use queue::DeliveryQueue;
pub use rate::RateController;
pub use source::TelemetrySource;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Settings for a [`Relay`]
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// On-track sampling frequency
    pub preferred_frequency: SamplingFrequency,
    pub drain_interval: Duration,
    pub keep_alive_interval: Duration,
    pub greeting: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let connection = ConnectionConfig::default();
        Self {
            preferred_frequency: SamplingFrequency::DEFAULT,
            drain_interval: connection.drain_interval,
            keep_alive_interval: connection.keep_alive_interval,
            greeting: connection.greeting,
        }
    }
}

impl From<&Preferences> for RelayConfig {
    fn from(preferences: &Preferences) -> Self {
        Self { preferred_frequency: preferences.sampling_frequency(), ..Self::default() }
    }
}

impl RelayConfig {
    fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            drain_interval: self.drain_interval,
            keep_alive_interval: self.keep_alive_interval,
            greeting: self.greeting.clone(),
        }
    }
}

/// Unified entry point wiring the relay pipeline together.
///
/// Owns the delivery queue, the rate controller and the connection manager.
/// Sources are attached with [`Relay::spawn_source`]; clients are attached
/// through the [`server`] router or directly via [`ConnectionManager::attach`].
#[derive(Debug, Clone)]
pub struct Relay {
    connections: ConnectionManager,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let queue = Arc::new(DeliveryQueue::new());
        let rate = Arc::new(RateController::new(config.preferred_frequency));
        Self { connections: ConnectionManager::new(config.connection(), queue, rate) }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        self.connections.queue()
    }

    pub fn rate(&self) -> &Arc<RateController> {
        self.connections.rate()
    }

    /// Sampling frequency updates for a telemetry source to pace itself with
    pub fn sampling(&self) -> watch::Receiver<SamplingFrequency> {
        self.rate().subscribe()
    }

    /// Start forwarding events from `source` to the client.
    pub fn spawn_source<S: TelemetrySource>(&self, source: S) -> DriverHandle {
        Driver::spawn(source, self.connections.clone())
    }

    /// Close the client connection, if any. Queued messages stay queued.
    pub async fn shutdown(&self) {
        if self.connections.close("Relay shutting down").await {
            tracing::info!("Closed client connection for shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::ChannelSource;
    use crate::test_utils::{self, on_track_tick, wait_until};

    #[test]
    fn config_takes_frequency_from_preferences() {
        let preferences = Preferences { telemetry_update_frequency: 45, port_number: 7125 };
        let config = RelayConfig::from(&preferences);
        assert_eq!(config.preferred_frequency.hz(), 45);
        assert_eq!(config.drain_interval, connection::DEFAULT_DRAIN_INTERVAL);
    }

    #[tokio::test]
    async fn relay_starts_idle_at_the_lowest_frequency() {
        let relay = Relay::new(RelayConfig::default());
        assert_eq!(relay.connections().state(), ConnectionState::Idle);
        assert_eq!(*relay.sampling().borrow(), SamplingFrequency::IDLE);
        assert!(relay.queue().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn relay_forwards_source_events_and_shuts_down() {
        let relay = Relay::new(RelayConfig {
            drain_interval: Duration::from_millis(20),
            ..RelayConfig::default()
        });
        let (sink, log, _client, inbound) = test_utils::transport();
        let lifetime = relay.connections().attach(sink, inbound).await;

        let (feed, source) = ChannelSource::new(8);
        let driver = relay.spawn_source(source);
        feed.connected().await;
        feed.tick(on_track_tick(true)).await;

        let mut sampling = relay.sampling();
        let wait = Duration::from_secs(2);
        assert!(wait_until(wait, || log.names().iter().any(|n| n == names::IS_ON_TRACK)).await);
        tokio::time::timeout(wait, sampling.wait_for(|f| *f == SamplingFrequency::DEFAULT))
            .await
            .unwrap()
            .unwrap();

        relay.shutdown().await;
        assert_eq!(lifetime.closed().await.kind, connection::transport::CloseKind::Shutdown);
        assert!(log.closed().is_some());

        driver.cancel();
        driver.join().await;
    }
}
