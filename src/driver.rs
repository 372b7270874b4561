//! Driver owns the telemetry source and runs the polling context

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::classifier::{SessionContext, classify};
use crate::connection::ConnectionManager;
use crate::source::TelemetrySource;
use crate::types::{
    Delivery, GAME_CLOSED_VALUE, GAME_OPENED_VALUE, SourceEvent, TelemetryEvent, Tick, names,
};
use crate::RelayError;

/// Consecutive source errors tolerated before the driver stops
pub const MAX_ERRORS: u32 = 10;

/// Handle to a running driver task
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct DriverHandle {
    cancel: CancellationToken,
    join: Option<JoinHandle<DriverStats>>,
}

impl DriverHandle {
    /// Ask the driver to stop after the current event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the driver to stop and return what it processed.
    pub async fn join(mut self) -> DriverStats {
        match self.join.take() {
            Some(join) => join.await.unwrap_or_else(|e| {
                error!("Driver task failed: {}", e);
                DriverStats::default()
            }),
            None => DriverStats::default(),
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Counters reported when a driver stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub events: u64,
    pub ticks: u64,
    pub errors: u64,
}

/// Driver spawns the polling task for a telemetry source
///
/// The task pulls events from the source, classifies ticks against the
/// session context, and routes the results: queued events into the delivery
/// queue, immediate events straight to the connection manager.
pub struct Driver;

impl Driver {
    pub fn spawn<S>(source: S, connections: ConnectionManager) -> DriverHandle
    where
        S: TelemetrySource,
    {
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();

        let join = tokio::spawn(async move {
            let forwarder = Forwarder::new(connections);
            Self::source_task(source, forwarder, cancel_task).await
        });

        DriverHandle { cancel, join: Some(join) }
    }

    async fn source_task<S>(
        mut source: S,
        mut forwarder: Forwarder,
        cancel: CancellationToken,
    ) -> DriverStats
    where
        S: TelemetrySource,
    {
        info!("Telemetry driver started");
        let mut stats = DriverStats::default();
        let mut error_count = 0u32;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Telemetry driver cancelled");
                    break;
                }
                result = source.next_event() => result,
            };

            match result {
                Ok(Some(event)) => {
                    error_count = 0;
                    stats.events += 1;
                    if matches!(event, SourceEvent::Tick(_)) {
                        stats.ticks += 1;
                    }
                    forwarder.handle(event).await;
                }
                Ok(None) => {
                    info!("Telemetry source ended after {} events", stats.events);
                    break;
                }
                Err(e) => {
                    // Source errors are transient until proven otherwise
                    error_count += 1;
                    stats.errors += 1;
                    error!("Telemetry source error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!("Too many telemetry source errors, stopping driver");
                        break;
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff(error_count)) => {}
                    }
                }
            }
        }

        // A source that stops without saying goodbye still closed the game
        if forwarder.attached {
            forwarder.handle(SourceEvent::Disconnected).await;
        }

        info!(
            events = stats.events,
            ticks = stats.ticks,
            errors = stats.errors,
            "Telemetry driver ended"
        );
        stats
    }
}

/// Delay after the `n`th consecutive source error: 50ms, 100ms, 200ms, ... capped at 1.6s
fn backoff(n: u32) -> Duration {
    Duration::from_millis(50 << n.saturating_sub(1).min(5))
}

/// Routes source events through the classifier to the client
struct Forwarder {
    connections: ConnectionManager,
    ctx: SessionContext,
    /// Whether the simulator is attached; ticks are dropped otherwise
    attached: bool,
}

impl Forwarder {
    fn new(connections: ConnectionManager) -> Self {
        Self { connections, ctx: SessionContext::new(), attached: false }
    }

    async fn handle(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Connected => self.on_connected(),
            SourceEvent::Disconnected => self.on_disconnected().await,
            SourceEvent::Tick(tick) => self.on_tick(&tick).await,
        }
    }

    fn on_connected(&mut self) {
        info!("Simulator connected");
        self.ctx.reset();
        self.attached = true;
        self.connections.rate().on_source_connected();
        self.connections.queue().enqueue(names::GAME_OPENED, GAME_OPENED_VALUE);
    }

    async fn on_disconnected(&mut self) {
        if !self.attached {
            debug!("Simulator disconnect without a prior connect, ignoring");
            return;
        }
        info!("Simulator disconnected");
        self.attached = false;
        self.connections.rate().on_source_disconnected();
        self.send_immediate(names::GAME_CLOSED, GAME_CLOSED_VALUE.into()).await;
    }

    async fn on_tick(&mut self, tick: &Tick) {
        if !self.attached {
            trace!("Dropping tick while simulator is detached");
            return;
        }

        for event in classify(&mut self.ctx, tick) {
            self.route(event).await;
        }
    }

    async fn route(&self, event: TelemetryEvent) {
        match event.delivery {
            Delivery::Queued => self.connections.queue().push(event.into_message()),
            Delivery::Immediate => self.send_immediate(&event.name, event.value).await,
        }
    }

    async fn send_immediate(&self, name: &str, value: serde_json::Value) {
        match self.connections.send(name, value).await {
            Ok(()) => trace!(name, "sent immediate message"),
            Err(RelayError::NotConnected) => trace!(name, "no client, dropping immediate message"),
            Err(e) => warn!(name, error = %e, "immediate message not delivered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::queue::DeliveryQueue;
    use crate::rate::RateController;
    use crate::sources::ChannelSource;
    use crate::test_utils::{self, driving_tick, lap_tick, on_track_tick, wait_until, within};
    use crate::types::SamplingFrequency;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Arc;

    const WAIT: Duration = Duration::from_secs(2);

    fn connections() -> ConnectionManager {
        let config = ConnectionConfig {
            drain_interval: Duration::from_millis(20),
            keep_alive_interval: Duration::from_secs(3600),
            ..ConnectionConfig::default()
        };
        let rate = Arc::new(RateController::new(SamplingFrequency::new(20)));
        ConnectionManager::new(config, Arc::new(DeliveryQueue::new()), rate)
    }

    #[tokio::test]
    async fn simulator_connect_queues_game_opened_before_any_client() {
        let connections = connections();
        let (feed, source) = ChannelSource::new(16);
        let driver = Driver::spawn(source, connections.clone());

        feed.connected().await;
        feed.tick(on_track_tick(true)).await;
        drop(feed);
        let stats = within(WAIT, driver.join()).await;

        assert_eq!(stats.events, 2);
        assert_eq!(stats.ticks, 1);
        // The source ended while attached, so game-closed was attempted with no client
        let queued: Vec<_> = connections.queue().snapshot().into_iter().map(|m| m.name).collect();
        assert_eq!(queued, [names::GAME_OPENED, names::IS_ON_TRACK]);
        assert!(!connections.rate().is_active());
    }

    #[tokio::test]
    async fn ticks_before_simulator_connect_are_ignored() {
        let connections = connections();
        let (feed, source) = ChannelSource::new(16);
        let driver = Driver::spawn(source, connections.clone());

        feed.tick(on_track_tick(true)).await;
        feed.tick(lap_tick(3, 88.0)).await;
        drop(feed);
        within(WAIT, driver.join()).await;

        assert!(connections.queue().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_session_reaches_the_client() {
        let connections = connections();
        let (sink, log, _client, inbound) = test_utils::transport();
        let _lifetime = connections.attach(sink, inbound).await;

        let (feed, source) = ChannelSource::new(16);
        let _driver = Driver::spawn(source, connections.clone());

        feed.connected().await;
        feed.tick(driving_tick(1, 30.0)).await;
        feed.tick(driving_tick(2, 31.0)).await;

        assert!(wait_until(WAIT, || connections.rate().current().hz() == 20).await);
        assert!(
            wait_until(WAIT, || log.names().iter().any(|n| n == names::LAST_LAP_TIME)).await
        );

        feed.disconnected().await;
        assert!(wait_until(WAIT, || log.names().iter().any(|n| n == names::GAME_CLOSED)).await);

        let messages = log.messages();
        let position = |name: &str| messages.iter().position(|(n, _)| n == name).unwrap();
        assert!(position(names::SDK_CONNECTED) < position(names::GAME_OPENED));
        assert!(position(names::GAME_OPENED) < position(names::IS_ON_TRACK));
        assert!(position(names::IS_ON_TRACK) < position(names::LAST_LAP_TIME));

        let dictionaries: Vec<_> =
            messages.iter().filter(|(n, _)| n == names::TELEMETRY_DICTIONARY).collect();
        assert_eq!(dictionaries.len(), 2);
        assert_eq!(dictionaries[1].1["SpeedValue"], json!(31.0));
        assert_eq!(dictionaries[1].1["SpeedUnit"], json!("m/s"));
        assert!(!connections.rate().is_active());
    }

    #[tokio::test]
    async fn reconnect_resets_session_state() {
        let connections = connections();
        let (feed, source) = ChannelSource::new(16);
        let driver = Driver::spawn(source, connections.clone());

        feed.connected().await;
        feed.tick(lap_tick(3, 90.0)).await;
        feed.disconnected().await;
        feed.connected().await;
        feed.tick(lap_tick(2, 91.0)).await;
        drop(feed);
        within(WAIT, driver.join()).await;

        // Lap 2 after reconnect is new again; without a reset it would be a rewind
        let laps: Vec<_> = connections
            .queue()
            .snapshot()
            .into_iter()
            .filter(|m| m.name == names::LAST_LAP_TIME)
            .map(|m| m.value)
            .collect();
        assert_eq!(laps, [json!(90.0), json!(91.0)]);
    }

    type Step = crate::Result<Option<SourceEvent>>;

    /// Source that plays a fixed script of results, then ends
    struct ScriptedSource {
        steps: VecDeque<Step>,
    }

    impl ScriptedSource {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self { steps: steps.into_iter().collect() }
        }
    }

    #[async_trait::async_trait]
    impl TelemetrySource for ScriptedSource {
        async fn next_event(&mut self) -> crate::Result<Option<SourceEvent>> {
            self.steps.pop_front().unwrap_or(Ok(None))
        }
    }

    fn failure() -> Step {
        Err(RelayError::source_failed("simulator not responding"))
    }

    fn tick_json(json: &str) -> Tick {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn backoff_doubles_up_to_a_cap() {
        assert_eq!(backoff(1), Duration::from_millis(50));
        assert_eq!(backoff(2), Duration::from_millis(100));
        assert_eq!(backoff(3), Duration::from_millis(200));
        assert_eq!(backoff(6), Duration::from_millis(1600));
        assert_eq!(backoff(MAX_ERRORS), Duration::from_millis(1600));
    }

    #[tokio::test]
    async fn transient_source_errors_are_retried() {
        let connections = connections();
        let source = ScriptedSource::new([failure(), Ok(Some(SourceEvent::Connected))]);
        let driver = Driver::spawn(source, connections.clone());

        let stats = within(WAIT, driver.join()).await;
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.events, 1);
        assert_eq!(connections.queue().try_dequeue().unwrap().name, names::GAME_OPENED);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_gives_up_after_consecutive_errors_and_closes_the_game() {
        let connections = connections();
        let (sink, log, _client, inbound) = test_utils::transport();
        let _lifetime = connections.attach(sink, inbound).await;

        let mut steps = vec![Ok(Some(SourceEvent::Connected))];
        steps.extend((0..MAX_ERRORS + 5).map(|_| failure()));
        steps.push(Ok(Some(SourceEvent::Tick(on_track_tick(true)))));
        let driver = Driver::spawn(ScriptedSource::new(steps), connections.clone());

        let stats = within(Duration::from_secs(60), driver.join()).await;
        assert_eq!(stats.errors, u64::from(MAX_ERRORS));
        assert_eq!(stats.events, 1);
        assert_eq!(stats.ticks, 0);
        assert!(wait_until(WAIT, || log.names().iter().any(|n| n == names::GAME_CLOSED)).await);
        assert!(!connections.rate().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn a_good_event_resets_the_error_count() {
        let connections = connections();

        let mut steps: Vec<Step> = (0..MAX_ERRORS - 1).map(|_| failure()).collect();
        steps.push(Ok(Some(SourceEvent::Connected)));
        steps.extend((0..MAX_ERRORS - 1).map(|_| failure()));
        steps.push(Ok(Some(SourceEvent::Tick(on_track_tick(true)))));
        let driver = Driver::spawn(ScriptedSource::new(steps), connections.clone());

        let stats = within(Duration::from_secs(60), driver.join()).await;
        assert_eq!(stats.errors, u64::from(2 * (MAX_ERRORS - 1)));
        assert_eq!(stats.ticks, 1);
        let queued: Vec<_> = connections.queue().snapshot().into_iter().map(|m| m.name).collect();
        assert_eq!(queued, [names::GAME_OPENED, names::IS_ON_TRACK]);
    }

    #[tokio::test]
    async fn malformed_readings_never_count_as_source_errors() {
        let connections = connections();
        let (feed, source) = ChannelSource::new(16);
        let driver = Driver::spawn(source, connections.clone());

        feed.connected().await;
        for _ in 0..MAX_ERRORS {
            feed.tick(tick_json(r#"{"IsOnTrack":false,"Speed":null}"#)).await;
        }
        feed.tick(tick_json(r#"{"IsOnTrack":true,"Speed":{"unit":"m/s"},"Gear":3}"#)).await;
        drop(feed);
        let stats = within(WAIT, driver.join()).await;

        assert_eq!(stats.errors, 0);
        assert_eq!(stats.ticks, u64::from(MAX_ERRORS) + 1);
        let queued = connections.queue().snapshot();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[1].on_track(), Some(true));
    }

    #[tokio::test]
    async fn cancel_stops_the_driver() {
        let connections = connections();
        let (_feed, source) = ChannelSource::new(16);
        let driver = Driver::spawn(source, connections);

        driver.cancel();
        let stats = within(WAIT, driver.join()).await;
        assert_eq!(stats, DriverStats::default());
    }
}
