//! Per-generation background tasks
//!
//! Each task holds the `Arc<Connection>` of the generation it was spawned for
//! and exits as soon as that generation's token is cancelled, so it can never
//! write to a newer connection.

use std::sync::Arc;

use futures::StreamExt;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::{CloseReason, Connection, ConnectionManager, InboundFrame, InboundStream, OutboundFrame};

/// Reads client frames until the peer closes or the transport dies.
///
/// Application payloads are logged and otherwise ignored.
pub(super) async fn receive_loop(
    manager: ConnectionManager,
    conn: Arc<Connection>,
    mut inbound: InboundStream,
) {
    let generation = conn.generation;
    debug!(generation, "receive loop started");

    let reason = loop {
        let next = tokio::select! {
            _ = conn.cancel.cancelled() => {
                debug!(generation, "receive loop cancelled");
                return;
            }
            next = inbound.next() => next,
        };

        match next {
            Some(Ok(InboundFrame::Close(description))) => break CloseReason::peer(description),
            Some(Ok(InboundFrame::Text(text))) => {
                debug!(generation, %text, "ignoring client message");
            }
            Some(Ok(InboundFrame::Binary(len))) => {
                debug!(generation, len, "ignoring binary client message");
            }
            Some(Ok(InboundFrame::Ping | InboundFrame::Pong)) => {
                trace!(generation, "keep-alive frame from client");
            }
            Some(Err(e)) => break CloseReason::aborted(format!("Connection aborted: {e}")),
            None => break CloseReason::aborted("Connection aborted"),
        }
    };

    manager.close_generation(generation, reason).await;
    debug!(generation, "receive loop ended");
}

/// Forwards queued messages to this generation's connection.
///
/// Each pass delivers everything currently in the queue, then sleeps one
/// drain interval. A message that cannot be delivered is put back at the
/// front of the queue for the next connection.
pub(super) async fn drain_loop(manager: ConnectionManager, conn: Arc<Connection>) {
    let generation = conn.generation;
    let interval = manager.shared.config.drain_interval;
    let queue = Arc::clone(&manager.shared.queue);
    let rate = Arc::clone(&manager.shared.rate);
    debug!(generation, ?interval, "drain task started");

    'drain: loop {
        {
            let _pass = manager.shared.drain_lock.lock().await;
            while let Some(message) = queue.try_dequeue() {
                if conn.cancel.is_cancelled() {
                    queue.requeue_front(message);
                    break 'drain;
                }

                match manager.write_message(&conn, &message.name, &message.value).await {
                    Ok(()) => {
                        debug!(generation, name = %message.name, "delivered queued message");
                        rate.observe(&message);
                    }
                    Err(e) => {
                        debug!(generation, name = %message.name, error = %e, "queued delivery failed");
                        queue.requeue_front(message);
                        break 'drain;
                    }
                }
            }
        }

        tokio::select! {
            _ = conn.cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!(generation, "drain task stopped");
}

/// Sends protocol pings through the single writer.
pub(super) async fn keep_alive(manager: ConnectionManager, conn: Arc<Connection>) {
    let generation = conn.generation;
    let period = manager.shared.config.keep_alive_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = conn.cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = manager.write(&conn, OutboundFrame::Ping).await {
                    debug!(generation, error = %e, "keep-alive ping failed");
                    break;
                }
                trace!(generation, "keep-alive ping sent");
            }
        }
    }
}
