//! Websocket server for the UI client
//!
//! Exposes a single endpoint, `GET /sdk`. Upgrade requests become the
//! active client connection; anything else is answered with `400 Bad Request`.

use axum::Router;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::{ConnectionManager, FrameSink, InboundFrame, OutboundFrame};
use crate::{RelayError, Result};

/// Path the UI client connects to
pub const SDK_PATH: &str = "/sdk";

/// Router serving [`SDK_PATH`] for the given connection manager.
pub fn router(manager: ConnectionManager) -> Router {
    Router::new().route(SDK_PATH, get(sdk_handler)).with_state(manager)
}

/// Serve UI clients on `listener` until `shutdown` fires.
///
/// On shutdown the active client connection is closed before the server stops.
pub async fn serve(
    listener: TcpListener,
    manager: ConnectionManager,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("Listening for UI clients on ws://{}{}", addr, SDK_PATH);

    let closer = manager.clone();
    axum::serve(listener, router(manager))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            closer.close("Relay shutting down").await;
        })
        .await
        .map_err(|e| RelayError::transport_with_source("websocket server failed", Box::new(e)))
}

async fn sdk_handler(
    State(manager): State<ConnectionManager>,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(upgrade) => upgrade.on_upgrade(move |socket| client_session(manager, socket)),
        Err(rejection) => {
            debug!(%rejection, "rejected non-websocket request");
            (StatusCode::BAD_REQUEST, "Expected a websocket upgrade request").into_response()
        }
    }
}

/// Runs for as long as the upgraded connection stays the active one.
async fn client_session(manager: ConnectionManager, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let inbound = stream
        .map(|message| match message {
            Ok(message) => Ok(inbound_frame(message)),
            Err(e) => Err(RelayError::transport_with_source("websocket read failed", Box::new(e))),
        })
        .boxed();

    let lifetime = manager.attach(WebSocketSink { sink }, inbound).await;
    let generation = lifetime.generation();
    let reason = lifetime.closed().await;
    debug!(generation, %reason, "client session finished");
}

fn inbound_frame(message: Message) -> InboundFrame {
    match message {
        Message::Text(text) => InboundFrame::Text(text.as_str().to_owned()),
        Message::Binary(bytes) => InboundFrame::Binary(bytes.len()),
        Message::Ping(_) => InboundFrame::Ping,
        Message::Pong(_) => InboundFrame::Pong,
        Message::Close(frame) => InboundFrame::Close(frame.map(|f| f.reason.as_str().to_owned())),
    }
}

/// Outbound half of an upgraded websocket
struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait::async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        let message = match frame {
            OutboundFrame::Text(text) => Message::Text(text.into()),
            OutboundFrame::Ping => Message::Ping(Default::default()),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| RelayError::transport_with_source("websocket write failed", Box::new(e)))
    }

    async fn close(&mut self, reason: &str) -> Result<()> {
        let frame = CloseFrame { code: close_code::NORMAL, reason: reason.into() };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| RelayError::transport_with_source("websocket close failed", Box::new(e)))
    }
}
