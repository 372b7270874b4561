//! End-to-end tests for the websocket endpoint over a real TCP socket
//!
//! The client side speaks just enough RFC 6455 by hand: the upgrade
//! handshake, reading unmasked server frames, and sending a masked close.

use std::net::SocketAddr;
use std::time::Duration;

use pitwall_relay::{ConnectionState, Relay, RelayConfig, names, server};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

const OP_TEXT: u8 = 0x1;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;

struct TestServer {
    relay: Relay,
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<pitwall_relay::Result<()>>,
}

async fn start() -> TestServer {
    let _ = tracing_subscriber::fmt::try_init();
    let relay = Relay::new(RelayConfig {
        drain_interval: Duration::from_millis(20),
        keep_alive_interval: Duration::from_secs(3600),
        ..RelayConfig::default()
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(server::serve(listener, relay.connections().clone(), shutdown.clone()));
    TestServer { relay, addr, shutdown, task }
}

async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = vec![0u8; 1024];
    let n = tokio::time::timeout(WAIT, stream.read(&mut buf)).await.unwrap().unwrap();
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

/// Minimal websocket client
struct Client {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Client {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET /sdk HTTP/1.1\r\nHost: {addr}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut client = Client { stream, buf: Vec::new() };
        let head_end = loop {
            if let Some(pos) = client.buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            client.fill().await;
        };
        let head = String::from_utf8_lossy(&client.buf[..head_end]).into_owned();
        assert!(head.starts_with("HTTP/1.1 101"), "unexpected handshake response: {head}");
        client.buf.drain(..head_end);
        client
    }

    async fn fill(&mut self) {
        let mut chunk = [0u8; 1024];
        let n = tokio::time::timeout(WAIT, self.stream.read(&mut chunk)).await.unwrap().unwrap();
        assert!(n > 0, "server closed the socket");
        self.buf.extend_from_slice(&chunk[..n]);
    }

    async fn need(&mut self, len: usize) {
        while self.buf.len() < len {
            self.fill().await;
        }
    }

    /// Next frame from the server as (opcode, payload)
    async fn frame(&mut self) -> (u8, Vec<u8>) {
        self.need(2).await;
        let opcode = self.buf[0] & 0x0f;
        let (len, header) = match self.buf[1] & 0x7f {
            126 => {
                self.need(4).await;
                (u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize, 4)
            }
            127 => panic!("unexpectedly large frame"),
            len => (len as usize, 2),
        };
        self.need(header + len).await;
        let payload = self.buf[header..header + len].to_vec();
        self.buf.drain(..header + len);
        (opcode, payload)
    }

    /// Next text message, skipping pings
    async fn message(&mut self) -> Value {
        loop {
            match self.frame().await {
                (OP_TEXT, payload) => return serde_json::from_slice(&payload).unwrap(),
                (OP_PING, _) => continue,
                (opcode, _) => panic!("expected a text frame, got opcode {opcode:#x}"),
            }
        }
    }

    async fn send_close(&mut self, reason: &str) {
        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        let mask = [0x12, 0x34, 0x56, 0x78];
        let mut frame = vec![0x80 | OP_CLOSE, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&mask);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        self.stream.write_all(&frame).await.unwrap();
    }
}

async fn wait_for_state(relay: &Relay, state: ConnectionState) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if relay.connections().state() == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn plain_http_request_is_rejected() {
    let server = start().await;

    let response = raw_request(
        server.addr,
        &format!("GET /sdk HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", server.addr),
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 400"), "unexpected response: {response}");
    assert_eq!(server.relay.connections().state(), ConnectionState::Idle);
}

#[tokio::test]
async fn upgraded_client_is_greeted_and_gets_queued_messages() {
    let server = start().await;
    server.relay.queue().enqueue(names::GAME_OPENED, "game opened");

    let mut client = Client::connect(server.addr).await;

    assert_eq!(
        client.message().await,
        json!({
            "name": "sdk-connected",
            "value": "You are connected to the SDK Service. Waiting for the simulator to open."
        })
    );
    assert_eq!(client.message().await, json!({ "name": "game-opened", "value": "game opened" }));
    assert!(server.relay.connections().is_open());
    assert!(server.relay.queue().is_empty());
}

#[tokio::test]
async fn second_client_replaces_the_first() {
    let server = start().await;

    let mut first = Client::connect(server.addr).await;
    first.message().await;
    let first_generation = server.relay.connections().generation();

    let mut second = Client::connect(server.addr).await;
    assert_eq!(second.message().await["name"], "sdk-connected");

    let (opcode, payload) = first.frame().await;
    assert_eq!(opcode, OP_CLOSE);
    assert_eq!(&payload[..2], 1000u16.to_be_bytes());
    assert_eq!(String::from_utf8_lossy(&payload[2..]), "Replaced by a new connection");

    assert!(server.relay.connections().generation() > first_generation);
    server.relay.connections().send(names::SPEED, 42.0).await.unwrap();
    assert_eq!(second.message().await, json!({ "name": "SpeedValue", "value": 42.0 }));
}

#[tokio::test]
async fn client_close_returns_the_relay_to_idle() {
    let server = start().await;

    let mut client = Client::connect(server.addr).await;
    client.message().await;
    client.send_close("closing tab").await;

    assert!(wait_for_state(&server.relay, ConnectionState::Idle).await);
}

#[tokio::test]
async fn shutdown_closes_the_client_and_stops_the_server() {
    let server = start().await;

    let mut client = Client::connect(server.addr).await;
    client.message().await;

    server.shutdown.cancel();
    let (opcode, _) = client.frame().await;
    assert_eq!(opcode, OP_CLOSE);

    tokio::time::timeout(WAIT, server.task).await.unwrap().unwrap().unwrap();
    assert_eq!(server.relay.connections().state(), ConnectionState::Idle);
}
