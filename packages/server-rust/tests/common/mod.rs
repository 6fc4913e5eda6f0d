//! Shared helpers for the socket-level tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hearth_server::service::Orchestrator;
use hearth_server::{ConnectionListener, MessageDispatcher, NetworkConfig, RunningServices, ServiceSet};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a client waits before deciding nothing was sent.
pub const SILENCE: Duration = Duration::from_millis(200);

pub struct Harness {
    pub running: RunningServices,
    pub listener: Arc<ConnectionListener>,
    pub addr: SocketAddr,
}

impl Harness {
    pub async fn stop(self) {
        self.running.stop_all().await;
    }
}

pub fn test_config(max_clients: usize) -> NetworkConfig {
    NetworkConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_clients,
        shutdown_timeout: Duration::from_secs(2),
        ..NetworkConfig::default()
    }
}

/// Boots a listener and the standard dispatcher on an ephemeral port.
pub async fn start(max_clients: usize) -> Harness {
    let listener = Arc::new(ConnectionListener::new(test_config(max_clients)));
    let services = ServiceSet::new()
        .with_shared(Arc::clone(&listener))
        .with(MessageDispatcher::default());

    let running = Orchestrator::new(Duration::from_secs(5))
        .bootstrap(services)
        .await
        .expect("bootstrap");
    let addr = listener.local_addr().expect("listener bound");

    Harness {
        running,
        listener,
        addr,
    }
}

pub async fn connect(addr: SocketAddr) -> Client {
    let (client, _response) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("websocket handshake");
    client
}

pub async fn send_json(client: &mut Client, value: &Value) {
    client
        .send(Message::text(value.to_string()))
        .await
        .expect("send frame");
}

/// Next text frame parsed as JSON. Panics after two seconds.
pub async fn recv_json(client: &mut Client) -> Value {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).expect("json frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

/// Next close frame. Panics after two seconds.
pub async fn recv_close(client: &mut Client) -> Option<CloseFrame> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for close")
}

/// Asserts that no data frame arrives within `SILENCE`.
pub async fn expect_silence(client: &mut Client) {
    match tokio::time::timeout(SILENCE, client.next()).await {
        Err(_) => {}
        Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
        Ok(other) => panic!("expected silence, got {other:?}"),
    }
}

/// Polls `check` every 10ms for up to two seconds.
pub async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn sign_in(username: &str, password: &str) -> Value {
    serde_json::json!({"id": 1, "data": {"username": username, "password": password}})
}
