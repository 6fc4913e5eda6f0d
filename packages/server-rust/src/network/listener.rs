//! WebSocket connection listener with fixed-capacity slots.
//!
//! `ConnectionListener` is constructed up front (no port bound), then started
//! by the orchestrator. `start()` binds the TCP listener, spawns the axum
//! server and the session event loop, and flips the health state to Ready.
//! `stop()` closes every connection and waits, bounded by
//! `NetworkConfig::shutdown_timeout`, for all of it to wind down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use hearth_core::Envelope;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::NetworkConfig;
use super::connection::{ConnectionHandle, OutboundFrame};
use super::handlers::{
    health_handler, liveness_handler, readiness_handler, ws_upgrade_handler, AppState,
};
use super::middleware::build_http_layers;
use super::session::{run_event_loop, InboundCallback, SessionEvent, SessionState};
use super::shutdown::HealthState;
use super::slots::SlotId;
use crate::service::registry::{Capability, ManagedService, ServiceContext, ServiceId};

/// Errors raised while starting the listener.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("listener has already been started")]
    AlreadyStarted,
}

/// Tasks owned by a started listener.
struct ListenerRuntime {
    local_addr: SocketAddr,
    server: JoinHandle<()>,
    event_loop: JoinHandle<()>,
}

/// Accepts WebSocket sessions into a fixed slot table and exchanges
/// `{id, data}` envelopes with them.
pub struct ConnectionListener {
    config: NetworkConfig,
    state: Arc<SessionState>,
    runtime: Mutex<Option<ListenerRuntime>>,
    started: Mutex<bool>,
}

impl ConnectionListener {
    /// Creates a listener with `config.max_clients` empty slots. Nothing is
    /// bound until `start()`.
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        let state = Arc::new(SessionState::new(config.max_clients));
        Self {
            config,
            state,
            runtime: Mutex::new(None),
            started: Mutex::new(false),
        }
    }

    /// Assembles the router: WebSocket upgrade on `/` and `/ws`, plus the
    /// health probes.
    fn build_router(&self, events: mpsc::Sender<SessionEvent>) -> Router {
        let state = AppState {
            sessions: Arc::clone(&self.state),
            events,
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        };

        Router::new()
            .route("/", get(ws_upgrade_handler))
            .route("/ws", get(ws_upgrade_handler))
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the configured address and starts accepting sessions.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns `ListenerError::Bind` if the address cannot be bound and
    /// `ListenerError::AlreadyStarted` once a call has succeeded. A failed
    /// bind can be retried; a stopped listener cannot be restarted.
    pub async fn bind(&self) -> Result<SocketAddr, ListenerError> {
        {
            let mut started = self.started.lock();
            if *started {
                return Err(ListenerError::AlreadyStarted);
            }
            *started = true;
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let (tcp, local_addr) = match bind_socket(&addr).await {
            Ok(bound) => bound,
            Err(err) => {
                // Nothing was spawned, so a later call may try again.
                *self.started.lock() = false;
                return Err(err);
            }
        };

        let (events_tx, events_rx) = mpsc::channel(self.config.event_channel_capacity);
        let router = self.build_router(events_tx.clone());

        let shutdown = self.state.shutdown.shutdown_signal();
        let server = tokio::spawn(async move {
            let service = router.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(err) = axum::serve(tcp, service)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %err, "http server exited with error");
            }
        });

        let event_loop = tokio::spawn(run_event_loop(
            Arc::clone(&self.state),
            self.config.connection.clone(),
            events_tx,
            events_rx,
        ));

        *self.runtime.lock() = Some(ListenerRuntime {
            local_addr,
            server,
            event_loop,
        });
        self.state.shutdown.set_ready();

        info!(
            addr = %local_addr,
            capacity = self.config.max_clients,
            "listening for websocket connections"
        );
        Ok(local_addr)
    }

    /// Closes every connection and the listening socket.
    ///
    /// Waits up to `shutdown_timeout` for the HTTP server, the event loop,
    /// and every socket pump to exit; stragglers are aborted. Calling it
    /// on a listener that was never started, or twice, is a no-op.
    pub async fn shutdown(&self) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };

        self.state.shutdown.trigger_shutdown();
        let closed = self.state.close_all("server shutting down");
        info!(connections = closed, "listener draining");

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        join_or_abort("http server", runtime.server, deadline).await;
        join_or_abort("session event loop", runtime.event_loop, deadline).await;

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if self.state.shutdown.wait_for_drain(remaining).await {
            info!("listener stopped");
        } else {
            warn!(
                tasks = self.state.shutdown.active_tasks(),
                "listener stop timed out with connection tasks still running"
            );
        }
    }

    /// Sends `message` to the connection in `slot`.
    ///
    /// Returns `false`, without side effects, if the slot is empty or its
    /// transport is no longer open. Serialization and queueing failures are
    /// logged and also reported as `false`.
    pub fn send(&self, slot: SlotId, message: &Envelope) -> bool {
        let Some(handle) = self.state.connection(slot) else {
            return false;
        };
        if !handle.is_connected() {
            return false;
        }

        let text = match message.to_json() {
            Ok(text) => text,
            Err(err) => {
                warn!(%slot, error = %err, "failed to serialize outbound message");
                return false;
            }
        };
        deliver(&handle, text)
    }

    /// Sends `message` to every open connection whose handle satisfies
    /// `filter`. The envelope is serialized once. Returns how many
    /// connections accepted the frame.
    pub fn send_to(&self, message: &Envelope, filter: impl Fn(&ConnectionHandle) -> bool) -> usize {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "failed to serialize outbound message");
                return 0;
            }
        };

        let targets: Vec<Arc<ConnectionHandle>> = self
            .state
            .slots
            .lock()
            .occupied()
            .map(|(_, handle)| Arc::clone(handle))
            .collect();

        targets
            .iter()
            .filter(|handle| handle.is_connected() && filter(handle))
            .filter(|handle| deliver(handle, text.clone()))
            .count()
    }

    /// Closes the connection in `slot` and frees the slot. No-op when the
    /// slot is empty.
    pub fn disconnect(&self, slot: SlotId) {
        if !self.state.disconnect(slot) {
            debug!(%slot, "disconnect on empty slot ignored");
        }
    }

    /// Installs the callback that receives every well-formed inbound
    /// envelope, replacing any previous one.
    pub fn set_receiver(&self, receiver: impl Fn(SlotId, Envelope) + Send + Sync + 'static) {
        self.state
            .receiver
            .store(Some(Arc::new(InboundCallback::new(receiver))));
    }

    /// Removes the receive callback; later frames are validated and dropped.
    pub fn clear_receiver(&self) {
        self.state.receiver.store(None);
    }

    /// Bound address, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.runtime.lock().as_ref().map(|rt| rt.local_addr)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.connection_count()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.capacity()
    }

    /// Occupied slot ids in ascending order.
    #[must_use]
    pub fn occupied_slots(&self) -> Vec<SlotId> {
        self.state
            .slots
            .lock()
            .occupied()
            .map(|(slot, _)| slot)
            .collect()
    }

    /// Handle of the connection in `slot`, if any.
    #[must_use]
    pub fn connection(&self, slot: SlotId) -> Option<Arc<ConnectionHandle>> {
        self.state.connection(slot)
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        self.state.shutdown.health_state()
    }
}

fn deliver(handle: &ConnectionHandle, text: String) -> bool {
    match handle.try_send(OutboundFrame::Text(text)) {
        Ok(()) => true,
        Err(err) => {
            warn!(slot = %handle.slot, conn = handle.id.0, error = %err, "send failed");
            false
        }
    }
}

async fn bind_socket(addr: &str) -> Result<(TcpListener, SocketAddr), ListenerError> {
    let bind_error = |source| ListenerError::Bind {
        addr: addr.to_string(),
        source,
    };
    let tcp = TcpListener::bind(addr).await.map_err(bind_error)?;
    let local_addr = tcp.local_addr().map_err(bind_error)?;
    Ok((tcp, local_addr))
}

async fn join_or_abort(task: &str, mut handle: JoinHandle<()>, deadline: tokio::time::Instant) {
    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
    match tokio::time::timeout(remaining.max(Duration::from_millis(1)), &mut handle).await {
        Ok(Ok(())) => debug!(task, "task finished"),
        Ok(Err(err)) => warn!(task, error = %err, "task ended abnormally"),
        Err(_) => {
            warn!(task, "task did not finish before the shutdown timeout; aborting");
            handle.abort();
        }
    }
}

#[async_trait]
impl ManagedService for ConnectionListener {
    fn id(&self) -> ServiceId {
        Self::ID
    }

    async fn start(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        self.bind().await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown().await;
        Ok(())
    }
}

impl Capability for ConnectionListener {
    const ID: ServiceId = ServiceId::Listener;
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::network::connection::ConnectionId;

    fn test_config(max_clients: usize) -> NetworkConfig {
        NetworkConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_clients,
            shutdown_timeout: Duration::from_secs(2),
            ..NetworkConfig::default()
        }
    }

    fn attach(
        listener: &ConnectionListener,
        conn: u64,
        capacity: usize,
    ) -> (SlotId, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let slot = listener
            .state
            .slots
            .lock()
            .occupy(|slot| Arc::new(ConnectionHandle::new(ConnectionId(conn), slot, None, tx)))
            .expect("free slot");
        (slot, rx)
    }

    fn envelope(id: u64) -> Envelope {
        Envelope::new(id, json!({"n": id}).as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn new_does_not_bind() {
        let listener = ConnectionListener::new(test_config(4));
        assert!(listener.local_addr().is_none());
        assert_eq!(listener.capacity(), 4);
        assert_eq!(listener.connection_count(), 0);
        assert_eq!(listener.health_state(), HealthState::Starting);
    }

    #[test]
    fn send_to_empty_slot_returns_false() {
        let listener = ConnectionListener::new(test_config(2));
        assert!(!listener.send(SlotId(0), &envelope(1)));
        assert!(!listener.send(SlotId(99), &envelope(1)));
    }

    #[test]
    fn send_queues_serialized_envelope() {
        let listener = ConnectionListener::new(test_config(2));
        let (slot, mut rx) = attach(&listener, 1, 4);

        assert!(listener.send(slot, &envelope(7)));
        let Ok(OutboundFrame::Text(text)) = rx.try_recv() else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"id": 7, "data": {"n": 7}}));
    }

    #[test]
    fn send_to_closed_transport_returns_false() {
        let listener = ConnectionListener::new(test_config(1));
        let (slot, rx) = attach(&listener, 1, 4);
        drop(rx);
        assert!(!listener.send(slot, &envelope(1)));
        // The slot is not assumed free because a send failed.
        assert_eq!(listener.connection_count(), 1);
    }

    #[test]
    fn send_reports_full_channel_as_false() {
        let listener = ConnectionListener::new(test_config(1));
        let (slot, _rx) = attach(&listener, 1, 1);
        assert!(listener.send(slot, &envelope(1)));
        assert!(!listener.send(slot, &envelope(2)));
    }

    #[test]
    fn send_to_filters_and_skips_closed() {
        let listener = ConnectionListener::new(test_config(4));
        let (_a, mut rx_a) = attach(&listener, 1, 4);
        let (_b, mut rx_b) = attach(&listener, 2, 4);
        let (_c, rx_c) = attach(&listener, 3, 4);
        drop(rx_c);

        let sent = listener.send_to(&envelope(5), |handle| handle.id != ConnectionId(2));
        assert_eq!(sent, 1);
        assert!(matches!(rx_a.try_recv(), Ok(OutboundFrame::Text(_))));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn disconnect_frees_slot_and_ignores_empty() {
        let listener = ConnectionListener::new(test_config(2));
        let (slot, _rx) = attach(&listener, 1, 4);
        listener.disconnect(slot);
        assert_eq!(listener.connection_count(), 0);
        listener.disconnect(slot);
        listener.disconnect(SlotId(1));
    }

    #[test]
    fn occupied_slots_in_order() {
        let listener = ConnectionListener::new(test_config(3));
        let _a = attach(&listener, 1, 1);
        let (b, _rx) = attach(&listener, 2, 1);
        let _c = attach(&listener, 3, 1);
        listener.disconnect(b);
        assert_eq!(listener.occupied_slots(), vec![SlotId(0), SlotId(2)]);
    }

    #[tokio::test]
    async fn bind_assigns_port_and_becomes_ready() {
        let listener = ConnectionListener::new(test_config(2));
        let addr = listener.bind().await.expect("bind");
        assert_ne!(addr.port(), 0);
        assert_eq!(listener.local_addr(), Some(addr));
        assert_eq!(listener.health_state(), HealthState::Ready);

        listener.shutdown().await;
        assert_eq!(listener.health_state(), HealthState::Stopped);
        assert!(listener.local_addr().is_none());
    }

    #[tokio::test]
    async fn second_bind_is_rejected() {
        let listener = ConnectionListener::new(test_config(1));
        listener.bind().await.expect("bind");
        assert!(matches!(
            listener.bind().await,
            Err(ListenerError::AlreadyStarted)
        ));
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let listener = ConnectionListener::new(NetworkConfig {
            port: taken.local_addr().unwrap().port(),
            ..test_config(1)
        });
        assert!(matches!(
            listener.bind().await,
            Err(ListenerError::Bind { .. })
        ));
    }

    #[tokio::test]
    async fn bind_can_be_retried_after_failure() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let listener = ConnectionListener::new(NetworkConfig {
            port,
            ..test_config(1)
        });
        assert!(matches!(
            listener.bind().await,
            Err(ListenerError::Bind { .. })
        ));
        assert_eq!(listener.health_state(), HealthState::Starting);

        drop(taken);
        let addr = listener.bind().await.expect("retry binds");
        assert_eq!(addr.port(), port);
        assert_eq!(listener.health_state(), HealthState::Ready);

        listener.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_without_start_is_noop() {
        let listener = ConnectionListener::new(test_config(1));
        listener.shutdown().await;
        assert_eq!(listener.health_state(), HealthState::Starting);
    }
}
