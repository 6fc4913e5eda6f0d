//! Session engine: the single event loop that owns slot admission, frame
//! decoding, and slot release, plus the per-connection socket pumps.
//!
//! Socket pumps never touch the slot table. They only move bytes between the
//! WebSocket and the connection's outbound channel, and report inbound frames
//! and closure to the event loop over one FIFO channel. Frames from a single
//! connection therefore reach the receive callback in arrival order.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use hearth_core::{decode_frame, Envelope};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::ConnectionConfig;
use super::connection::{ConnectionHandle, ConnectionId, OutboundFrame};
use super::shutdown::{ShutdownController, TaskGuard};
use super::slots::{SlotId, SlotTable};
use crate::telemetry::metric_names;

/// Callback receiving every well-formed inbound envelope.
pub struct InboundCallback(Box<dyn Fn(SlotId, Envelope) + Send + Sync>);

impl InboundCallback {
    pub fn new(f: impl Fn(SlotId, Envelope) + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }
}

/// Events reported to the event loop.
pub(crate) enum SessionEvent {
    /// A WebSocket handshake completed and awaits a slot.
    Opened { socket: WebSocket, remote: SocketAddr },
    /// Raw payload of a text or binary frame.
    Frame {
        slot: SlotId,
        conn: ConnectionId,
        raw: Bytes,
    },
    /// The transport closed or errored.
    Closed { slot: SlotId, conn: ConnectionId },
}

/// Why a connection was not given a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    Full { capacity: usize },
    ShuttingDown,
}

/// State shared by the event loop, the HTTP handlers, and the listener API.
pub(crate) struct SessionState {
    pub(crate) slots: Mutex<SlotTable<Arc<ConnectionHandle>>>,
    pub(crate) receiver: ArcSwapOption<InboundCallback>,
    pub(crate) shutdown: ShutdownController,
    next_conn_id: AtomicU64,
}

impl SessionState {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(SlotTable::with_capacity(capacity)),
            receiver: ArcSwapOption::empty(),
            shutdown: ShutdownController::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn connection(&self, slot: SlotId) -> Option<Arc<ConnectionHandle>> {
        self.slots.lock().get(slot).cloned()
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.slots.lock().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.lock().capacity()
    }

    /// Places a new connection in the first free slot.
    ///
    /// The shutdown flag is read under the slots lock, so an admission
    /// either lands before `close_all` drains the table or is refused.
    /// Returns the slot and the occupied count after admission.
    fn claim_slot(
        &self,
        conn: ConnectionId,
        remote: Option<SocketAddr>,
        tx: mpsc::Sender<OutboundFrame>,
    ) -> Result<(SlotId, usize), Refusal> {
        let mut slots = self.slots.lock();
        if self.shutdown.is_shutting_down() {
            return Err(Refusal::ShuttingDown);
        }
        let slot = slots
            .occupy(|slot| Arc::new(ConnectionHandle::new(conn, slot, remote, tx)))
            .ok_or(Refusal::Full {
                capacity: slots.capacity(),
            })?;
        Ok((slot, slots.len()))
    }

    /// Assigns the first free slot to a fresh socket, or rejects it.
    fn admit(
        &self,
        socket: WebSocket,
        remote: SocketAddr,
        config: &ConnectionConfig,
        events: &mpsc::Sender<SessionEvent>,
    ) {
        let conn = ConnectionId(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(config.outbound_channel_capacity);

        let (slot, occupied) = match self.claim_slot(conn, Some(remote), tx) {
            Ok(admitted) => admitted,
            Err(Refusal::Full { capacity }) => {
                warn!(%remote, capacity, "connection rejected: server is full");
                metrics::counter!(metric_names::CONNECTIONS_REJECTED).increment(1);
                tokio::spawn(reject(socket, close_code::AGAIN, "server is full"));
                return;
            }
            Err(Refusal::ShuttingDown) => {
                debug!(%remote, "connection rejected: server shutting down");
                tokio::spawn(reject(socket, close_code::AWAY, "server shutting down"));
                return;
            }
        };

        info!(%slot, %remote, conn = conn.0, "client connected");
        metrics::counter!(metric_names::CONNECTIONS_ACCEPTED).increment(1);
        record_active(occupied);

        tokio::spawn(run_connection(
            socket,
            slot,
            conn,
            rx,
            events.clone(),
            self.shutdown.task_guard(),
        ));
    }

    /// Validates a raw frame and forwards it to the receive callback.
    ///
    /// Malformed frames are logged and dropped; the connection stays open.
    fn handle_frame(&self, slot: SlotId, conn: ConnectionId, raw: &[u8]) {
        let current = self
            .slots
            .lock()
            .get(slot)
            .is_some_and(|handle| handle.id == conn);
        if !current {
            debug!(%slot, conn = conn.0, "frame from a released connection ignored");
            return;
        }

        let envelope = match decode_frame(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%slot, reason = err.label(), error = %err, "malformed frame dropped");
                metrics::counter!(metric_names::FRAMES_DROPPED, "reason" => err.label())
                    .increment(1);
                return;
            }
        };

        if let Some(callback) = self.receiver.load_full() {
            (callback.0)(slot, envelope);
        }
    }

    /// Frees `slot` if `conn` still owns it.
    fn release(&self, slot: SlotId, conn: ConnectionId) {
        let (released, occupied) = {
            let mut slots = self.slots.lock();
            let released = slots.release_if(slot, |handle| handle.id == conn);
            (released, slots.len())
        };
        if released.is_some() {
            info!(%slot, conn = conn.0, "client disconnected");
            record_active(occupied);
        }
    }

    /// Frees `slot` regardless of occupant, closing its transport.
    pub(crate) fn disconnect(&self, slot: SlotId) -> bool {
        let (released, occupied) = {
            let mut slots = self.slots.lock();
            let released = slots.release(slot);
            (released, slots.len())
        };
        let Some(handle) = released else {
            return false;
        };
        handle.close(None);
        info!(%slot, conn = handle.id.0, "client disconnected");
        record_active(occupied);
        true
    }

    /// Closes every connection and empties the table. Returns how many
    /// connections were closed.
    pub(crate) fn close_all(&self, reason: &str) -> usize {
        let handles = self.slots.lock().drain();
        for handle in &handles {
            handle.close(Some(reason));
        }
        record_active(0);
        handles.len()
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_active(occupied: usize) {
    metrics::gauge!(metric_names::ACTIVE_CONNECTIONS).set(occupied as f64);
}

/// Runs until the listener shuts down, applying every socket event in order.
pub(crate) async fn run_event_loop(
    state: Arc<SessionState>,
    config: ConnectionConfig,
    events_tx: mpsc::Sender<SessionEvent>,
    mut events: mpsc::Receiver<SessionEvent>,
) {
    let _guard = state.shutdown.task_guard();
    let shutdown = state.shutdown.shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            () = &mut shutdown => break,
            event = events.recv() => match event {
                Some(SessionEvent::Opened { socket, remote }) => {
                    state.admit(socket, remote, &config, &events_tx);
                }
                Some(SessionEvent::Frame { slot, conn, raw }) => {
                    state.handle_frame(slot, conn, &raw);
                }
                Some(SessionEvent::Closed { slot, conn }) => state.release(slot, conn),
                None => break,
            },
        }
    }

    debug!("session event loop exited");
}

/// Pumps one connection: outbound frames to the socket, inbound frames to
/// the event loop. Reports `Closed` when either side ends.
async fn run_connection(
    socket: WebSocket,
    slot: SlotId,
    conn: ConnectionId,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    events: mpsc::Sender<SessionEvent>,
    _guard: TaskGuard,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Text(text)) => {
                    if let Err(err) = sink.send(Message::Text(text.into())).await {
                        debug!(%slot, error = %err, "socket write failed");
                        break;
                    }
                }
                Some(OutboundFrame::Close(reason)) => {
                    let _ = sink.send(close_message(close_code::NORMAL, reason)).await;
                    break;
                }
                None => {
                    let _ = sink.send(close_message(close_code::NORMAL, None)).await;
                    break;
                }
            },
            inbound = stream.next() => {
                let raw = match inbound {
                    Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                    Some(Ok(Message::Binary(bytes))) => bytes,
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        debug!(%slot, error = %err, "socket read failed");
                        break;
                    }
                };
                if events.send(SessionEvent::Frame { slot, conn, raw }).await.is_err() {
                    break;
                }
            }
        }
    }

    // The event loop may already be gone during shutdown.
    let _ = events.send(SessionEvent::Closed { slot, conn }).await;
}

/// Closes a socket that could not be given a slot.
async fn reject(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(close_message(code, Some(reason.to_string())))
        .await;
}

fn close_message(code: u16, reason: Option<String>) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.unwrap_or_default().into(),
    }))
}
