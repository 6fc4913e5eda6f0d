//! Connection handles for occupied slots.
//!
//! Each connection gets a bounded mpsc channel for backpressure. The
//! receiver end is owned by the connection's socket pump; the handle stored
//! in the slot table holds the sender end.

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::sync::mpsc;

use super::slots::SlotId;

/// Process-unique identifier for a connection.
///
/// Unlike `SlotId`, never reused, so events from a connection that has
/// already given up its slot can be told apart from the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Frame queued for delivery to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A serialized envelope, sent as a WebSocket text frame.
    Text(String),
    /// A close frame with an optional reason. The pump exits after sending it.
    Close(Option<String>),
}

/// Error returned when a frame cannot be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The outbound channel is full.
    #[error("outbound channel is full")]
    Full,
    /// The socket pump has exited; the receiver was dropped.
    #[error("connection is closed")]
    Disconnected,
}

/// Handle to a single live connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// Slot this connection occupies.
    pub slot: SlotId,
    /// Peer address reported by the transport.
    pub remote_addr: Option<SocketAddr>,
    /// When this connection was admitted.
    pub connected_at: Instant,
    tx: mpsc::Sender<OutboundFrame>,
}

impl ConnectionHandle {
    /// Wraps the sender end of a connection's outbound channel.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        slot: SlotId,
        remote_addr: Option<SocketAddr>,
        tx: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        Self {
            id,
            slot,
            remote_addr,
            connected_at: Instant::now(),
            tx,
        }
    }

    /// Queues a frame without blocking.
    ///
    /// # Errors
    ///
    /// Returns `SendError::Full` if the outbound channel is at capacity and
    /// `SendError::Disconnected` if the socket pump has exited.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Disconnected,
        })
    }

    /// Queues a close frame. Errors are ignored: a connection whose pump is
    /// already gone is closed anyway.
    pub fn close(&self, reason: Option<&str>) {
        let _ = self.try_send(OutboundFrame::Close(reason.map(str::to_string)));
    }

    /// Whether the transport is still open.
    ///
    /// Returns `false` once the socket pump has exited and dropped the
    /// receiver end of the channel.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}
