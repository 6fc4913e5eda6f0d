//! HTTP and WebSocket handlers for the listener's router.
//!
//! Defines `AppState` (the shared state carried through axum extractors)
//! and re-exports the handler functions used when building the router.

pub mod health;
pub mod websocket;

pub(crate) use health::{health_handler, liveness_handler, readiness_handler};
pub(crate) use websocket::ws_upgrade_handler;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use super::session::{SessionEvent, SessionState};
use super::NetworkConfig;

/// Shared state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references and a channel sender so cloning is cheap.
#[derive(Clone)]
pub(crate) struct AppState {
    /// Slot table, receive callback, and shutdown controller.
    pub(crate) sessions: Arc<SessionState>,
    /// Feeds upgraded sockets into the session event loop.
    pub(crate) events: mpsc::Sender<SessionEvent>,
    /// Network configuration (bind address, per-connection limits).
    pub(crate) config: Arc<NetworkConfig>,
    /// Listener start time, used for uptime calculation.
    pub(crate) start_time: Instant,
}
