//! WebSocket upgrade handler.

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::AppState;
use crate::network::session::SessionEvent;
use crate::network::HealthState;

/// Upgrades an HTTP connection to a WebSocket session.
///
/// The upgraded socket is handed to the session event loop, which decides
/// whether a slot is free. Upgrades are refused with 503 once the listener
/// is draining.
pub(crate) async fn ws_upgrade_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.sessions.shutdown.health_state() != HealthState::Ready {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let limits = &state.config.connection;
    let events = state.events.clone();

    ws.write_buffer_size(limits.ws_write_buffer_size)
        .max_write_buffer_size(limits.ws_max_write_buffer_size)
        .max_frame_size(limits.max_frame_size)
        .max_message_size(limits.max_message_size)
        .on_upgrade(move |socket| async move {
            if events
                .send(SessionEvent::Opened { socket, remote })
                .await
                .is_err()
            {
                debug!(%remote, "session event loop has stopped; dropping socket");
            }
        })
}
