//! Tower layers wrapping the listener's HTTP surface.
//!
//! Only the upgrade handshake and the health probes pass through these
//! layers. Once a socket is upgraded its frames never touch them.

use axum::http::header::HeaderName;
use axum::http::StatusCode;
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

type TraceHttp = TraceLayer<SharedClassifier<ServerErrorsAsFailures>>;

/// Layer stack returned by [`build_http_layers`], innermost type last.
pub type HttpLayers = Stack<
    PropagateRequestIdLayer,
    Stack<TimeoutLayer, Stack<TraceHttp, Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>>>,
>;

/// Wraps handshakes and probes so each one gets a correlation id that shows
/// up in its trace span and in the response headers.
///
/// A client-supplied `x-request-id` is kept as is. A handshake that stalls
/// past `request_timeout` is answered with 408 and never reaches the slot
/// table.
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let header = HeaderName::from_static(REQUEST_ID_HEADER);
    let stalled =
        TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, config.request_timeout);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(header.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(stalled)
        .layer(PropagateRequestIdLayer::new(header))
        .into_inner()
}
