//! WebSocket listener: slot table, connection handles, session event loop,
//! HTTP probes, and shutdown control.

pub mod config;
pub mod connection;
pub mod handlers;
pub mod listener;
pub mod middleware;
pub(crate) mod session;
pub mod shutdown;
pub mod slots;

pub use config::{ConnectionConfig, NetworkConfig};
pub use connection::{ConnectionHandle, ConnectionId, OutboundFrame, SendError};
pub use listener::{ConnectionListener, ListenerError};
pub use shutdown::{HealthState, ShutdownController, TaskGuard};
pub use slots::{SlotId, SlotTable};
