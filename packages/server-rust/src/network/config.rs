//! Listener configuration.

use std::time::Duration;

/// Settings for `ConnectionListener`.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    /// 0 lets the OS pick a free port; see `ConnectionListener::local_addr`.
    pub port: u16,
    /// Slot count. Fixed for the listener's lifetime.
    pub max_clients: usize,
    pub connection: ConnectionConfig,
    /// Bound on socket events queued for the session event loop.
    pub event_channel_capacity: usize,
    /// Applies to plain HTTP exchanges and upgrade handshakes, not to
    /// upgraded sessions.
    pub request_timeout: Duration,
    /// How long `stop()` waits for sockets and tasks to wind down.
    pub shutdown_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_clients: 100,
            connection: ConnectionConfig::default(),
            event_channel_capacity: 1024,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-session buffers and frame limits.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Frames queued per session before `send` starts reporting failure.
    pub outbound_channel_capacity: usize,
    pub ws_write_buffer_size: usize,
    pub ws_max_write_buffer_size: usize,
    /// Largest inbound frame, in bytes.
    pub max_frame_size: usize,
    /// Largest inbound message after reassembly, in bytes.
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            ws_write_buffer_size: 128 * 1024,
            ws_max_write_buffer_size: 512 * 1024,
            max_frame_size: 64 * 1024,
            max_message_size: 256 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_clients, 100);
        assert_eq!(config.event_channel_capacity, 1024);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn frame_limits_fit_inside_message_limit() {
        let config = ConnectionConfig::default();
        assert_eq!(config.outbound_channel_capacity, 256);
        assert!(config.max_frame_size <= config.max_message_size);
        assert!(config.ws_write_buffer_size <= config.ws_max_write_buffer_size);
    }
}
