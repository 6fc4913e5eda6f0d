//! Command-line and environment configuration.
//!
//! `ServerArgs` is the clap surface; `ServerConfig` is the validated, typed
//! form handed to the services.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::network::{ConnectionConfig, NetworkConfig};

/// Largest accepted `max_clients`. The slot table is allocated up front.
pub const MAX_CLIENT_SLOTS: usize = 65_536;

/// Errors raised while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_clients must be greater than zero")]
    NoClientSlots,
    #[error("max_clients ({requested}) exceeds the limit of {limit}")]
    TooManySlots { requested: usize, limit: usize },
    #[error("database pool_max must be greater than zero")]
    EmptyPool,
    #[error("database pool_min ({min}) exceeds pool_max ({max})")]
    PoolBounds { min: u32, max: u32 },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Hearth game server.
#[derive(Debug, Clone, Parser)]
#[command(name = "hearth-server", version, about)]
pub struct ServerArgs {
    /// Address to bind the WebSocket listener to.
    #[arg(long, env = "HEARTH_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on. 0 picks a free port.
    #[arg(long, env = "HEARTH_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Number of connection slots.
    #[arg(long, env = "HEARTH_MAX_CLIENTS", default_value_t = 100)]
    pub max_clients: usize,

    /// Seconds to wait for connections and services to stop.
    #[arg(long, env = "HEARTH_SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    #[arg(long, env = "DB_HOST", default_value = "127.0.0.1")]
    pub db_host: String,

    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long, env = "DB_USER", default_value = "")]
    pub db_user: String,

    #[arg(long, env = "DB_PASS", default_value = "", hide_env_values = true)]
    pub db_pass: String,

    #[arg(long, env = "DB_NAME", default_value = "")]
    pub db_name: String,

    #[arg(long, env = "DB_SCHEMA", default_value = "public")]
    pub db_schema: String,

    #[arg(long, env = "DB_POOL_MIN", default_value_t = 1)]
    pub db_pool_min: u32,

    #[arg(long, env = "DB_POOL_MAX", default_value_t = 10)]
    pub db_pool_max: u32,

    /// Log output format.
    #[arg(long, env = "HEARTH_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "HEARTH_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

/// Relational datastore connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct DatastoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub schema: String,
    pub pool_min: u32,
    pub pool_max: u32,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            schema: "public".to_string(),
            pool_min: 1,
            pool_max: 10,
        }
    }
}

impl fmt::Debug for DatastoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatastoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("pool_min", &self.pool_min)
            .field("pool_max", &self.pool_max)
            .finish()
    }
}

/// Telemetry settings.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
    pub metrics_addr: Option<SocketAddr>,
}

/// Validated server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub datastore: DatastoreConfig,
    pub telemetry: TelemetryConfig,
}

impl ServerConfig {
    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_clients == 0 {
            return Err(ConfigError::NoClientSlots);
        }
        if self.network.max_clients > MAX_CLIENT_SLOTS {
            return Err(ConfigError::TooManySlots {
                requested: self.network.max_clients,
                limit: MAX_CLIENT_SLOTS,
            });
        }
        if self.datastore.pool_max == 0 {
            return Err(ConfigError::EmptyPool);
        }
        if self.datastore.pool_min > self.datastore.pool_max {
            return Err(ConfigError::PoolBounds {
                min: self.datastore.pool_min,
                max: self.datastore.pool_max,
            });
        }
        Ok(())
    }
}

impl TryFrom<ServerArgs> for ServerConfig {
    type Error = ConfigError;

    fn try_from(args: ServerArgs) -> Result<Self, Self::Error> {
        let config = Self {
            network: NetworkConfig {
                host: args.host,
                port: args.port,
                max_clients: args.max_clients,
                connection: ConnectionConfig::default(),
                shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
                ..NetworkConfig::default()
            },
            datastore: DatastoreConfig {
                host: args.db_host,
                port: args.db_port,
                user: args.db_user,
                password: args.db_pass,
                database: args.db_name,
                schema: args.db_schema,
                pool_min: args.db_pool_min,
                pool_max: args.db_pool_max,
            },
            telemetry: TelemetryConfig {
                log_format: args.log_format,
                metrics_addr: args.metrics_addr,
            },
        };
        config.validate()?;
        Ok(config)
    }
}
