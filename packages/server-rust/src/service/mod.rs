//! Service lifecycle: capability registry, orchestrator, configuration, and
//! the datastore capability.

pub mod bootstrap;
pub mod config;
pub mod datastore;
pub mod registry;

pub use bootstrap::{
    termination_signal, BootstrapError, Orchestrator, RunningServices, ShutdownHandle,
};
pub use config::{
    ConfigError, DatastoreConfig, LogFormat, ServerArgs, ServerConfig, MAX_CLIENT_SLOTS,
};
pub use datastore::Datastore;
pub use registry::{
    Capability, ManagedService, ServiceContext, ServiceId, ServiceRegistry, ServiceSet,
};
