//! `Hearth` Server: WebSocket session listener, packet dispatch, and service
//! orchestration.

pub mod dispatch;
pub mod network;
pub mod service;
pub mod telemetry;

pub use dispatch::{DispatchOutcome, DispatchTable, MessageDispatcher, Packet, PacketHandler};
pub use network::{ConnectionListener, NetworkConfig, SlotId};
pub use service::{
    BootstrapError, Capability, Datastore, ManagedService, Orchestrator, RunningServices,
    ServerArgs, ServerConfig, ServiceContext, ServiceId, ServiceRegistry, ServiceSet,
    ShutdownHandle,
};

/// The standard service set: datastore, listener, then dispatcher.
#[must_use]
pub fn standard_services(config: &ServerConfig) -> ServiceSet {
    ServiceSet::new()
        .with(Datastore::new(config.datastore.clone()))
        .with(ConnectionListener::new(config.network.clone()))
        .with(MessageDispatcher::new(DispatchTable::standard()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_services_in_start_order() {
        let services = standard_services(&ServerConfig::default());
        assert_eq!(
            services.ids(),
            vec![ServiceId::Datastore, ServiceId::Listener, ServiceId::Dispatcher]
        );
    }
}
