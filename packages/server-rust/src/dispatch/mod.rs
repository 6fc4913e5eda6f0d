//! Message dispatcher: routes decoded envelopes to packet handlers.

pub mod handlers;
pub mod table;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

pub use table::{DispatchOutcome, DispatchTable, HandlerFactory, Packet, PacketHandler, Route};

use crate::network::ConnectionListener;
use crate::service::registry::{Capability, ManagedService, ServiceContext, ServiceId};

/// Installs itself as the listener's receive callback on start and routes
/// every inbound envelope through its `DispatchTable`.
pub struct MessageDispatcher {
    table: Arc<DispatchTable>,
    listener: Mutex<Option<Arc<ConnectionListener>>>,
}

impl MessageDispatcher {
    #[must_use]
    pub fn new(table: DispatchTable) -> Self {
        Self {
            table: Arc::new(table),
            listener: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn table(&self) -> &DispatchTable {
        &self.table
    }
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new(DispatchTable::standard())
    }
}

#[async_trait]
impl ManagedService for MessageDispatcher {
    fn id(&self) -> ServiceId {
        Self::ID
    }

    fn depends(&self) -> &'static [ServiceId] {
        &[ServiceId::Listener]
    }

    async fn start(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        let Some(listener) = ctx.registry.get::<ConnectionListener>() else {
            warn!("no connection listener registered; dispatcher idle");
            return Ok(());
        };

        let table = Arc::clone(&self.table);
        let registry = Arc::clone(&ctx.registry);
        listener.set_receiver(move |slot, envelope| {
            table.dispatch(&registry, slot, envelope);
        });

        *self.listener.lock() = Some(listener);
        info!(routes = self.table.len(), "dispatcher attached to listener");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        // Dropping the callback also releases its hold on the registry.
        if let Some(listener) = self.listener.lock().take() {
            listener.clear_receiver();
        }
        Ok(())
    }
}

impl Capability for MessageDispatcher {
    const ID: ServiceId = ServiceId::Dispatcher;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkConfig;
    use crate::service::bootstrap::ShutdownHandle;
    use crate::service::registry::{ServiceRegistry, ServiceSet};

    #[test]
    fn default_uses_standard_table() {
        let dispatcher = MessageDispatcher::default();
        assert_eq!(dispatcher.table().len(), DispatchTable::standard().len());
        assert_eq!(dispatcher.depends(), &[ServiceId::Listener]);
    }

    #[tokio::test]
    async fn start_without_listener_is_soft() {
        let ctx = ServiceContext {
            registry: Arc::new(ServiceRegistry::build(ServiceSet::new()).unwrap()),
            shutdown: ShutdownHandle::new(),
        };
        let dispatcher = MessageDispatcher::default();
        dispatcher.start(&ctx).await.unwrap();
        dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_detaches_from_listener() {
        let listener = Arc::new(ConnectionListener::new(NetworkConfig::default()));
        let registry = Arc::new(
            ServiceRegistry::build(ServiceSet::new().with_shared(Arc::clone(&listener))).unwrap(),
        );
        let ctx = ServiceContext {
            registry: Arc::clone(&registry),
            shutdown: ShutdownHandle::new(),
        };

        let dispatcher = MessageDispatcher::default();
        dispatcher.start(&ctx).await.unwrap();
        drop(ctx);
        // Receiver closure holds the registry while attached.
        assert!(Arc::strong_count(&registry) > 1);

        dispatcher.stop().await.unwrap();
        assert_eq!(Arc::strong_count(&registry), 1);
    }
}
