use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::bootstrap::{BootstrapError, ShutdownHandle};

// ---------------------------------------------------------------------------
// ServiceId
// ---------------------------------------------------------------------------

/// Capability identifiers. Every service registers under exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceId {
    Datastore,
    Listener,
    Dispatcher,
}

impl ServiceId {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Datastore => "datastore",
            Self::Listener => "listener",
            Self::Dispatcher => "dispatcher",
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// ServiceContext
// ---------------------------------------------------------------------------

/// Context provided to services when they start.
#[derive(Clone)]
pub struct ServiceContext {
    pub registry: Arc<ServiceRegistry>,
    pub shutdown: ShutdownHandle,
}

// ---------------------------------------------------------------------------
// ManagedService / Capability
// ---------------------------------------------------------------------------

/// Lifecycle-managed service. All services run by the orchestrator implement
/// this.
///
/// Services are started in the order they were supplied and stopped in the
/// reverse order. Both hooks default to doing nothing.
#[async_trait]
pub trait ManagedService: Send + Sync + Any {
    /// Capability this service registers under.
    fn id(&self) -> ServiceId;

    /// Capabilities that must be present among the supplied services.
    fn depends(&self) -> &'static [ServiceId] {
        &[]
    }

    async fn start(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ties a concrete service type to its capability id, enabling typed lookup
/// with `ServiceRegistry::get::<T>()`.
pub trait Capability: ManagedService + Sized {
    const ID: ServiceId;
}

// ---------------------------------------------------------------------------
// ServiceSet
// ---------------------------------------------------------------------------

struct Entry {
    service: Arc<dyn ManagedService>,
    any: Arc<dyn Any + Send + Sync>,
}

impl Entry {
    fn new<T: ManagedService>(service: Arc<T>) -> Self {
        Self {
            service: Arc::clone(&service) as Arc<dyn ManagedService>,
            any: service,
        }
    }
}

/// Ordered list of services handed to the orchestrator.
#[derive(Default)]
pub struct ServiceSet {
    entries: Vec<Entry>,
}

impl ServiceSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a service.
    #[must_use]
    pub fn with<T: ManagedService>(self, service: T) -> Self {
        self.with_shared(Arc::new(service))
    }

    /// Appends a service the caller keeps a handle to.
    #[must_use]
    pub fn with_shared<T: ManagedService>(mut self, service: Arc<T>) -> Self {
        self.entries.push(Entry::new(service));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capability ids in supply order.
    #[must_use]
    pub fn ids(&self) -> Vec<ServiceId> {
        self.entries.iter().map(|e| e.service.id()).collect()
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Immutable mapping from capability id to service instance.
///
/// Built once from the full service list; there is no later registration.
/// Lookups return `None` for absent capabilities and never panic.
pub struct ServiceRegistry {
    entries: Vec<Entry>,
    index: HashMap<ServiceId, usize>,
}

impl ServiceRegistry {
    /// Builds the registry from `services`, keeping supply order.
    ///
    /// # Errors
    ///
    /// Returns `BootstrapError::DuplicateService` if two services share a
    /// capability id.
    pub fn build(services: ServiceSet) -> Result<Self, BootstrapError> {
        let mut index = HashMap::with_capacity(services.entries.len());
        for (pos, entry) in services.entries.iter().enumerate() {
            let id = entry.service.id();
            if index.insert(id, pos).is_some() {
                return Err(BootstrapError::DuplicateService(id));
            }
        }
        Ok(Self {
            entries: services.entries,
            index,
        })
    }

    /// Retrieve a service by its concrete type.
    #[must_use]
    pub fn get<T: Capability>(&self) -> Option<Arc<T>> {
        let pos = *self.index.get(&T::ID)?;
        Arc::clone(&self.entries[pos].any).downcast::<T>().ok()
    }

    /// Retrieve a service by capability id.
    #[must_use]
    pub fn get_by_id(&self, id: ServiceId) -> Option<Arc<dyn ManagedService>> {
        let pos = *self.index.get(&id)?;
        Some(Arc::clone(&self.entries[pos].service))
    }

    #[must_use]
    pub fn contains(&self, id: ServiceId) -> bool {
        self.index.contains_key(&id)
    }

    /// Capability ids in supply order.
    #[must_use]
    pub fn ids(&self) -> Vec<ServiceId> {
        self.entries.iter().map(|e| e.service.id()).collect()
    }

    /// Services in supply order.
    pub fn services(&self) -> impl Iterator<Item = &Arc<dyn ManagedService>> + '_ {
        self.entries.iter().map(|e| &e.service)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.ids())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
