//! Relational datastore capability.
//!
//! With the `postgres` feature, `start()` builds a lazily connecting
//! `sqlx::PgPool`; no connection is attempted until a handler issues a query.
//! Without the feature the service starts disabled and `pool()` is always
//! `None`, which handlers treat like an absent capability.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use super::config::DatastoreConfig;
use super::registry::{Capability, ManagedService, ServiceContext, ServiceId};

#[cfg(feature = "postgres")]
pub use sqlx::PgPool;

/// Placeholder pool type for builds without database support.
#[cfg(not(feature = "postgres"))]
#[derive(Debug, Clone)]
pub struct PgPool(());

pub struct Datastore {
    config: DatastoreConfig,
    pool: RwLock<Option<PgPool>>,
}

impl Datastore {
    #[must_use]
    pub fn new(config: DatastoreConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    /// The connection pool, once started with database support.
    #[must_use]
    pub fn pool(&self) -> Option<PgPool> {
        self.pool.read().clone()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.pool.read().is_some()
    }
}

#[cfg(feature = "postgres")]
fn connect_lazy(config: &DatastoreConfig) -> PgPool {
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database)
        .options([("search_path", config.schema.as_str())]);

    PgPoolOptions::new()
        .min_connections(config.pool_min)
        .max_connections(config.pool_max)
        .connect_lazy_with(options)
}

#[async_trait]
impl ManagedService for Datastore {
    fn id(&self) -> ServiceId {
        Self::ID
    }

    async fn start(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        #[cfg(feature = "postgres")]
        {
            *self.pool.write() = Some(connect_lazy(&self.config));
            info!(
                host = %self.config.host,
                port = self.config.port,
                database = %self.config.database,
                schema = %self.config.schema,
                "datastore pool configured"
            );
        }
        #[cfg(not(feature = "postgres"))]
        info!("datastore disabled: built without postgres support");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let pool = self.pool.write().take();
        #[cfg(feature = "postgres")]
        if let Some(pool) = pool {
            pool.close().await;
            info!("datastore pool closed");
        }
        #[cfg(not(feature = "postgres"))]
        drop(pool);
        Ok(())
    }
}

impl Capability for Datastore {
    const ID: ServiceId = ServiceId::Datastore;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::service::bootstrap::ShutdownHandle;
    use crate::service::registry::{ServiceRegistry, ServiceSet};

    fn ctx() -> ServiceContext {
        ServiceContext {
            registry: Arc::new(ServiceRegistry::build(ServiceSet::new()).unwrap()),
            shutdown: ShutdownHandle::new(),
        }
    }

    #[test]
    fn new_keeps_config_and_has_no_pool() {
        let store = Datastore::new(DatastoreConfig {
            database: "hearth".to_string(),
            ..DatastoreConfig::default()
        });
        assert_eq!(store.config().database, "hearth");
        assert!(store.pool().is_none());
        assert!(!store.is_enabled());
    }

    #[tokio::test]
    async fn start_and_stop_without_a_reachable_database() {
        let store = Datastore::new(DatastoreConfig::default());
        store.start(&ctx()).await.unwrap();
        assert_eq!(store.is_enabled(), cfg!(feature = "postgres"));

        store.stop().await.unwrap();
        assert!(store.pool().is_none());
    }

    #[test]
    fn registered_under_datastore_id() {
        let registry = ServiceRegistry::build(
            ServiceSet::new().with(Datastore::new(DatastoreConfig::default())),
        )
        .unwrap();
        assert!(registry.get::<Datastore>().is_some());
    }
}
