//! Service orchestration: dependency validation, ordered start, and reverse
//! ordered stop on a termination signal.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::registry::{ServiceContext, ServiceId, ServiceRegistry, ServiceSet};

/// Default upper bound for each service's `stop()`.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised before or while starting services.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("service `{service}` depends on `{dependency}`, which was not supplied")]
    MissingDependency {
        service: ServiceId,
        dependency: ServiceId,
    },
    #[error("service `{0}` was supplied more than once")]
    DuplicateService(ServiceId),
    #[error("service `{service}` failed to start: {source}")]
    StartFailed {
        service: ServiceId,
        #[source]
        source: anyhow::Error,
    },
}

// ---------------------------------------------------------------------------
// ShutdownHandle
// ---------------------------------------------------------------------------

/// Lets any service ask the orchestrator to stop everything.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests an orchestrated shutdown. Repeated calls are harmless.
    pub fn request(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `request()` has been called, immediately if it
    /// already was.
    pub fn requested(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            // The sender lives as long as any handle, including ours.
            let _ = rx.wait_for(|requested| *requested).await;
        }
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Starts a set of services in order and stops them in reverse.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    stop_timeout: Duration,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_TIMEOUT)
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(stop_timeout: Duration) -> Self {
        Self { stop_timeout }
    }

    /// Validates `services` and starts them in supply order.
    ///
    /// Nothing is started unless every declared dependency is present and
    /// every capability id is unique. If a start hook fails, the services
    /// already started are stopped in reverse order before returning.
    ///
    /// # Errors
    ///
    /// `DuplicateService` and `MissingDependency` before any start hook runs;
    /// `StartFailed` if a start hook returns an error.
    pub async fn bootstrap(&self, services: ServiceSet) -> Result<RunningServices, BootstrapError> {
        let registry = Arc::new(ServiceRegistry::build(services)?);
        validate_dependencies(&registry)?;

        let shutdown = ShutdownHandle::new();
        let ctx = ServiceContext {
            registry: Arc::clone(&registry),
            shutdown: shutdown.clone(),
        };

        let mut running = RunningServices {
            registry: Arc::clone(&registry),
            shutdown,
            started: Vec::with_capacity(registry.len()),
            stop_timeout: self.stop_timeout,
        };

        for service in registry.services() {
            let id = service.id();
            info!(service = %id, "starting service");
            if let Err(source) = service.start(&ctx).await {
                error!(service = %id, error = %source, "service failed to start");
                running.stop_started().await;
                return Err(BootstrapError::StartFailed {
                    service: id,
                    source,
                });
            }
            running.started.push(id);
        }

        info!(services = running.started.len(), "all services started");
        Ok(running)
    }

    /// Bootstraps `services`, waits for the process termination signal or a
    /// shutdown request, then stops everything.
    ///
    /// # Errors
    ///
    /// Propagates any `BootstrapError`.
    pub async fn run(&self, services: ServiceSet) -> Result<(), BootstrapError> {
        let running = self.bootstrap(services).await?;
        running.run_until(termination_signal()).await;
        Ok(())
    }
}

fn validate_dependencies(registry: &ServiceRegistry) -> Result<(), BootstrapError> {
    for service in registry.services() {
        for &dependency in service.depends() {
            if !registry.contains(dependency) {
                return Err(BootstrapError::MissingDependency {
                    service: service.id(),
                    dependency,
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// RunningServices
// ---------------------------------------------------------------------------

/// Started services awaiting shutdown.
#[derive(Debug)]
pub struct RunningServices {
    registry: Arc<ServiceRegistry>,
    shutdown: ShutdownHandle,
    started: Vec<ServiceId>,
    stop_timeout: Duration,
}

impl RunningServices {
    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Started capability ids, in start order.
    #[must_use]
    pub fn started(&self) -> &[ServiceId] {
        &self.started
    }

    /// Waits for `signal` or a shutdown request, then stops every service.
    pub async fn run_until(self, signal: impl Future<Output = ()>) {
        tokio::select! {
            () = signal => info!("termination signal received"),
            () = self.shutdown.requested() => info!("shutdown requested by a service"),
        }
        self.stop_all().await;
    }

    /// Stops every started service in reverse start order.
    pub async fn stop_all(mut self) {
        self.stop_started().await;
    }

    /// Each stop hook runs at most once: ids are drained as they are stopped.
    /// A failed or timed-out stop is logged and the sequence continues.
    async fn stop_started(&mut self) {
        self.shutdown.request();

        while let Some(id) = self.started.pop() {
            let Some(service) = self.registry.get_by_id(id) else {
                continue;
            };
            info!(service = %id, "stopping service");
            match tokio::time::timeout(self.stop_timeout, service.stop()).await {
                Ok(Ok(())) => info!(service = %id, "service stopped"),
                Ok(Err(err)) => error!(service = %id, error = %err, "service failed to stop"),
                Err(_) => warn!(
                    service = %id,
                    timeout_ms = u64::try_from(self.stop_timeout.as_millis()).unwrap_or(u64::MAX),
                    "service stop timed out"
                ),
            }
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
///
/// If a handler cannot be installed the failure is logged and that signal
/// is never reported.
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}
