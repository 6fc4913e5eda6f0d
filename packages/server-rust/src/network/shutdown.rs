//! Listener shutdown: health state, a broadcast stop signal, and a count of
//! live tasks that `stop()` waits on.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Notify};

/// Listener health.
///
/// Moves one way only: Starting -> Ready -> Draining -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Constructed, not yet bound.
    Starting,
    /// Accepting sessions.
    Ready,
    /// Closing sessions; upgrades get 503.
    Draining,
    /// Every tracked task has exited.
    Stopped,
}

impl HealthState {
    /// Lowercase name used in the health endpoint body.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Default)]
struct TaskCount {
    live: AtomicU64,
    idle: Notify,
}

/// Coordinates listener teardown.
///
/// Health probes and the upgrade handler read `health_state()`. Long-lived
/// tasks hold a `TaskGuard` and select on `shutdown_signal()`.
#[derive(Debug)]
pub struct ShutdownController {
    stop_tx: watch::Sender<bool>,
    tasks: Arc<TaskCount>,
    state: ArcSwap<HealthState>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            stop_tx,
            tasks: Arc::default(),
            state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(HealthState::Ready));
    }

    /// Moves to `Draining` and wakes every `shutdown_signal()` future.
    pub fn trigger_shutdown(&self) {
        self.state.store(Arc::new(HealthState::Draining));
        self.stop_tx.send_replace(true);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Resolves once `trigger_shutdown()` has been called, immediately if it
    /// already was.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut stop_rx = self.stop_tx.subscribe();
        async move {
            // Err only if the controller is gone, which also means stop.
            let _ = stop_rx.wait_for(|stopping| *stopping).await;
        }
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.state.load()
    }

    /// Counts a task as live until the returned guard is dropped.
    #[must_use]
    pub fn task_guard(&self) -> TaskGuard {
        self.tasks.live.fetch_add(1, Ordering::AcqRel);
        TaskGuard {
            tasks: Arc::clone(&self.tasks),
        }
    }

    #[must_use]
    pub fn active_tasks(&self) -> u64 {
        self.tasks.live.load(Ordering::Acquire)
    }

    /// Waits up to `timeout` for every guard to drop.
    ///
    /// On success the state becomes `Stopped` and `true` is returned. On
    /// timeout the state is left as it was.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            loop {
                let idle = self.tasks.idle.notified();
                tokio::pin!(idle);
                // Register before checking so a drop in between is not missed.
                idle.as_mut().enable();
                if self.active_tasks() == 0 {
                    return;
                }
                idle.await;
            }
        })
        .await
        .is_ok();

        if drained {
            self.state.store(Arc::new(HealthState::Stopped));
        }
        drained
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one task as live. Dropping it, including during unwinding, marks
/// the task as exited.
#[derive(Debug)]
pub struct TaskGuard {
    tasks: Arc<TaskCount>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.tasks.live.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tasks.idle.notify_waiters();
        }
    }
}
