//! Supervisor lifecycle state and shutdown signalling.
//!
//! State lives in an `ArcSwap` so the reload path can read it without
//! locking; connection counting uses an atomic with RAII guards.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Supervisor lifecycle.
///
/// State machine: Uninitialized -> Initializing -> Serving -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Created; nothing bound.
    Uninitialized,
    /// Listener bound and processor built; not yet accepting.
    Initializing,
    /// Accept loop running.
    Serving,
    /// Accept loop ended, cleanly or not. Terminal.
    Stopped,
}

impl SupervisorState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SupervisorState::Uninitialized => "uninitialized",
            SupervisorState::Initializing => "initializing",
            SupervisorState::Serving => "serving",
            SupervisorState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the lifecycle state and the shutdown broadcast for one server.
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    open_connections: Arc<AtomicU64>,
    state: Arc<ArcSwap<SupervisorState>>,
}

impl ShutdownController {
    /// Creates a controller in the `Uninitialized` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            open_connections: Arc::new(AtomicU64::new(0)),
            state: Arc::new(ArcSwap::from_pointee(SupervisorState::Uninitialized)),
        }
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        **self.state.load()
    }

    pub fn set_state(&self, state: SupervisorState) {
        let previous = self.state.swap(Arc::new(state));
        tracing::debug!(from = %previous, to = %state, "supervisor state changed");
    }

    /// Shared view of the state for the server handle.
    #[must_use]
    pub fn state_handle(&self) -> Arc<ArcSwap<SupervisorState>> {
        Arc::clone(&self.state)
    }

    /// Receiver notified once shutdown is triggered. Loops select on it
    /// alongside accept or read.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Signals every receiver. Idempotent.
    pub fn trigger_shutdown(&self) {
        // No receivers is fine: nothing is listening yet.
        let _ = self.shutdown_signal.send(true);
    }

    #[must_use]
    pub fn is_shutdown_triggered(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    /// Counts a connection as open until the guard drops.
    #[must_use]
    pub fn connection_guard(&self) -> ConnectionGuard {
        self.open_connections.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            open_connections: Arc::clone(&self.open_connections),
        }
    }

    /// Shared counter, for servers that hand out guards from other threads.
    #[must_use]
    pub fn connection_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.open_connections)
    }

    #[must_use]
    pub fn open_connections(&self) -> u64 {
        self.open_connections.load(Ordering::Relaxed)
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the open-connection counter on drop, including during unwind.
#[derive(Debug)]
pub struct ConnectionGuard {
    open_connections: Arc<AtomicU64>,
}

impl ConnectionGuard {
    /// Guard over an existing counter.
    #[must_use]
    pub fn track(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self {
            open_connections: Arc::clone(counter),
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uninitialized() {
        let ctrl = ShutdownController::new();
        assert_eq!(ctrl.state(), SupervisorState::Uninitialized);
        assert!(!ctrl.is_shutdown_triggered());
    }

    #[test]
    fn state_handle_observes_transitions() {
        let ctrl = ShutdownController::new();
        let handle = ctrl.state_handle();
        ctrl.set_state(SupervisorState::Serving);
        assert_eq!(**handle.load(), SupervisorState::Serving);
    }

    #[test]
    fn guards_count_connections() {
        let ctrl = ShutdownController::new();
        let a = ctrl.connection_guard();
        let b = ConnectionGuard::track(&ctrl.connection_counter());
        assert_eq!(ctrl.open_connections(), 2);
        drop(a);
        drop(b);
        assert_eq!(ctrl.open_connections(), 0);
    }

    #[tokio::test]
    async fn receivers_see_shutdown() {
        let ctrl = ShutdownController::new();
        let mut rx = ctrl.shutdown_receiver();
        ctrl.trigger_shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(ctrl.is_shutdown_triggered());
    }
}
