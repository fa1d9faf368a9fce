//! The registered server: where it listens and which processor it runs.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use harbor_core::TransportKind;

use super::shutdown::SupervisorState;
use crate::config::ConcurrencyMode;
use crate::processor::ServiceProcessor;

/// Shared processor slot. Connections `load_full` once at accept; reload
/// `store`s a replacement.
pub type ProcessorCell = Arc<ArcSwap<ServiceProcessor>>;

#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    mode: ConcurrencyMode,
    pool_size: Option<usize>,
    processor: ProcessorCell,
    state: Arc<ArcSwap<SupervisorState>>,
    swaps: AtomicU64,
}

impl ServerHandle {
    #[must_use]
    pub fn new(
        local_addr: SocketAddr,
        mode: ConcurrencyMode,
        pool_size: Option<usize>,
        processor: ProcessorCell,
        state: Arc<ArcSwap<SupervisorState>>,
    ) -> Self {
        Self {
            local_addr,
            mode,
            pool_size,
            processor,
            state,
            swaps: AtomicU64::new(0),
        }
    }

    /// Actual bound address (resolves port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    #[must_use]
    pub fn transport_kind(&self) -> TransportKind {
        self.mode.transport()
    }

    /// Worker count; `None` in event-driven mode.
    #[must_use]
    pub fn pool_size(&self) -> Option<usize> {
        self.pool_size
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        **self.state.load()
    }

    /// The processor new connections will receive.
    #[must_use]
    pub fn processor(&self) -> Arc<ServiceProcessor> {
        self.processor.load_full()
    }

    #[must_use]
    pub fn processor_cell(&self) -> &ProcessorCell {
        &self.processor
    }

    /// Atomically installs `processor` for future connections and returns
    /// the one it replaced. Open connections keep the processor they hold.
    pub fn swap_processor(&self, processor: ServiceProcessor) -> Arc<ServiceProcessor> {
        let previous = self.processor.swap(Arc::new(processor));
        self.swaps.fetch_add(1, Ordering::Relaxed);
        previous
    }

    /// Number of completed swaps.
    #[must_use]
    pub fn swap_count(&self) -> u64 {
        self.swaps.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use harbor_core::{Protocol, ProtocolKind};

    use super::*;
    use crate::service::{ServiceFacade, SystemService};

    fn processor() -> ServiceProcessor {
        let facade = ServiceFacade::builder()
            .register(SystemService::new("app", "test"))
            .unwrap()
            .build();
        ServiceProcessor::new(Arc::new(facade), Protocol::new(ProtocolKind::Binary))
    }

    #[test]
    fn swap_replaces_for_new_loads_only() {
        let cell: ProcessorCell = Arc::new(ArcSwap::from_pointee(processor()));
        let handle = ServerHandle::new(
            "127.0.0.1:4000".parse().unwrap(),
            ConcurrencyMode::EventDriven,
            None,
            cell,
            Arc::new(ArcSwap::from_pointee(SupervisorState::Serving)),
        );

        let captured = handle.processor();
        let replacement = processor();
        let new_id = replacement.facade().instance_id();
        let previous = handle.swap_processor(replacement);

        assert!(Arc::ptr_eq(&previous, &captured));
        assert_eq!(captured.facade().instance_id(), previous.facade().instance_id());
        assert_eq!(handle.processor().facade().instance_id(), new_id);
        assert_eq!(handle.swap_count(), 1);
        assert_eq!(handle.transport_kind(), TransportKind::Framed);
    }
}
