//! Server supervisor with deferred startup.
//!
//! `new()` allocates the lifecycle state, `start()` builds the processor and
//! binds the listener for the configured concurrency mode, and `serve()`
//! runs the accept loop until the shutdown future resolves. Keeping bind
//! separate from serve lets callers read the bound address (port 0) and the
//! registered handle before any connection is accepted.

pub mod codec;
pub mod event_driven;
pub mod handle;
pub mod shutdown;
pub mod threaded;

use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use harbor_core::Protocol;
use tracing::{error, info, warn};

use crate::config::ConcurrencyMode;
use crate::context::AppContext;
use crate::error::{error_chain, BootError, ServeLoopError};
use crate::processor::ServiceProcessor;

pub use codec::RpcCodec;
pub use event_driven::ReactorServer;
pub use handle::{ProcessorCell, ServerHandle};
pub use shutdown::{ConnectionGuard, ShutdownController, SupervisorState};
pub use threaded::{Stopper, ThreadPoolServer};

enum BoundServer {
    Threaded(ThreadPoolServer),
    EventDriven(ReactorServer),
}

/// Owns one server's lifecycle for an [`AppContext`].
pub struct ServerSupervisor {
    ctx: Arc<AppContext>,
    shutdown: ShutdownController,
    bound: Option<BoundServer>,
}

impl ServerSupervisor {
    #[must_use]
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            shutdown: ShutdownController::new(),
            bound: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.shutdown.state()
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Builds the processor from the live facade, binds the listener for
    /// the configured mode, and registers the handle with the context.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless uninitialized; `ServerAlreadyRunning` if the
    /// context already has a server; config, facade, or bind failures. Any
    /// failure leaves the supervisor `Stopped`.
    pub async fn start(&mut self) -> Result<Arc<ServerHandle>, BootError> {
        let state = self.state();
        if state != SupervisorState::Uninitialized {
            return Err(BootError::InvalidState {
                expected: SupervisorState::Uninitialized.as_str(),
                found: state.as_str(),
            });
        }
        self.shutdown.set_state(SupervisorState::Initializing);

        match self.bind().await {
            Ok((bound, handle)) => {
                self.bound = Some(bound);
                Ok(handle)
            }
            Err(e) => {
                self.shutdown.set_state(SupervisorState::Stopped);
                Err(e)
            }
        }
    }

    async fn bind(&self) -> Result<(BoundServer, Arc<ServerHandle>), BootError> {
        let config = self.ctx.config()?;
        let protocol = Protocol::new(config.protocol);
        let processor = ServiceProcessor::new(self.ctx.service()?, protocol);
        let cell: ProcessorCell = Arc::new(ArcSwap::from_pointee(processor));
        let addr = config.listen_addr();
        let counter = self.shutdown.connection_counter();

        let (bound, local_addr, pool_size) = match config.concurrency_mode {
            ConcurrencyMode::Threaded => {
                let server = ThreadPoolServer::bind(
                    &addr,
                    config.thread_pool_size,
                    Arc::clone(&cell),
                    counter,
                )?;
                let local = server.local_addr();
                let size = server.pool_size();
                (BoundServer::Threaded(server), local, Some(size))
            }
            ConcurrencyMode::EventDriven => {
                let server = ReactorServer::bind(&addr, Arc::clone(&cell), counter).await?;
                let local = server.local_addr();
                (BoundServer::EventDriven(server), local, None)
            }
        };

        let handle = Arc::new(ServerHandle::new(
            local_addr,
            config.concurrency_mode,
            pool_size,
            cell,
            self.shutdown.state_handle(),
        ));
        self.ctx.register_server(Arc::clone(&handle))?;

        info!("Boot on: {}", self.ctx.root().display());
        match pool_size {
            Some(size) => info!("Starting the server with ThreadPool size: {size}..."),
            None => info!("Starting the server with NonBlocking..."),
        }
        info!("Protocol: {}", protocol.kind());
        info!("serve: {local_addr}");
        Ok((bound, handle))
    }

    /// Accepts connections until `shutdown` resolves or the accept loop
    /// fails. Either way the supervisor ends `Stopped`; a failure is logged
    /// with its source chain and returned.
    ///
    /// # Errors
    ///
    /// `ServeLoopError::NotStarted` without a successful `start()`;
    /// otherwise the accept loop's error.
    pub async fn serve<F>(mut self, shutdown: F) -> Result<(), ServeLoopError>
    where
        F: Future<Output = ()> + Send,
    {
        let Some(bound) = self.bound.take() else {
            return Err(ServeLoopError::NotStarted);
        };
        self.shutdown.set_state(SupervisorState::Serving);
        tokio::pin!(shutdown);

        let result = match bound {
            BoundServer::Threaded(server) => {
                let stopper = server.stopper();
                let mut task = tokio::task::spawn_blocking(move || server.serve());
                tokio::select! {
                    joined = &mut task => flatten(joined),
                    () = &mut shutdown => {
                        self.shutdown.trigger_shutdown();
                        // The wake connection blocks, so keep it off the reactor.
                        if let Err(e) = tokio::task::spawn_blocking(move || stopper.stop()).await {
                            warn!(error = %e, "stopper task failed");
                        }
                        flatten(task.await)
                    }
                }
            }
            BoundServer::EventDriven(server) => {
                let accept = server.serve(self.shutdown.shutdown_receiver());
                tokio::pin!(accept);
                tokio::select! {
                    finished = &mut accept => finished,
                    () = &mut shutdown => {
                        self.shutdown.trigger_shutdown();
                        accept.await
                    }
                }
            }
        };

        self.shutdown.set_state(SupervisorState::Stopped);
        match &result {
            Ok(()) => info!("server stopped"),
            Err(e) => error!(error = %error_chain(e), "serve loop failed"),
        }
        result
    }

    /// `new` + `start` + `serve`.
    ///
    /// # Errors
    ///
    /// Any error from [`start`](Self::start) or [`serve`](Self::serve).
    pub async fn run<F>(ctx: Arc<AppContext>, shutdown: F) -> Result<(), BootError>
    where
        F: Future<Output = ()> + Send,
    {
        let mut supervisor = Self::new(ctx);
        supervisor.start().await?;
        supervisor.serve(shutdown).await?;
        Ok(())
    }
}

fn flatten(
    joined: Result<Result<(), ServeLoopError>, tokio::task::JoinError>,
) -> Result<(), ServeLoopError> {
    joined.map_err(|e| ServeLoopError::Join(e.to_string()))?
}
