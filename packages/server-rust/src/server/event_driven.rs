//! Reactor server: every connection is a tokio task on the shared runtime.
//!
//! Handlers run inline on the reactor, so a blocking handler stalls the
//! worker thread it lands on. Connections use the framed transport.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use harbor_core::{Processor, TransportKind};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::codec::RpcCodec;
use super::handle::ProcessorCell;
use super::shutdown::ConnectionGuard;
use crate::error::ServeLoopError;
use crate::processor::ServiceProcessor;

pub struct ReactorServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    processor: ProcessorCell,
    open_connections: Arc<AtomicU64>,
}

impl ReactorServer {
    /// Binds `addr` without accepting yet.
    ///
    /// # Errors
    ///
    /// Returns `ServeLoopError::Bind` if the address cannot be bound.
    pub async fn bind(
        addr: &str,
        processor: ProcessorCell,
        open_connections: Arc<AtomicU64>,
    ) -> Result<Self, ServeLoopError> {
        let bind_err = |source| ServeLoopError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        Ok(Self {
            listener,
            local_addr,
            processor,
            open_connections,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts until `shutdown` flips to `true` (or its sender drops).
    /// Open connections are told to close through the same channel.
    ///
    /// # Errors
    ///
    /// Returns `ServeLoopError::Accept` on a non-transient accept failure.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServeLoopError> {
        info!(addr = %self.local_addr, "reactor accepting");
        if *shutdown.borrow_and_update() {
            return Ok(());
        }
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let processor = self.processor.load_full();
                        let guard = ConnectionGuard::track(&self.open_connections);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            let _guard = guard;
                            match serve_connection(stream, processor, shutdown).await {
                                Ok(()) => debug!(peer = %peer, "connection closed"),
                                Err(e) => warn!(peer = %peer, error = %e, fatal = e.is_fatal(), "connection dropped"),
                            }
                        });
                    }
                    Err(e) if is_transient(&e) => warn!(error = %e, "transient accept error"),
                    Err(e) => return Err(ServeLoopError::Accept(e)),
                },
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted
    )
}

async fn serve_connection(
    stream: TcpStream,
    processor: Arc<ServiceProcessor>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), harbor_core::TransportError> {
    stream.set_nodelay(true)?;
    let mut framed = Framed::new(stream, RpcCodec::new(processor.transport(TransportKind::Framed)));
    loop {
        tokio::select! {
            next = framed.next() => match next {
                Some(request) => {
                    let reply = processor.process(request?);
                    framed.send(reply).await?;
                }
                None => return Ok(()),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}
