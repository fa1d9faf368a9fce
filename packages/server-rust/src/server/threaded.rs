//! Thread-pool server: one blocking connection per OS worker thread.
//!
//! The accept loop hands sockets to a bounded queue (capacity = pool size)
//! drained by `pool_size` workers. A full queue blocks accept, so at most
//! `2 * pool_size` connections are held at once. Connections use the
//! buffered transport.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::BytesMut;
use harbor_core::{ExceptionKind, Processor, Reply, Request, TransportError, TransportKind};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::handle::ProcessorCell;
use super::shutdown::ConnectionGuard;
use crate::error::ServeLoopError;
use crate::processor::ServiceProcessor;

/// How often an idle worker wakes to check for shutdown.
const READ_POLL: Duration = Duration::from_millis(200);

const READ_CHUNK: usize = 8 * 1024;

pub struct ThreadPoolServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    pool_size: usize,
    processor: ProcessorCell,
    stop: Arc<AtomicBool>,
    open_connections: Arc<AtomicU64>,
}

impl ThreadPoolServer {
    /// Binds `addr` without accepting yet.
    ///
    /// # Errors
    ///
    /// Returns `ServeLoopError::Bind` if the address cannot be bound.
    pub fn bind(
        addr: &str,
        pool_size: usize,
        processor: ProcessorCell,
        open_connections: Arc<AtomicU64>,
    ) -> Result<Self, ServeLoopError> {
        let bind_err = |source| ServeLoopError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        Ok(Self {
            listener,
            local_addr,
            pool_size: pool_size.max(1),
            processor,
            stop: Arc::new(AtomicBool::new(false)),
            open_connections,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Handle that ends [`serve`](Self::serve) from another thread.
    #[must_use]
    pub fn stopper(&self) -> Stopper {
        Stopper {
            stop: Arc::clone(&self.stop),
            wake_addr: wake_addr(self.local_addr),
        }
    }

    /// Runs the accept loop on the calling thread until stopped.
    ///
    /// # Errors
    ///
    /// Returns `ServeLoopError::Accept` on a non-transient accept failure
    /// and `ServeLoopError::Join` if a worker cannot be spawned.
    pub fn serve(self) -> Result<(), ServeLoopError> {
        let (tx, rx) = mpsc::sync_channel::<TcpStream>(self.pool_size);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.pool_size);
        for id in 0..self.pool_size {
            let rx = Arc::clone(&rx);
            let cell = Arc::clone(&self.processor);
            let stop = Arc::clone(&self.stop);
            let counter = Arc::clone(&self.open_connections);
            let worker = thread::Builder::new()
                .name(format!("harbor-worker-{id}"))
                .spawn(move || worker_loop(&rx, &cell, &stop, &counter))
                .map_err(|e| ServeLoopError::Join(format!("failed to spawn worker {id}: {e}")))?;
            workers.push(worker);
        }
        info!(addr = %self.local_addr, pool_size = self.pool_size, "thread pool accepting");

        let result = loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.stop.load(Ordering::Acquire) {
                        break Ok(());
                    }
                    debug!(peer = %peer, "accepted connection");
                    if tx.send(stream).is_err() {
                        break Err(ServeLoopError::Join("worker pool exited".to_string()));
                    }
                }
                Err(e) if is_transient(&e) => {
                    if self.stop.load(Ordering::Acquire) {
                        break Ok(());
                    }
                    warn!(error = %e, "transient accept error");
                }
                Err(e) => break Err(ServeLoopError::Accept(e)),
            }
        };

        // Closing the queue lets idle workers exit; busy ones finish their
        // connection or notice the stop flag on the next read poll.
        self.stop.store(true, Ordering::Release);
        drop(tx);
        for worker in workers {
            if worker.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        result
    }
}

/// Ends a [`ThreadPoolServer`] accept loop.
#[derive(Debug, Clone)]
pub struct Stopper {
    stop: Arc<AtomicBool>,
    wake_addr: SocketAddr,
}

impl Stopper {
    /// Sets the stop flag and unblocks `accept` with a loopback connection.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Err(e) = TcpStream::connect_timeout(&self.wake_addr, Duration::from_secs(1)) {
            debug!(error = %e, "wake connection failed; accept loop may already be gone");
        }
    }
}

fn wake_addr(local: SocketAddr) -> SocketAddr {
    match local {
        SocketAddr::V4(v4) if v4.ip().is_unspecified() => {
            SocketAddr::from((Ipv4Addr::LOCALHOST, v4.port()))
        }
        SocketAddr::V6(v6) if v6.ip().is_unspecified() => {
            SocketAddr::from((Ipv6Addr::LOCALHOST, v6.port()))
        }
        other => other,
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

fn worker_loop(
    rx: &Mutex<Receiver<TcpStream>>,
    cell: &ProcessorCell,
    stop: &AtomicBool,
    counter: &Arc<AtomicU64>,
) {
    loop {
        let next = rx.lock().recv();
        let Ok(stream) = next else { break };
        if stop.load(Ordering::Acquire) {
            break;
        }
        let _guard = ConnectionGuard::track(counter);
        let processor = cell.load_full();
        let peer = stream.peer_addr().ok();
        match serve_connection(stream, &processor, stop) {
            Ok(()) => debug!(peer = ?peer, "connection closed"),
            Err(e) => warn!(peer = ?peer, error = %e, fatal = e.is_fatal(), "connection dropped"),
        }
    }
}

/// Reads requests until EOF, answering each in order with `processor`.
fn serve_connection(
    mut stream: TcpStream,
    processor: &ServiceProcessor,
    stop: &AtomicBool,
) -> Result<(), TransportError> {
    stream.set_read_timeout(Some(READ_POLL))?;
    stream.set_nodelay(true)?;
    let transport = processor.transport(TransportKind::Buffered);
    let mut inbound = BytesMut::with_capacity(READ_CHUNK);
    let mut outbound = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        while let Some(request) = transport.decode_from::<Request>(&mut inbound)? {
            let seq_id = request.seq_id;
            let reply = processor.process(request);
            outbound.clear();
            if let Err(e) = transport.encode_into(&reply, &mut outbound) {
                warn!(seq_id, error = %e, "reply could not be encoded");
                outbound.clear();
                let fallback = Reply::exception(seq_id, ExceptionKind::Internal, e.to_string());
                transport.encode_into(&fallback, &mut outbound)?;
            }
            stream.write_all(&outbound)?;
        }

        match stream.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => inbound.extend_from_slice(&chunk[..n]),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                if stop.load(Ordering::Acquire) {
                    return Ok(());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}
