//! Minimal blocking RPC client.
//!
//! Issues one call at a time over a single TCP connection. Intended for
//! tooling and tests; it speaks whatever transport/protocol pair the server
//! was booted with.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::messages::{ExceptionKind, Reply, ReplyBody, Request};
use crate::protocol::{Protocol, ProtocolKind};
use crate::transport::{Transport, TransportError, TransportKind};
use crate::value::Value;

/// Errors returned by [`Client::call`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("server closed the connection")]
    Closed,
    #[error("reply sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u64, actual: u64 },
    #[error("remote {kind} exception: {message}")]
    Exception { kind: ExceptionKind, message: String },
}

/// Blocking client bound to one connection.
pub struct Client {
    stream: TcpStream,
    transport: Transport,
    read_buf: BytesMut,
    next_seq: u64,
}

impl Client {
    /// Connects to `addr` using the given framing and protocol.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the connection cannot be established.
    pub fn connect(
        addr: impl ToSocketAddrs,
        transport: TransportKind,
        protocol: ProtocolKind,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            transport: Transport::new(transport, Protocol::new(protocol)),
            read_buf: BytesMut::with_capacity(4096),
            next_seq: 1,
        })
    }

    /// Sets a read timeout so a silent server cannot hang the caller.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket option cannot be set.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Sends a request and waits for its raw reply.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` on I/O or framing failures, or when the reply
    /// does not carry the expected sequence number.
    pub fn call_raw(&mut self, method: &str, args: Vec<Value>) -> Result<Reply, ClientError> {
        let seq_id = self.next_seq;
        self.next_seq += 1;

        let wire = self.transport.encode(&Request::new(seq_id, method, args))?;
        self.stream.write_all(&wire)?;
        self.stream.flush()?;

        trace!(seq_id, method, "call sent");

        let reply = self.read_reply()?;
        if reply.seq_id != seq_id {
            debug!(expected = seq_id, actual = reply.seq_id, "reply out of sequence");
            return Err(ClientError::SequenceMismatch {
                expected: seq_id,
                actual: reply.seq_id,
            });
        }
        Ok(reply)
    }

    /// Sends a request and returns its result value.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Exception` when the server answered with an
    /// exception, plus everything [`Client::call_raw`] can return.
    pub fn call(&mut self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        match self.call_raw(method, args)?.body {
            ReplyBody::Success(value) => Ok(value),
            ReplyBody::Exception { kind, message } => Err(ClientError::Exception { kind, message }),
        }
    }

    fn read_reply(&mut self) -> Result<Reply, ClientError> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(reply) = self.transport.decode_from::<Reply>(&mut self.read_buf)? {
                return Ok(reply);
            }
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(ClientError::Closed);
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }
}
