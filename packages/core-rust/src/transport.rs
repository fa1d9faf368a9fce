//! Byte-stream framing over a connection, independent of any socket type.
//!
//! ```text
//! buffered:  [ message ][ message ][ mess...        self-delimiting protocol bytes
//! framed:    [ len u32 BE | message ][ len | ... ]  length-prefixed
//! ```
//!
//! The transport only finds message boundaries; encoding is delegated to
//! the [`Protocol`]. Callers append inbound bytes to a `BytesMut` and pull
//! complete messages with [`Transport::decode_from`], which makes the same
//! code usable from blocking workers and from async codecs.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::protocol::{Protocol, ProtocolError};

/// Size of the framed transport's length header.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default maximum message size (16 MiB).
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Transport framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Raw protocol bytes; boundaries come from the protocol itself.
    Buffered,
    /// 4-byte big-endian length prefix before each message.
    Framed,
}

impl TransportKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Buffered => "buffered",
            TransportKind::Framed => "framed",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buffered" => Ok(TransportKind::Buffered),
            "framed" => Ok(TransportKind::Framed),
            other => Err(TransportError::UnknownKind(other.to_string())),
        }
    }
}

/// Errors raised while framing or unframing messages.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unknown transport: {0}")]
    UnknownKind(String),
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the connection can no longer be trusted to stay in sync.
    ///
    /// After a fatal error the byte stream position is unknown, so the
    /// connection should be closed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::MessageTooLarge { .. }
                | TransportError::Protocol(ProtocolError::Decode { .. })
                | TransportError::Io(_)
        )
    }
}

/// Framing state for one connection direction pair.
#[derive(Debug, Clone, Copy)]
pub struct Transport {
    kind: TransportKind,
    protocol: Protocol,
    max_message_len: usize,
}

impl Transport {
    #[must_use]
    pub fn new(kind: TransportKind, protocol: Protocol) -> Self {
        Self {
            kind,
            protocol,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }

    /// Overrides the maximum accepted message size.
    #[must_use]
    pub fn with_max_message_len(mut self, max: usize) -> Self {
        debug_assert!(max > 0, "max_message_len must be positive");
        self.max_message_len = max;
        self
    }

    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Pulls the next complete message out of `buf`, consuming its bytes.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a whole message; the
    /// partial bytes are left in place for the next call.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::MessageTooLarge` when the announced or
    /// buffered size exceeds the limit, and `TransportError::Protocol` when
    /// the message bytes are malformed.
    pub fn decode_from<T: DeserializeOwned>(
        &self,
        buf: &mut BytesMut,
    ) -> Result<Option<T>, TransportError> {
        match self.kind {
            TransportKind::Framed => {
                if buf.len() < FRAME_HEADER_LEN {
                    return Ok(None);
                }
                let mut header = [0u8; FRAME_HEADER_LEN];
                header.copy_from_slice(&buf[..FRAME_HEADER_LEN]);
                let len = u32::from_be_bytes(header) as usize;
                if len > self.max_message_len {
                    return Err(TransportError::MessageTooLarge {
                        size: len,
                        max: self.max_message_len,
                    });
                }
                if buf.len() < FRAME_HEADER_LEN + len {
                    buf.reserve(FRAME_HEADER_LEN + len - buf.len());
                    return Ok(None);
                }
                buf.advance(FRAME_HEADER_LEN);
                let payload = buf.split_to(len);
                Ok(Some(self.protocol.decode(&payload)?))
            }
            TransportKind::Buffered => match self.protocol.decode_prefix(buf)? {
                Some((message, used)) => {
                    buf.advance(used);
                    Ok(Some(message))
                }
                None if buf.len() > self.max_message_len => Err(TransportError::MessageTooLarge {
                    size: buf.len(),
                    max: self.max_message_len,
                }),
                None => Ok(None),
            },
        }
    }

    /// Encodes `message` and appends its wire bytes to `dst`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Protocol` if encoding fails and
    /// `TransportError::MessageTooLarge` if the result exceeds the limit.
    pub fn encode_into<T: Serialize>(
        &self,
        message: &T,
        dst: &mut BytesMut,
    ) -> Result<(), TransportError> {
        let payload = self.protocol.encode(message)?;
        if payload.len() > self.max_message_len {
            return Err(TransportError::MessageTooLarge {
                size: payload.len(),
                max: self.max_message_len,
            });
        }
        match self.kind {
            TransportKind::Framed => {
                dst.reserve(FRAME_HEADER_LEN + payload.len());
                #[allow(clippy::cast_possible_truncation)]
                dst.put_u32(payload.len() as u32);
                dst.extend_from_slice(&payload);
            }
            TransportKind::Buffered => dst.extend_from_slice(&payload),
        }
        Ok(())
    }

    /// Convenience wrapper around [`Transport::encode_into`] returning owned bytes.
    ///
    /// # Errors
    ///
    /// Same as [`Transport::encode_into`].
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, TransportError> {
        let mut dst = BytesMut::new();
        self.encode_into(message, &mut dst)?;
        Ok(dst.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Request;
    use crate::protocol::ProtocolKind;
    use crate::value::Value;

    fn transport(kind: TransportKind) -> Transport {
        Transport::new(kind, Protocol::new(ProtocolKind::Binary))
    }

    #[test]
    fn framed_prefixes_big_endian_length() {
        let t = transport(TransportKind::Framed);
        let bytes = t.encode(&Request::new(1, "ping", vec![])).unwrap();
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len() - FRAME_HEADER_LEN);
    }

    #[test]
    fn pipelined_messages_decode_in_order() {
        for kind in [TransportKind::Buffered, TransportKind::Framed] {
            let t = transport(kind);
            let mut buf = BytesMut::new();
            for seq in 1..=3 {
                t.encode_into(&Request::new(seq, "ping", vec![Value::Int(seq as i64)]), &mut buf)
                    .unwrap();
            }
            let seqs: Vec<u64> = std::iter::from_fn(|| t.decode_from::<Request>(&mut buf).unwrap())
                .map(|r| r.seq_id)
                .collect();
            assert_eq!(seqs, vec![1, 2, 3], "{kind}");
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn byte_at_a_time_delivery_yields_one_message() {
        for kind in [TransportKind::Buffered, TransportKind::Framed] {
            let t = transport(kind);
            let wire = t.encode(&Request::new(5, "echo", vec![Value::from("hi")])).unwrap();
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            for byte in wire {
                buf.put_u8(byte);
                if let Some(req) = t.decode_from::<Request>(&mut buf).unwrap() {
                    decoded.push(req);
                }
            }
            assert_eq!(decoded.len(), 1, "{kind}");
            assert_eq!(decoded[0].method, "echo");
        }
    }

    #[test]
    fn oversized_frame_header_is_rejected() {
        let t = transport(TransportKind::Framed).with_max_message_len(8);
        let mut buf = BytesMut::new();
        buf.put_u32(9);
        let err = t.decode_from::<Request>(&mut buf).unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { size: 9, max: 8 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn parses_kind() {
        assert_eq!("Framed".parse::<TransportKind>().unwrap(), TransportKind::Framed);
        assert!("http".parse::<TransportKind>().is_err());
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;
    use crate::messages::Request;
    use crate::protocol::ProtocolKind;
    use crate::value::Value;

    proptest! {
        #[test]
        fn arbitrary_chunking_preserves_messages(
            framed in any::<bool>(),
            binary in any::<bool>(),
            args in proptest::collection::vec(any::<i64>(), 1..6),
            chunk in 1usize..32,
        ) {
            let kind = if framed { TransportKind::Framed } else { TransportKind::Buffered };
            let protocol = if binary { ProtocolKind::Binary } else { ProtocolKind::Compact };
            let t = Transport::new(kind, Protocol::new(protocol));

            let mut wire = BytesMut::new();
            for (seq, arg) in args.iter().enumerate() {
                t.encode_into(&Request::new(seq as u64, "echo", vec![Value::Int(*arg)]), &mut wire)
                    .unwrap();
            }

            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            for piece in wire.chunks(chunk) {
                buf.extend_from_slice(piece);
                while let Some(req) = t.decode_from::<Request>(&mut buf).unwrap() {
                    decoded.push(req);
                }
            }

            prop_assert!(buf.is_empty());
            prop_assert_eq!(decoded.len(), args.len());
            for (seq, (req, arg)) in decoded.iter().zip(&args).enumerate() {
                prop_assert_eq!(req.seq_id, seq as u64);
                prop_assert_eq!(&req.args, &vec![Value::Int(*arg)]);
            }
        }
    }
}
