//! Protocol codecs selectable at boot.
//!
//! Harbor does not define an encoding of its own. Each [`ProtocolKind`]
//! picks a serde data format:
//!
//! | kind      | format                                           |
//! |-----------|--------------------------------------------------|
//! | `binary`  | `MsgPack`, structs as named maps (`to_vec_named`) |
//! | `compact` | `MsgPack`, structs as positional arrays          |
//! | `json`    | JSON text                                        |
//!
//! All three are self-delimiting, which lets the buffered transport find
//! message boundaries without a length prefix (see [`Protocol::decode_prefix`]).

use std::fmt;
use std::io::{self, Cursor};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Wire format selected by configuration. Defaults to `binary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    #[default]
    Binary,
    Compact,
    Json,
}

impl ProtocolKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolKind::Binary => "binary",
            ProtocolKind::Compact => "compact",
            ProtocolKind::Json => "json",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(ProtocolKind::Binary),
            "compact" => Ok(ProtocolKind::Compact),
            "json" => Ok(ProtocolKind::Json),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

/// Errors raised while encoding or decoding a message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown protocol: {0}")]
    UnknownKind(String),
    #[error("{protocol} encode failed: {reason}")]
    Encode {
        protocol: ProtocolKind,
        reason: String,
    },
    #[error("{protocol} decode failed: {reason}")]
    Decode {
        protocol: ProtocolKind,
        reason: String,
    },
}

/// Codec for one [`ProtocolKind`]. Cheap to copy; holds no buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol {
    kind: ProtocolKind,
}

impl Protocol {
    #[must_use]
    pub fn new(kind: ProtocolKind) -> Self {
        Self { kind }
    }

    #[must_use]
    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    /// Encodes one message.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Encode` if the value cannot be represented.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, ProtocolError> {
        let result = match self.kind {
            ProtocolKind::Binary => rmp_serde::to_vec_named(message).map_err(|e| e.to_string()),
            ProtocolKind::Compact => rmp_serde::to_vec(message).map_err(|e| e.to_string()),
            ProtocolKind::Json => serde_json::to_vec(message).map_err(|e| e.to_string()),
        };
        result.map_err(|reason| ProtocolError::Encode {
            protocol: self.kind,
            reason,
        })
    }

    /// Decodes one message that occupies the whole of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Decode` on malformed or truncated input.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, ProtocolError> {
        let result = match self.kind {
            ProtocolKind::Binary | ProtocolKind::Compact => {
                rmp_serde::from_slice(bytes).map_err(|e| e.to_string())
            }
            ProtocolKind::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
        };
        result.map_err(|reason| self.decode_error(reason))
    }

    /// Decodes the first message at the start of `bytes`.
    ///
    /// Returns the message and the number of bytes it occupied, or `None`
    /// when `bytes` holds only a prefix of a message and more input is needed.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Decode` when the input can never become a
    /// valid message regardless of how many more bytes arrive.
    pub fn decode_prefix<T: DeserializeOwned>(
        &self,
        bytes: &[u8],
    ) -> Result<Option<(T, usize)>, ProtocolError> {
        match self.kind {
            ProtocolKind::Binary | ProtocolKind::Compact => {
                let mut cursor = Cursor::new(bytes);
                let result = {
                    let mut de = rmp_serde::Deserializer::new(&mut cursor);
                    T::deserialize(&mut de)
                };
                match result {
                    #[allow(clippy::cast_possible_truncation)]
                    Ok(message) => Ok(Some((message, cursor.position() as usize))),
                    Err(e) if msgpack_needs_more(&e) => Ok(None),
                    Err(e) => Err(self.decode_error(e.to_string())),
                }
            }
            ProtocolKind::Json => {
                let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<T>();
                match stream.next() {
                    None => Ok(None),
                    Some(Ok(message)) => Ok(Some((message, stream.byte_offset()))),
                    Some(Err(e)) if e.is_eof() => Ok(None),
                    Some(Err(e)) => Err(self.decode_error(e.to_string())),
                }
            }
        }
    }

    fn decode_error(&self, reason: String) -> ProtocolError {
        ProtocolError::Decode {
            protocol: self.kind,
            reason,
        }
    }
}

impl From<ProtocolKind> for Protocol {
    fn from(kind: ProtocolKind) -> Self {
        Self::new(kind)
    }
}

/// A `MsgPack` read that ran off the end of the buffer means "incomplete",
/// not "corrupt".
fn msgpack_needs_more(err: &rmp_serde::decode::Error) -> bool {
    use rmp_serde::decode::Error;
    match err {
        Error::InvalidMarkerRead(source) | Error::InvalidDataRead(source) => {
            source.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Reply, Request};
    use crate::value::Value;

    fn request() -> Request {
        Request::new(9, "find_user", vec![Value::from("ada"), Value::Int(36)])
    }

    #[test]
    fn parses_kind_case_insensitively() {
        assert_eq!("Compact".parse::<ProtocolKind>().unwrap(), ProtocolKind::Compact);
        assert!(matches!(
            "thrift".parse::<ProtocolKind>(),
            Err(ProtocolError::UnknownKind(_))
        ));
    }

    #[test]
    fn default_kind_is_binary() {
        assert_eq!(ProtocolKind::default(), ProtocolKind::Binary);
    }

    #[test]
    fn compact_is_smaller_than_binary() {
        let binary = Protocol::new(ProtocolKind::Binary).encode(&request()).unwrap();
        let compact = Protocol::new(ProtocolKind::Compact).encode(&request()).unwrap();
        assert!(compact.len() < binary.len());
    }

    #[test]
    fn decode_prefix_reports_incomplete_for_every_truncation() {
        for kind in [ProtocolKind::Binary, ProtocolKind::Compact, ProtocolKind::Json] {
            let protocol = Protocol::new(kind);
            let bytes = protocol.encode(&request()).unwrap();
            for cut in 0..bytes.len() {
                let partial = protocol.decode_prefix::<Request>(&bytes[..cut]).unwrap();
                assert!(partial.is_none(), "{kind} cut at {cut} should be incomplete");
            }
            let (decoded, used) = protocol.decode_prefix::<Request>(&bytes).unwrap().unwrap();
            assert_eq!(decoded, request());
            assert_eq!(used, bytes.len());
        }
    }

    #[test]
    fn decode_prefix_leaves_following_message() {
        let protocol = Protocol::new(ProtocolKind::Compact);
        let mut bytes = protocol.encode(&Reply::success(1, Value::Int(1))).unwrap();
        let first_len = bytes.len();
        bytes.extend(protocol.encode(&Reply::success(2, Value::Int(2))).unwrap());

        let (first, used) = protocol.decode_prefix::<Reply>(&bytes).unwrap().unwrap();
        assert_eq!(first.seq_id, 1);
        assert_eq!(used, first_len);
        let (second, _) = protocol.decode_prefix::<Reply>(&bytes[used..]).unwrap().unwrap();
        assert_eq!(second.seq_id, 2);
    }

    #[test]
    fn garbage_json_is_a_decode_error() {
        let protocol = Protocol::new(ProtocolKind::Json);
        let err = protocol.decode_prefix::<Request>(b"]]").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode { protocol: ProtocolKind::Json, .. }));
    }
}
