//! Request and reply envelopes exchanged over an RPC connection.
//!
//! A connection carries a stream of `Request`s from the client and one
//! `Reply` per request back, matched by `seq_id`. The envelope is encoded
//! with whichever protocol the server was booted with.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One RPC call: a method name and its already-positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Client-assigned sequence number echoed in the reply.
    pub seq_id: u64,
    /// Exact method name looked up on the service facade.
    pub method: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Request {
    #[must_use]
    pub fn new(seq_id: u64, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            seq_id,
            method: method.into(),
            args,
        }
    }
}

/// Category of a failed call, reported to the client as a protocol-level
/// exception instead of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    /// No registered service exposes the requested method.
    UnknownMethod,
    /// Arguments did not match what the handler expects.
    InvalidArguments,
    /// The handler failed or panicked.
    Internal,
}

impl ExceptionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExceptionKind::UnknownMethod => "unknown_method",
            ExceptionKind::InvalidArguments => "invalid_arguments",
            ExceptionKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyBody {
    Success(Value),
    Exception { kind: ExceptionKind, message: String },
}

/// Response to exactly one `Request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub seq_id: u64,
    pub body: ReplyBody,
}

impl Reply {
    #[must_use]
    pub fn success(seq_id: u64, value: Value) -> Self {
        Self {
            seq_id,
            body: ReplyBody::Success(value),
        }
    }

    #[must_use]
    pub fn exception(seq_id: u64, kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            seq_id,
            body: ReplyBody::Exception {
                kind,
                message: message.into(),
            },
        }
    }

    #[must_use]
    pub fn is_exception(&self) -> bool {
        matches!(self.body, ReplyBody::Exception { .. })
    }
}
