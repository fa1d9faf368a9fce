//! `Harbor` core: RPC value model, protocol codecs, transports and the processor contract.

pub mod client;
pub mod messages;
pub mod protocol;
pub mod traits;
pub mod transport;
pub mod value;

pub use client::{Client, ClientError};
pub use messages::{ExceptionKind, Reply, ReplyBody, Request};
pub use protocol::{Protocol, ProtocolError, ProtocolKind};
pub use traits::Processor;
pub use transport::{Transport, TransportError, TransportKind};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_processors() {
        let echo = |req: Request| Reply::success(req.seq_id, Value::Array(req.args));
        let reply = echo.process(Request::new(4, "echo", vec![Value::Int(1)]));
        assert_eq!(reply, Reply::success(4, Value::Array(vec![Value::Int(1)])));
    }
}
