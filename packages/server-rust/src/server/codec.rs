//! `tokio-util` codec adapter over the sans-IO [`Transport`].

use bytes::BytesMut;
use harbor_core::{Reply, Request, Transport, TransportError};
use tokio_util::codec::{Decoder, Encoder};

/// Server-side codec: decodes requests, encodes replies.
#[derive(Debug, Clone, Copy)]
pub struct RpcCodec {
    transport: Transport,
}

impl RpcCodec {
    #[must_use]
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }
}

impl Decoder for RpcCodec {
    type Item = Request;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>, TransportError> {
        self.transport.decode_from(src)
    }
}

impl Encoder<Reply> for RpcCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), TransportError> {
        self.transport.encode_into(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use harbor_core::{Protocol, ProtocolKind, TransportKind, Value};

    use super::*;

    #[test]
    fn partial_frame_waits_for_rest() {
        let transport = Transport::new(TransportKind::Framed, Protocol::new(ProtocolKind::Compact));
        let bytes = transport
            .encode(&Request::new(1, "ping", vec![Value::Int(5)]))
            .unwrap();
        let mut codec = RpcCodec::new(transport);

        let mut buf = BytesMut::from(&bytes[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[3..]);
        let request = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(request.method, "ping");
        assert!(buf.is_empty());
    }

    #[test]
    fn encodes_length_prefixed_reply() {
        let transport = Transport::new(TransportKind::Framed, Protocol::new(ProtocolKind::Json));
        let mut codec = RpcCodec::new(transport);
        let mut dst = BytesMut::new();
        codec.encode(Reply::success(1, Value::from("pong")), &mut dst).unwrap();
        let len = u32::from_be_bytes([dst[0], dst[1], dst[2], dst[3]]) as usize;
        assert_eq!(len, dst.len() - 4);
    }
}
