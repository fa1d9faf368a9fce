//! Binds a protocol to a service facade.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use harbor_core::{ExceptionKind, Processor, Protocol, Reply, Request, Transport, TransportKind};

use crate::service::ServiceFacade;

/// The live request handler. Servers hold it behind an `ArcSwap` so reload
/// can replace it while connections keep the instance they captured.
#[derive(Debug, Clone)]
pub struct ServiceProcessor {
    facade: Arc<ServiceFacade>,
    protocol: Protocol,
}

impl ServiceProcessor {
    #[must_use]
    pub fn new(facade: Arc<ServiceFacade>, protocol: Protocol) -> Self {
        Self { facade, protocol }
    }

    #[must_use]
    pub fn facade(&self) -> &Arc<ServiceFacade> {
        &self.facade
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Transport of the given framing over this processor's protocol.
    #[must_use]
    pub fn transport(&self, kind: TransportKind) -> Transport {
        Transport::new(kind, self.protocol)
    }
}

impl Processor for ServiceProcessor {
    fn process(&self, request: Request) -> Reply {
        let started = Instant::now();
        let Request {
            seq_id,
            method,
            args,
        } = request;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.facade.dispatch(&method, &args)));
        let reply = match outcome {
            Ok(Ok(value)) => Reply::success(seq_id, value),
            Ok(Err(err)) => Reply::exception(seq_id, err.exception_kind(), err.to_string()),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(method = %method, seq_id, panic = %message, "handler panicked");
                Reply::exception(seq_id, ExceptionKind::Internal, format!("handler panicked: {message}"))
            }
        };

        let outcome = if reply.is_exception() { "exception" } else { "ok" };
        tracing::debug!(
            method = %method,
            seq_id,
            elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            outcome,
            "processed call"
        );
        reply
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use harbor_core::{ProtocolKind, ReplyBody, Value};

    use super::*;
    use crate::service::{DispatchError, DomainService, MethodTable, RegistrationError, SystemService};

    struct Panicky;

    impl DomainService for Panicky {
        fn name(&self) -> &'static str {
            "panicky"
        }

        fn register_methods(self: Arc<Self>, table: &mut MethodTable) -> Result<(), RegistrationError> {
            table.method("explode", |_| -> Result<Value, DispatchError> { panic!("kaboom") })?;
            Ok(())
        }
    }

    fn processor() -> ServiceProcessor {
        let facade = ServiceFacade::builder()
            .register(SystemService::new("app", "test"))
            .unwrap()
            .register(Panicky)
            .unwrap()
            .build();
        ServiceProcessor::new(Arc::new(facade), Protocol::new(ProtocolKind::Compact))
    }

    #[test]
    fn success_reply_keeps_seq_id() {
        let reply = processor().process(Request::new(9, "ping", vec![]));
        assert_eq!(reply, Reply::success(9, Value::from("pong")));
    }

    #[test]
    fn unknown_method_becomes_exception() {
        let reply = processor().process(Request::new(1, "missing", vec![]));
        match reply.body {
            ReplyBody::Exception { kind, message } => {
                assert_eq!(kind, ExceptionKind::UnknownMethod);
                assert!(message.contains("missing"));
            }
            ReplyBody::Success(_) => panic!("expected exception"),
        }
    }

    #[test]
    fn invalid_arguments_become_exception() {
        let reply = processor().process(Request::new(2, "server_info", vec![Value::Int(1)]));
        assert!(matches!(
            reply.body,
            ReplyBody::Exception { kind: ExceptionKind::InvalidArguments, .. }
        ));
    }

    #[test]
    fn panic_is_contained() {
        let processor = processor();
        let reply = processor.process(Request::new(3, "explode", vec![]));
        assert!(matches!(
            reply.body,
            ReplyBody::Exception { kind: ExceptionKind::Internal, ref message } if message.contains("kaboom")
        ));
        assert_eq!(
            processor.process(Request::new(4, "ping", vec![])),
            Reply::success(4, Value::from("pong"))
        );
    }

    #[test]
    fn transport_uses_processor_protocol() {
        let transport = processor().transport(TransportKind::Framed);
        assert_eq!(transport.protocol().kind(), ProtocolKind::Compact);
        assert_eq!(transport.kind(), TransportKind::Framed);
    }
}
