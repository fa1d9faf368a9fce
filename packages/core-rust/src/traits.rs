use crate::messages::{Reply, Request};

/// Decodes-dispatches-encodes seam between a transport and application code.
///
/// Servers hand every decoded `Request` of a connection to one processor,
/// in arrival order, and write back the `Reply` it returns. Implementations
/// must turn every failure into an exception reply; a processor never fails
/// the connection on behalf of a single bad request.
pub trait Processor: Send + Sync + 'static {
    /// Handle one request. Called from worker threads or reactor tasks.
    fn process(&self, request: Request) -> Reply;
}

impl<F> Processor for F
where
    F: Fn(Request) -> Reply + Send + Sync + 'static,
{
    fn process(&self, request: Request) -> Reply {
        self(request)
    }
}
