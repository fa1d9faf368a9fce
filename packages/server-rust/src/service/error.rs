//! Dispatch and registration failures.

use harbor_core::ExceptionKind;

/// Failure of a single call. The processor turns it into an exception
/// reply; it never takes the server down.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown method `{name}`")]
    UnknownMethod { name: String },
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Service(#[from] anyhow::Error),
}

impl DispatchError {
    /// Exception category reported to the client.
    #[must_use]
    pub fn exception_kind(&self) -> ExceptionKind {
        match self {
            DispatchError::UnknownMethod { .. } => ExceptionKind::UnknownMethod,
            DispatchError::InvalidArguments(_) => ExceptionKind::InvalidArguments,
            DispatchError::Service(_) => ExceptionKind::Internal,
        }
    }
}

/// Conflicts detected while assembling a facade.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("method `{method}` from service `{service}` is already provided by `{existing}`")]
    DuplicateMethod {
        method: String,
        service: &'static str,
        existing: &'static str,
    },
    #[error("service `{name}` is already registered")]
    DuplicateService { name: &'static str },
}
