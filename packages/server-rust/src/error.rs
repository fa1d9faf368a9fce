//! Error taxonomy for boot, serving, and reload.
//!
//! Per-request failures live in [`crate::service::DispatchError`] and never
//! reach these types: the processor turns them into exception replies.

use std::io;
use std::path::PathBuf;

use crate::cache::CacheError;
use crate::service::RegistrationError;

/// Configuration could not be loaded or failed validation. Fatal at boot.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration")]
    Source(#[from] config::ConfigError),
    #[error("failed to list initializers in {}", path.display())]
    Initializers {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failure of the accept/serve loop. Logged and returned; never retried here.
#[derive(Debug, thiserror::Error)]
pub enum ServeLoopError {
    #[error("failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("accept failed")]
    Accept(#[source] io::Error),
    #[error("serve loop task failed: {0}")]
    Join(String),
    #[error("serve called before a successful start")]
    NotStarted,
}

/// Anything that aborts process start or a lifecycle transition.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error(transparent)]
    Config(#[from] ConfigLoadError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error("failed to open log sink {}", path.display())]
    Logger {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Serve(#[from] ServeLoopError),
    #[error("a server is already registered for this process")]
    ServerAlreadyRunning,
    #[error("invalid supervisor state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },
    #[error("service builder failed")]
    ServiceBuilder(#[source] anyhow::Error),
    #[error("initializer `{name}` failed")]
    Initializer {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Renders an error with its full `source()` chain on one line.
#[must_use]
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        current = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_includes_sources() {
        let err = ServeLoopError::Bind {
            addr: "127.0.0.1:1".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        };
        let rendered = error_chain(&err);
        assert!(rendered.starts_with("failed to bind 127.0.0.1:1"));
        assert!(rendered.ends_with(": address in use"));
    }

    #[test]
    fn invalid_state_message() {
        let err = BootError::InvalidState {
            expected: "uninitialized",
            found: "serving",
        };
        assert_eq!(
            err.to_string(),
            "invalid supervisor state: expected uninitialized, found serving"
        );
    }
}
