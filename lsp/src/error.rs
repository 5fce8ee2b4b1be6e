//! Error types for the client runtime.
//!
//! Each layer has its own enum and the outer ones wrap the inner ones with
//! `#[from]`, so a caller can match on exactly the failure it cares about.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::codec::TransportError;
use crate::message::RemoteError;
use crate::process::{ExitReason, StartupError};
use crate::protocol::PathToUriError;
use crate::state::ConnectionState;

/// Why a connection reached `Terminated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The server closed its output stream.
    StreamClosed,
    ReadFailed(String),
    WriteFailed(String),
    ProcessExited(ExitReason),
    Startup(String),
    Handshake(String),
    /// Orderly shutdown requested by the client.
    Shutdown,
}

impl TerminationReason {
    /// True for every reason except an orderly client shutdown.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Shutdown)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamClosed => f.write_str("server closed its output stream"),
            Self::ReadFailed(e) => write!(f, "read from server failed: {e}"),
            Self::WriteFailed(e) => write!(f, "write to server failed: {e}"),
            Self::ProcessExited(reason) => write!(f, "server process exited ({reason})"),
            Self::Startup(e) => write!(f, "server failed to start: {e}"),
            Self::Handshake(e) => write!(f, "handshake failed: {e}"),
            Self::Shutdown => f.write_str("connection shut down"),
        }
    }
}

/// Failure of a single request/response exchange.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("server died: {0}")]
    ServerDied(TerminationReason),
    #[error("{method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RequestError {
    #[must_use]
    pub fn is_server_died(&self) -> bool {
        matches!(self, Self::ServerDied(_))
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("initialize result has no capabilities object")]
    MissingCapabilities,
    #[error("server capabilities do not declare textDocumentSync")]
    MissingTextDocumentSync,
    #[error("server rejected initialize: {0}")]
    Rejected(RemoteError),
    #[error("initialize result is not an object: {0}")]
    InvalidResult(String),
    #[error("initialize was already sent on this connection")]
    AlreadyInitialized,
    #[error("connection is {0}, expected initializing")]
    NotInitializing(ConnectionState),
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Failure to bring a connection up.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

impl ClientError {
    #[must_use]
    pub fn is_server_died(&self) -> bool {
        matches!(
            self,
            Self::Handshake(HandshakeError::Request(RequestError::ServerDied(_)))
        )
    }
}

/// Failure of a semantic query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("connection is not ready (state: {state})")]
    NotReady { state: ConnectionState },
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    InvalidPath(#[from] PathToUriError),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected {method} result: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_reason_display() {
        let reason = TerminationReason::ProcessExited(ExitReason::Code(1));
        assert_eq!(reason.to_string(), "server process exited (exit code 1)");
        assert!(reason.is_failure());
        assert!(!TerminationReason::Shutdown.is_failure());
    }

    #[test]
    fn test_remote_error_passes_through() {
        let err = RequestError::from(RemoteError::new(-32602, "bad position"));
        assert_eq!(err.to_string(), "server error -32602: bad position");
        assert!(!err.is_server_died());
    }

    #[test]
    fn test_client_error_detects_server_death() {
        let err = ClientError::from(HandshakeError::from(RequestError::ServerDied(
            TerminationReason::StreamClosed,
        )));
        assert!(err.is_server_died());
        let err = ClientError::from(HandshakeError::MissingCapabilities);
        assert!(!err.is_server_died());
    }
}
