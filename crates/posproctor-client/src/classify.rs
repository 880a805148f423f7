//! Failure classification.
//!
//! Every way a poll can fail is a [`QueryFailure`]; [`classify`] maps it
//! onto exactly one [`ErrorKind`]. The mapping is a pure function of the
//! failure value, so identical failures always classify identically.

use std::io;
use std::time::Duration;

use thiserror::Error;

use posproctor_core::ErrorKind;

/// Why one diagnostic exchange failed.
#[derive(Debug, Error)]
pub enum QueryFailure {
    /// TCP connect failed (refused, unreachable, reset, ...).
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("tls handshake with {address} failed: {source}")]
    Tls {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The whole exchange exceeded its ceiling.
    #[error("no complete response within {0:?}")]
    Timeout(Duration),

    /// Non-2xx response.
    #[error("http status {status} for cmd={command}")]
    Status { command: &'static str, status: u16 },

    /// The controller answered but refused the credentials.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("http exchange failed: {0}")]
    Http(#[from] hyper::Error),

    /// Body undecodable against the expected document schema.
    #[error("malformed {document} document: {message}")]
    Malformed {
        document: &'static str,
        message: String,
    },

    #[error("invalid request: {0}")]
    Request(String),
}

impl QueryFailure {
    pub fn malformed(document: &'static str, message: impl Into<String>) -> Self {
        QueryFailure::Malformed {
            document,
            message: message.into(),
        }
    }
}

/// Map a failure onto its canonical kind. Total and deterministic.
pub fn classify(failure: &QueryFailure) -> ErrorKind {
    match failure {
        QueryFailure::Connect { source, .. } => match source.kind() {
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::Connection,
        },
        QueryFailure::Tls { .. } => ErrorKind::Connection,
        QueryFailure::Timeout(_) => ErrorKind::Timeout,
        QueryFailure::Status { status: 401 | 403, .. } => ErrorKind::Auth,
        QueryFailure::Status { .. } => ErrorKind::Unknown,
        QueryFailure::AuthRejected(_) => ErrorKind::Auth,
        QueryFailure::Http(e) => {
            if e.is_timeout() {
                ErrorKind::Timeout
            } else if e.is_closed() || e.is_incomplete_message() {
                ErrorKind::Connection
            } else {
                ErrorKind::Unknown
            }
        }
        QueryFailure::Malformed { .. } => ErrorKind::Parse,
        QueryFailure::Request(_) => ErrorKind::Unknown,
    }
}
