//! Error types for SFTP protocol operations
//!
//! One unified error type covers both halves of the core: wire-level
//! failures that are fatal to a session, and per-request status failures
//! reported by the peer that are not.

use super::types::StatusCode;
use std::fmt;
use std::io;

/// Result type for SFTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// SFTP protocol errors
#[derive(Debug)]
pub enum Error {
    /// Underlying stream or local file I/O failed
    Io(io::Error),

    /// Malformed packet: frame overrun, underrun, or invalid field.
    /// Fatal to the session that produced it.
    BadMessage(String),

    /// Protocol violation other than a malformed packet (unexpected
    /// response kind, unknown request id, handshake failure)
    Protocol(String),

    /// The peer reported a per-request failure via SSH_FXP_STATUS
    Status {
        /// Status code carried by the response
        code: StatusCode,
        /// Human-readable message carried by the response
        message: String,
    },

    /// The session ended while requests were outstanding
    ConnectionLost,

    /// Operation attempted on a session that was already shut down
    SessionClosed,

    /// Invalid configuration
    Config(String),
}

impl Error {
    /// Builds a status error from a code, using the code's canonical
    /// message when the peer supplied none.
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.is_empty() {
            code.message().to_string()
        } else {
            message
        };
        Error::Status { code, message }
    }

    /// Status code carried by this error, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Error::Status { code, .. } => Some(*code),
            Error::ConnectionLost => Some(StatusCode::ConnectionLost),
            _ => None,
        }
    }

    /// True when the error means the whole session is unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::BadMessage(_)
                | Error::Protocol(_)
                | Error::ConnectionLost
                | Error::SessionClosed
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::BadMessage(msg) => write!(f, "bad message: {}", msg),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::Status { code, message } => {
                write!(f, "SFTP status {}: {}", *code as u32, message)
            }
            Error::ConnectionLost => write!(f, "connection lost"),
            Error::SessionClosed => write!(f, "session closed"),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_fills_canonical_message() {
        let err = Error::status(StatusCode::NoSuchFile, "");
        assert_eq!(
            err.to_string(),
            "SFTP status 2: No such file or directory"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::ConnectionLost.is_fatal());
        assert!(Error::BadMessage("truncated".into()).is_fatal());
        assert!(!Error::status(StatusCode::PermissionDenied, "no").is_fatal());
    }
}
