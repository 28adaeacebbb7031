//! Error types for rangeflow-transfer.

use std::fmt;
use std::io;

use thiserror::Error;

/// Boxed error carried by transport and source failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of a failed transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request never completed (DNS, connection reset, timeout, ...).
    Connectivity,
    /// The remote end refused the request (invalid range, size conflict, ...).
    Rejected,
    /// The transport aborted the call on its own cancellation signal.
    Cancelled,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Connectivity => write!(f, "connectivity"),
            TransportErrorKind::Rejected => write!(f, "rejected"),
            TransportErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("transport failure ({kind}): {source}")]
    Transport {
        kind:   TransportErrorKind,
        #[source]
        source: BoxError,
    },

    #[error("download incomplete: stream ended at offset {position}, expected {end}")]
    Truncated { position: u64, end: u64 },

    #[error("received data past the end of the range: offset {position} exceeds {end}")]
    UnexpectedData { position: u64, end: u64 },

    #[error("source stream failed: {0}")]
    Source(#[source] BoxError),

    #[error("source is larger than the declared size of {size} bytes")]
    SourceTooLarge { size: u64 },

    #[error("source ended early: expected {expected} bytes, got {actual}")]
    SourceTooShort { expected: u64, actual: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub fn connectivity(source: impl Into<BoxError>) -> Self {
        Error::Transport {
            kind:   TransportErrorKind::Connectivity,
            source: source.into(),
        }
    }

    pub fn rejected(source: impl Into<BoxError>) -> Self {
        Error::Transport {
            kind:   TransportErrorKind::Rejected,
            source: source.into(),
        }
    }

    pub fn source_failed(source: impl Into<BoxError>) -> Self { Error::Source(source.into()) }

    /// Returns `true` for caller-side parameter errors detected before any I/O.
    pub fn is_validation(&self) -> bool { matches!(self, Error::InvalidArgument { .. }) }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Cancelled
                | Error::Transport {
                    kind: TransportErrorKind::Cancelled,
                    ..
                }
        )
    }
}
