//! Centralized error types for spamprep.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::content::TransferEncoding;
use crate::model::payload::UnitState;

/// A message could not be split into headers and payload units.
///
/// Unrecoverable for that one message: callers log it and move on to the next.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No recognizable header block or MIME boundary framing.
    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// A single payload unit could not be decoded to text.
///
/// Recoverable at unit granularity: the unit keeps no decoded text and is
/// excluded from anonymization, the rest of the message proceeds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The transfer encoding's alphabet was violated.
    #[error("Malformed {encoding} payload: {reason}")]
    MalformedEncoding {
        encoding: TransferEncoding,
        reason: String,
    },

    /// The charset label does not resolve to a known encoding.
    #[error("Unsupported charset: {0}")]
    UnsupportedCharset(String),
}

/// All errors produced by the spamprep library.
#[derive(Error, Debug)]
pub enum PrepError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// An invalid path was provided.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The message structure could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A payload unit could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A payload unit operation was called in a state that does not allow it.
    #[error("Cannot {operation} a payload unit in state {state}")]
    InvalidTransition {
        state: UnitState,
        operation: &'static str,
    },

    /// Invalid configuration (blocklist file, pattern, option value).
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, PrepError>`.
pub type Result<T> = std::result::Result<T, PrepError>;

impl PrepError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `PrepError::io`).
impl From<std::io::Error> for PrepError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
