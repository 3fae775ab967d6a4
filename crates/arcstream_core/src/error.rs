//! Error types for arcstream

use std::fmt;
use thiserror::Error;

/// Namespace prefix used when an error code is shown to a host.
pub const ERROR_NAMESPACE: &str = "arcstream";

/// Main error type for archive operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error (couldn't create archive): {0}")]
    HandleCreation(String),

    #[error("archive handle used after close")]
    HandleClosed,

    #[error("entry count mismatch: {entries} entries but {contents} contents")]
    EntryCountMismatch { entries: usize, contents: usize },

    #[error("invalid archive options: {0}")]
    InvalidOptions(String),

    #[error("{0}: unsupported encoding")]
    UnsupportedEncoding(String),

    #[error("{0}: Function not yet Implemented")]
    NotImplemented(&'static str),
}

/// Error codes reported to callers alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Generic internal error, used for every codec and stream failure
    Internal,
    EntryCount,
    InvalidOptions,
    UnsupportedEncoding,
    NotImplemented,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Internal => "ARCH9999",
            ErrorCode::EntryCount => "ARCH0001",
            ErrorCode::InvalidOptions => "ARCH0002",
            ErrorCode::UnsupportedEncoding => "ARCH0004",
            ErrorCode::NotImplemented => "ImplementationError",
        }
    }

    /// `arcstream:ARCH0004` style name
    pub fn qualified(&self) -> String {
        format!("{}:{}", ERROR_NAMESPACE, self.as_str())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Codec(_) | Error::Io(_) | Error::HandleCreation(_) | Error::HandleClosed => {
                ErrorCode::Internal
            }
            Error::EntryCountMismatch { .. } => ErrorCode::EntryCount,
            Error::InvalidOptions(_) => ErrorCode::InvalidOptions,
            Error::UnsupportedEncoding(_) => ErrorCode::UnsupportedEncoding,
            Error::NotImplemented(_) => ErrorCode::NotImplemented,
        }
    }

    pub(crate) fn codec(message: impl Into<String>) -> Self {
        Error::Codec(message.into())
    }
}

/// Result type alias for archive operations
pub type Result<T> = std::result::Result<T, Error>;
