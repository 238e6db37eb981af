//! Shared error type across hitpoints crates.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Stable, low-cardinality error codes (used as metric labels and log fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid or inconsistent configuration.
    Config,
    /// Filesystem failure.
    Io,
    /// JSON encode/decode failure.
    Serialize,
    /// Storage backend rejected or failed the archive.
    Storage,
    /// An operation exceeded its deadline.
    Timeout,
    /// Anything else.
    Internal,
}

impl ErrorCode {
    /// String representation used in labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Config => "CONFIG",
            ErrorCode::Io => "IO",
            ErrorCode::Serialize => "SERIALIZE",
            ErrorCode::Storage => "STORAGE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, HitError>;

/// Unified error type used by core and server.
#[derive(Debug, Error)]
pub enum HitError {
    #[error("invalid config: {0}")]
    Config(String),
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("storage: {0}")]
    Storage(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("internal: {0}")]
    Internal(String),
}

impl HitError {
    /// Wrap an `io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HitError::Io {
            path: path.into(),
            source,
        }
    }

    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            HitError::Config(_) => ErrorCode::Config,
            HitError::Io { .. } => ErrorCode::Io,
            HitError::Serialize(_) => ErrorCode::Serialize,
            HitError::Storage(_) => ErrorCode::Storage,
            HitError::Timeout(_) => ErrorCode::Timeout,
            HitError::Internal(_) => ErrorCode::Internal,
        }
    }
}
