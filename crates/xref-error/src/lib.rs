//! Error type shared by every `xref` crate.
//!
//! Validation failures (`InvalidFormat`, `UnsupportedTool`, `MissingKey`) are
//! caller bugs and are always returned synchronously. Storage failures split
//! into I/O failures, which surface to the caller, and corrupted state, which
//! the persistence layer absorbs through backup recovery.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = XrefError> = std::result::Result<T, E>;

/// Coarse classification of an [`XrefError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Internal identifier does not match the required shape.
    InvalidFormat,
    /// Tool name is not one of the supported identifier schemes.
    UnsupportedTool,
    /// Keyed tool invoked without a project/team key.
    MissingKey,
    /// Lock acquisition or disk I/O failed outright.
    IoFailure,
    /// Table contents failed validation.
    CorruptedState,
    /// Configuration could not be parsed.
    Config,
    /// An internal invariant was violated.
    Internal,
}

#[derive(Debug, Error)]
pub enum XrefError {
    #[error("invalid internal id '{id}': {reason}")]
    InvalidFormat { id: String, reason: String },

    #[error("unsupported tool '{tool}' (expected one of: jira, azure_devops, linear, github)")]
    UnsupportedTool { tool: String },

    #[error("tool '{tool}' requires a project/team key")]
    MissingKey { tool: String },

    #[error("i/o error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {waited_ms}ms waiting for lock {path:?}")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("corrupted state at {path:?}: {detail}")]
    CorruptedState { path: PathBuf, detail: String },

    #[error("failed to encode table: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl XrefError {
    pub fn invalid_format(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupted(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::CorruptedState {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidFormat { .. } => ErrorKind::InvalidFormat,
            Self::UnsupportedTool { .. } => ErrorKind::UnsupportedTool,
            Self::MissingKey { .. } => ErrorKind::MissingKey,
            Self::Io { .. } | Self::LockTimeout { .. } | Self::Serialize(_) => {
                ErrorKind::IoFailure
            }
            Self::CorruptedState { .. } => ErrorKind::CorruptedState,
            Self::Config { .. } => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error reports a malformed caller argument.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidFormat | ErrorKind::UnsupportedTool | ErrorKind::MissingKey
        )
    }
}
