//! Error types shared by the local store and the remote gateway.
//!
//! Business-level errors (order validation, cash session rules, lifecycle
//! transitions) live next to the code that raises them.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::Collection;

/// Errors raised by [`crate::store::LocalStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file could not be opened, configured or migrated.
    /// Fatal to every local operation ("cannot save offline").
    #[error("Local storage unavailable at '{path}': {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },

    /// Insert collided with an existing key or unique index.
    #[error("Duplicate key '{key}' in {collection}")]
    DuplicateKey { collection: Collection, key: String },

    #[error("Collection {collection} has no index named '{index}'")]
    UnknownIndex {
        collection: Collection,
        index: String,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking worker running the query panicked or was cancelled,
    /// or the connection mutex was poisoned.
    #[error("Storage worker failed: {0}")]
    Worker(String),
}

/// Classified failure of a call to the remote backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Network failure, timeout, 5xx, 408 or 429. Retried on the next cycle.
    #[error("Remote temporarily unavailable: {0}")]
    Transient(String),

    /// 4xx rejection. Will not succeed unless the record changes.
    #[error("Remote rejected record (HTTP {status}): {message}")]
    Permanent { status: u16, message: String },
}

impl RemoteError {
    /// Classify an HTTP status code returned by the backend.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 => RemoteError::Transient(format!("{message} (HTTP {status})")),
            400..=499 => RemoteError::Permanent { status, message },
            _ => RemoteError::Transient(format!("{message} (HTTP {status})")),
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, RemoteError::Permanent { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Permanent { status, .. } => Some(*status),
            RemoteError::Transient(_) => None,
        }
    }
}
