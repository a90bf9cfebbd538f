//! Error types for vaultdb

use crate::model::Hash;
use thiserror::Error;

/// Result type alias for vaultdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in vaultdb operations
///
/// Every condition a caller may want to react to has its own variant, so
/// retry logic never has to inspect message text.
#[derive(Error, Debug)]
pub enum Error {
    /// The backing store could not be read or written. Retryable.
    #[error("Object store unavailable: {0}")]
    StoreUnavailable(#[from] std::io::Error),

    /// Another handle holds the database file open. Retryable once it closes.
    #[error("Database is locked by another handle: {}", .0.display())]
    StoreLocked(std::path::PathBuf),

    #[error("Object not found: {0}")]
    ObjectNotFound(Hash),

    /// Stored content does not hash to the requested id. Never retried.
    #[error("Corrupt object: {0}")]
    CorruptObject(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ref not found: {0}")]
    RefNotFound(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Duplicate entry key: {0}")]
    DuplicateEntryKey(String),

    /// The entry exists but is a List where a Vault was expected, or vice versa
    #[error("Entry kind mismatch at: {0}")]
    EntryKindMismatch(String),

    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    /// Another writer advanced the ref first. Re-checkout and retry.
    #[error("Ref '{name}' moved: expected {expected:?}, found {actual:?}")]
    RefConflict {
        name: String,
        expected: Option<Hash>,
        actual: Option<Hash>,
    },

    #[error("No common ancestor between merge participants")]
    NoCommonAncestor,

    #[error("Merge conflict on key: {0}")]
    Conflict(String),

    #[error("Invalid database file: {0}")]
    InvalidFile(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the caller may reasonably retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::StoreLocked(_) | Error::RefConflict { .. }
        )
    }
}
