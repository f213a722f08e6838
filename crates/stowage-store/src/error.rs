//! Error types for the store module.

use std::sync::Arc;

use stowage_migrate::{Fingerprint, MigrationError, MigrationId};
use thiserror::Error;

/// Errors that can occur during store operations.
///
/// Cloneable so one failed transition can be reported to every caller
/// attached to it; foreign errors are shared behind `Arc`.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The storage medium is unavailable or the file is corrupt.
    #[error("cannot open store {name}: {reason}")]
    StorageOpen { name: String, reason: String },

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(Arc<rusqlite::Error>),

    /// A migration script failed; nothing from it was committed.
    #[error("migration {id} ({name}) failed: {cause}")]
    MigrationApply {
        id: MigrationId,
        name: String,
        #[source]
        cause: Arc<rusqlite::Error>,
    },

    /// An applied migration no longer matches its script.
    #[error("migration {id} was edited after it was applied: recorded {recorded}, current {current}")]
    MigrationDrift {
        id: MigrationId,
        recorded: Fingerprint,
        current: Fingerprint,
    },

    /// The ledger records a migration the script set does not contain.
    #[error("migration {id} is recorded as applied but has no script")]
    OrphanedMigration { id: MigrationId },

    /// A ledger row could not be decoded.
    #[error("corrupt ledger: {0}")]
    CorruptLedger(String),

    /// The engine behind a handle has been torn down.
    #[error("store {name} was reset; the handle is stale")]
    StaleHandle { name: String },

    /// Teardown did not complete; storage may still hold data.
    #[error("reset of store {name} failed: {reason}")]
    Reset { name: String, reason: String },

    /// Invalid migration definition.
    #[error("migration definition error: {0}")]
    Migration(#[from] MigrationError),

    /// A blocking storage task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(Arc::new(e))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(Arc::new(e))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Task(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
