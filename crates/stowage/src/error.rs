//! Error types for Stowage.

use std::time::Duration;

use stowage_migrate::MigrationError;
use stowage_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the store manager and sessions.
///
/// Cloneable: every caller attached to one in-flight transition receives
/// the same error.
#[derive(Debug, Clone, Error)]
pub enum StowageError {
    /// Storage, ledger or migration failure.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Invalid migration definitions.
    #[error("migration definition error: {0}")]
    Migration(#[from] MigrationError),

    /// Logical store names are 1..=64 chars of `[A-Za-z0-9_-]` and do not
    /// end in `-dev`.
    #[error("invalid store name: {0:?}")]
    InvalidStoreName(String),

    /// Collection and column names must be plain identifiers.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// The caller stopped waiting; the transition keeps running.
    #[error("store {name} not ready after {after:?}")]
    Timeout { name: String, after: Duration },

    /// A previous reset failed; reset must be retried first.
    #[error("store {name} has an incomplete reset; retry the reset")]
    ResetIncomplete { name: String },

    /// The task driving a transition ended without reporting an outcome.
    #[error("transition for store {name} was aborted")]
    TransitionAborted { name: String },

    /// A record could not be converted to or from a row.
    #[error("record error: {0}")]
    Record(String),
}

impl From<serde_json::Error> for StowageError {
    fn from(e: serde_json::Error) -> Self {
        StowageError::Record(e.to_string())
    }
}

/// Result type for Stowage operations.
pub type Result<T> = std::result::Result<T, StowageError>;
