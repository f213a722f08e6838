//! Error types for migration script definitions.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::types::MigrationId;

/// Errors raised while building or loading a migration script set.
///
/// All of these are configuration failures: they are detected before any
/// script touches a store.
#[derive(Debug, Clone, Error)]
pub enum MigrationError {
    /// Two scripts share the same id.
    #[error("duplicate migration id: {0}")]
    DuplicateId(MigrationId),

    /// The id does not fit the ledger's signed 64-bit column.
    #[error("migration id {0} is out of range")]
    IdOutOfRange(u64),

    /// A script has an empty name.
    #[error("migration {0} has an empty name")]
    EmptyName(MigrationId),

    /// A script file name does not follow `<id>_<name>.sql`.
    #[error("invalid migration file name: {}", .0.display())]
    InvalidFileName(PathBuf),

    /// A fingerprint string is not 64 hex characters.
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    /// A JSON bundle could not be parsed or written.
    #[error("bundle error: {0}")]
    Bundle(String),

    /// I/O error while reading a migrations directory.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for MigrationError {
    fn from(e: std::io::Error) -> Self {
        MigrationError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(e: serde_json::Error) -> Self {
        MigrationError::Bundle(e.to_string())
    }
}

/// Result type for migration definition operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
