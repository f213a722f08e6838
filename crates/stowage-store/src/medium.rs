//! Storage media: where a store's engine instance physically lives.
//!
//! A medium opens the SQLite connection for a store name and destroys the
//! persisted instance on reset. The manager never touches files directly.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Default SQLite busy timeout.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Companion files SQLite may create next to a database.
const COMPANION_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// Where engine instances are opened and destroyed.
#[async_trait]
pub trait StorageMedium: Send + Sync {
    /// Open (creating if needed) the engine instance for `name`.
    ///
    /// Fails with [`StoreError::StorageOpen`] if the medium is unavailable
    /// or the existing instance is corrupt.
    async fn open(&self, name: &str) -> Result<Connection>;

    /// Destroy every persisted trace of `name`. Succeeds if nothing exists.
    ///
    /// Fails with [`StoreError::Reset`] if any part could not be removed.
    async fn destroy(&self, name: &str) -> Result<()>;

    /// Whether a persisted instance exists for `name`.
    async fn exists(&self, name: &str) -> Result<bool>;
}

/// One SQLite file per store inside a directory.
#[derive(Debug, Clone)]
pub struct DirectoryMedium {
    root: PathBuf,
    busy_timeout: Duration,
}

impl DirectoryMedium {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the database file for `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.sqlite3", name))
    }
}

#[async_trait]
impl StorageMedium for DirectoryMedium {
    async fn open(&self, name: &str) -> Result<Connection> {
        let root = self.root.clone();
        let path = self.path_for(name);
        let busy_timeout = self.busy_timeout;
        let name = name.to_string();

        tokio::task::spawn_blocking(move || {
            let open_err = |reason: String| StoreError::StorageOpen {
                name: name.clone(),
                reason,
            };

            fs::create_dir_all(&root)
                .map_err(|e| open_err(format!("{}: {}", root.display(), e)))?;

            let conn = Connection::open(&path).map_err(|e| open_err(e.to_string()))?;
            conn.busy_timeout(busy_timeout)
                .map_err(|e| open_err(e.to_string()))?;

            // The first statement reads the header; a corrupt file fails here.
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| open_err(e.to_string()))?;
            conn.pragma_update(None, "foreign_keys", "ON")
                .map_err(|e| open_err(e.to_string()))?;
            conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|e| open_err(e.to_string()))?;

            tracing::debug!(store = %name, path = %path.display(), "opened database file");
            Ok(conn)
        })
        .await?
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        let name = name.to_string();

        tokio::task::spawn_blocking(move || {
            let mut targets = vec![path.clone()];
            for suffix in COMPANION_SUFFIXES {
                let mut companion = path.clone().into_os_string();
                companion.push(suffix);
                targets.push(PathBuf::from(companion));
            }

            for target in targets {
                match fs::remove_file(&target) {
                    Ok(()) => tracing::debug!(store = %name, path = %target.display(), "removed"),
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(StoreError::Reset {
                            name,
                            reason: format!("{}: {}", target.display(), e),
                        })
                    }
                }
            }

            Ok(())
        })
        .await?
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.path_for(name).exists())
    }
}

/// Non-persistent medium: every open yields a fresh in-memory database.
///
/// Closing the engine discards its data, so `destroy` has nothing to do.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium;

impl MemoryMedium {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageMedium for MemoryMedium {
    async fn open(&self, name: &str) -> Result<Connection> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::StorageOpen {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    async fn destroy(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }
}
