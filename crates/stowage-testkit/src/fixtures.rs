//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::path::Path;

use stowage::{StoreConfig, StoreManager};
use stowage_migrate::{Migration, MigrationSet, STATEMENT_BREAKPOINT};
use tempfile::TempDir;

/// Three scripts, each creating one table.
pub fn demo_migrations() -> MigrationSet {
    MigrationSet::new([
        Migration::new(
            1,
            "contact",
            "CREATE TABLE contact (
                id INTEGER PRIMARY KEY,
                first TEXT NOT NULL,
                last TEXT,
                avatar TEXT,
                favorite BOOLEAN NOT NULL DEFAULT 0
            );",
        ),
        Migration::new(
            2,
            "organizations",
            "CREATE TABLE organizations (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                employees INTEGER
            );",
        ),
        Migration::new(
            3,
            "branches",
            "CREATE TABLE branches (
                id INTEGER PRIMARY KEY,
                organization_id INTEGER NOT NULL REFERENCES organizations(id),
                city TEXT NOT NULL
            );",
        ),
    ])
    .expect("demo migrations are valid")
}

/// Script `i` creates table `t{i}`.
pub fn create_table(id: u64) -> Migration {
    Migration::new(
        id,
        format!("t{}", id),
        format!("CREATE TABLE t{} (id INTEGER PRIMARY KEY, v TEXT);", id),
    )
}

/// `n` scripts with ids `1..=n`, each creating one table.
pub fn numbered_migrations(n: u64) -> MigrationSet {
    MigrationSet::new((1..=n).map(create_table)).expect("numbered migrations are valid")
}

/// Like [`numbered_migrations`], but script `failing` creates its table and
/// then runs a statement that cannot succeed.
pub fn failing_migrations(n: u64, failing: u64) -> MigrationSet {
    MigrationSet::new((1..=n).map(|id| {
        if id == failing {
            Migration::new(
                id,
                format!("t{}", id),
                format!(
                    "CREATE TABLE t{id} (id INTEGER PRIMARY KEY, v TEXT);\n{bp}\nINSERT INTO no_such_table (id) VALUES (1);",
                    id = id,
                    bp = STATEMENT_BREAKPOINT
                ),
            )
        } else {
            create_table(id)
        }
    }))
    .expect("failing migrations are valid")
}

/// A manager over a temporary data directory.
///
/// The directory outlives managers created with [`TestStore::reopen`], which
/// simulates a process restart.
pub struct TestStore {
    pub dir: TempDir,
    pub manager: StoreManager,
}

impl TestStore {
    pub fn new(migrations: MigrationSet) -> Self {
        Self::with_config(migrations, |config| config)
    }

    /// Customize the persistent configuration before the manager is built.
    pub fn with_config(
        migrations: MigrationSet,
        configure: impl FnOnce(StoreConfig) -> StoreConfig,
    ) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let config = configure(StoreConfig::persistent(dir.path()));
        Self {
            manager: StoreManager::new(config, migrations),
            dir,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh manager (as after a restart) over the same directory.
    pub fn reopen(&self, migrations: MigrationSet) -> StoreManager {
        StoreManager::new(self.manager.config().clone(), migrations)
    }
}
