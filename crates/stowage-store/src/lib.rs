//! # Stowage Store
//!
//! The storage engine handle, migration ledger and migration executor for
//! Stowage.
//!
//! ## Overview
//!
//! Each store is one SQLite database opened through a [`StorageMedium`]
//! and wrapped by an [`Engine`]. The [`ledger`] lives inside that same
//! database, and the [`MigrationExecutor`] writes each ledger row in the
//! transaction that applies the corresponding script, so "migration ran"
//! and "migration is recorded" can never disagree.
//!
//! ## Key Types
//!
//! - [`Engine`] - Owning handle to one store's connection
//! - [`StorageMedium`] - Where engines are opened and destroyed
//! - [`DirectoryMedium`] - One SQLite file per store in a directory
//! - [`MemoryMedium`] - Non-persistent stores for tests
//! - [`MigrationExecutor`] - Applies pending scripts
//! - [`LedgerEntry`] - One applied migration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stowage_migrate::{Migration, MigrationSet};
//! use stowage_store::{DirectoryMedium, Engine, MigrationExecutor, StorageMedium};
//!
//! async fn example() {
//!     let medium = DirectoryMedium::new("data");
//!     let engine = Engine::new("demo", medium.open("demo").await.unwrap(), false);
//!
//!     let set = Arc::new(MigrationSet::new([
//!         Migration::new(1, "contact", "CREATE TABLE contact (id INTEGER PRIMARY KEY);"),
//!     ]).unwrap());
//!
//!     let report = MigrationExecutor::new().reconcile(&engine, set).await.unwrap();
//!     assert_eq!(report.applied.len(), 1);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **One transaction per script**: statements and ledger row commit together
//! - **Plan before apply**: drift and orphans fail the pass before any write
//! - **Stale after close**: a closed engine rejects every operation

pub mod engine;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod medium;

pub use engine::{query_rows, Engine, Row};
pub use error::{Result, StoreError};
pub use executor::{plan, ExecutorStats, MigrationExecutor, MigrationPlan, MigrationReport};
pub use ledger::{LedgerEntry, LEDGER_TABLE};
pub use medium::{DirectoryMedium, MemoryMedium, StorageMedium, DEFAULT_BUSY_TIMEOUT};

pub use rusqlite::types::Value;
pub use rusqlite::Transaction;
