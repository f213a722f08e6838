//! # Stowage
//!
//! Embedded-store lifecycle management: open a store, migrate it exactly
//! once, hand out sessions, and reset it back to nothing.
//!
//! ## Overview
//!
//! A [`StoreManager`] owns every logical store of a process:
//!
//! - **Open**: one engine instance per store name, never two
//! - **Migrate**: pending scripts applied in id order, each atomically with
//!   its ledger row
//! - **Ready**: a [`Session`] is handed out only once the schema is
//!   consistent
//! - **Reset**: engine and ledger destroyed; old sessions become stale
//!
//! Concurrent `get_store` calls for one name collapse onto a single
//! open-and-migrate pass and all observe its outcome.
//!
//! ## Key Types
//!
//! - [`StoreManager`] - Lifecycle of all stores in one process
//! - [`Session`] - Query and mutation surface of a ready store
//! - [`StoreConfig`] - Data directory, environment, timeouts
//! - [`LifecycleState`] - Uninitialized, Opening, Migrating, Ready, Failed, Resetting
//! - [`Filter`] - Equality predicates for select, update and delete
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stowage::{Filter, StoreConfig, StoreManager, Value};
//! use stowage::migrate::{Migration, MigrationSet};
//!
//! async fn example() {
//!     let migrations = MigrationSet::new([
//!         Migration::new(1, "contact", "CREATE TABLE contact (id INTEGER PRIMARY KEY, first TEXT);"),
//!     ])
//!     .unwrap();
//!
//!     let manager = StoreManager::new(StoreConfig::persistent("data"), migrations);
//!     let session = manager.get_store("contacts").await.unwrap();
//!
//!     session
//!         .insert("contact", &[("first", Value::Text("Ada".into()))])
//!         .await
//!         .unwrap();
//!     let rows = session.select("contact", &Filter::all()).await.unwrap();
//!     assert_eq!(rows.len(), 1);
//!
//!     manager.reset("contacts").await.unwrap();
//!     assert!(session.is_stale());
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `stowage::migrate` - Migration scripts and sets
//! - `stowage::store` - Engine, ledger, executor and storage media

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod record;
pub mod reset;
pub mod session;

pub use stowage_migrate as migrate;
pub use stowage_store as store;

pub use config::{Environment, StoreConfig, MAX_NAME_LEN};
pub use error::{Result, StowageError};
pub use lifecycle::{LifecycleState, StoreManager};
pub use record::Filter;
pub use session::Session;

pub use stowage_migrate::{Migration, MigrationId, MigrationSet};
pub use stowage_store::{LedgerEntry, MigrationReport, Row, StoreError, Value};
