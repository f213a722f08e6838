//! # Stowage Testkit
//!
//! Testing utilities for Stowage.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Script sets and temporary stores for integration tests
//! - **Media**: A storage medium wrapper that injects delays and failures
//! - **Generators**: Proptest strategies for migration sets
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use stowage_testkit::fixtures::{demo_migrations, TestStore};
//!
//! async fn example() {
//!     let store = TestStore::new(demo_migrations());
//!     let session = store.manager.get_store("demo").await.unwrap();
//!     assert_eq!(session.collections().await.unwrap().len(), 3);
//! }
//! ```
//!
//! ## Fault Injection
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use stowage::{StoreConfig, StoreManager};
//! use stowage_testkit::fixtures::demo_migrations;
//! use stowage_testkit::media::FaultyMedium;
//!
//! let medium = Arc::new(FaultyMedium::in_memory().with_open_delay(Duration::from_millis(50)));
//! let manager = StoreManager::with_medium(StoreConfig::in_memory(), demo_migrations(), medium.clone());
//! medium.fail_destroy(true);
//! ```

pub mod fixtures;
pub mod generators;
pub mod media;

pub use fixtures::{demo_migrations, failing_migrations, numbered_migrations, TestStore};
pub use media::FaultyMedium;

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}
