//! # Stowage Migrate
//!
//! Migration script definitions for Stowage.
//!
//! ## Overview
//!
//! A store's schema is described by an ordered, immutable [`MigrationSet`].
//! Each [`Migration`] carries a monotonically increasing [`MigrationId`], a
//! name, an opaque body of SQL statements, and a [`Fingerprint`] of that
//! body. The set is validated once, when it is built, so a store never
//! starts reconciling against a malformed script set.
//!
//! ## Usage
//!
//! ```rust
//! use stowage_migrate::{Migration, MigrationSet, MigrationId};
//!
//! let set = MigrationSet::new([
//!     Migration::new(20240102, "branches", "CREATE TABLE branches (id INTEGER PRIMARY KEY);"),
//!     Migration::new(20240101, "organizations", "CREATE TABLE organizations (id INTEGER PRIMARY KEY);"),
//! ])
//! .unwrap();
//!
//! assert_eq!(set.ids(), vec![MigrationId(20240101), MigrationId(20240102)]);
//! ```
//!
//! ## Design Notes
//!
//! - **Order by id**: supplied order is irrelevant; ascending id is canonical
//! - **Duplicates are fatal**: a repeated id fails construction
//! - **Fingerprints travel with scripts**: bundles keep the build layer's hash

pub mod error;
pub mod migration;
pub mod set;
pub mod source;
pub mod types;

pub use error::{MigrationError, Result};
pub use migration::{Migration, STATEMENT_BREAKPOINT};
pub use set::MigrationSet;
pub use types::{Fingerprint, MigrationId};
