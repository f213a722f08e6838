//! The ordered, validated set of migration scripts for one store.

use std::collections::BTreeMap;

use crate::error::{MigrationError, Result};
use crate::migration::Migration;
use crate::types::MigrationId;

/// An immutable, ordered collection of migration scripts.
///
/// Construction validates the whole set up front: ids are unique, fit the
/// ledger column, and every script is named. Iteration is always in
/// ascending id order regardless of the order the scripts were supplied in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSet {
    migrations: BTreeMap<MigrationId, Migration>,
}

impl MigrationSet {
    /// Build a set from scripts in any order.
    pub fn new(migrations: impl IntoIterator<Item = Migration>) -> Result<Self> {
        let mut by_id = BTreeMap::new();

        for migration in migrations {
            let id = migration.id();
            if id > MigrationId::MAX {
                return Err(MigrationError::IdOutOfRange(id.get()));
            }
            if migration.name().trim().is_empty() {
                return Err(MigrationError::EmptyName(id));
            }
            if by_id.insert(id, migration).is_some() {
                return Err(MigrationError::DuplicateId(id));
            }
        }

        Ok(Self { migrations: by_id })
    }

    /// An empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of scripts.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Look up a script by id.
    pub fn get(&self, id: MigrationId) -> Option<&Migration> {
        self.migrations.get(&id)
    }

    pub fn contains(&self, id: MigrationId) -> bool {
        self.migrations.contains_key(&id)
    }

    /// Scripts in application order.
    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.values()
    }

    /// Ids in application order.
    pub fn ids(&self) -> Vec<MigrationId> {
        self.migrations.keys().copied().collect()
    }

    /// Id of the last script, if any.
    pub fn latest(&self) -> Option<MigrationId> {
        self.migrations.keys().next_back().copied()
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a Migration;
    type IntoIter = std::collections::btree_map::Values<'a, MigrationId, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.migrations.values()
    }
}
