//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;

use stowage_migrate::{Migration, MigrationSet};

/// Generate between one and `max` distinct ids, in random order.
pub fn distinct_ids(max: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::btree_set(1u64..10_000, 1..=max)
        .prop_map(|ids: BTreeSet<u64>| ids.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

/// Generate a valid set of table-creating scripts, supplied in random order.
pub fn migration_set(max: usize) -> impl Strategy<Value = MigrationSet> {
    distinct_ids(max).prop_map(|ids| {
        MigrationSet::new(ids.into_iter().map(|id| {
            Migration::new(
                id,
                format!("create_t{}", id),
                format!("CREATE TABLE t{} (id INTEGER PRIMARY KEY);", id),
            )
        }))
        .expect("distinct ids form a valid set")
    })
}

/// Generate a set plus a split point: the prefix is applied first, the
/// rest on a later pass.
pub fn set_with_split(max: usize) -> impl Strategy<Value = (MigrationSet, usize)> {
    migration_set(max).prop_flat_map(|set| {
        let len = set.len();
        (Just(set), 0..=len)
    })
}
