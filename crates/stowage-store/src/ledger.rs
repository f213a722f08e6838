//! The migration ledger: which scripts have been applied to a store.
//!
//! The ledger is an ordinary table inside the same database the migrations
//! target. A row for migration X exists iff X's effects are committed,
//! because the row is written by [`record_applied`] inside the very
//! transaction that runs X's statements.

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use stowage_migrate::{Fingerprint, Migration, MigrationId};

use crate::error::{Result, StoreError};

/// Name of the ledger table.
pub const LEDGER_TABLE: &str = "__stowage_migrations";

/// One applied migration as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: MigrationId,
    pub name: String,
    /// Fingerprint of the script at the time it was applied.
    pub fingerprint: Fingerprint,
    /// When it was applied (Unix ms).
    pub applied_at: i64,
}

/// Create the ledger table if it doesn't exist.
pub fn ensure(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )"
    ))?;
    Ok(())
}

/// Whether the ledger table exists yet.
pub fn exists(conn: &Connection) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![LEDGER_TABLE],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// All entries, ordered by id. Empty if the table doesn't exist.
pub fn entries(conn: &Connection) -> Result<Vec<LedgerEntry>> {
    if !exists(conn)? {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT id, name, fingerprint, applied_at FROM {LEDGER_TABLE} ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(LedgerRow {
                id: row.get(0)?,
                name: row.get(1)?,
                fingerprint: row.get(2)?,
                applied_at: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(LedgerRow::decode).collect()
}

/// Ids currently recorded, in ascending order.
pub fn applied_ids(conn: &Connection) -> Result<BTreeSet<MigrationId>> {
    Ok(entries(conn)?.into_iter().map(|e| e.id).collect())
}

/// Record `migration` as applied.
///
/// Takes a [`Transaction`] so the row can only be written inside the atomic
/// unit that ran the migration's statements.
pub fn record_applied(tx: &Transaction<'_>, migration: &Migration, applied_at: i64) -> Result<()> {
    tx.execute(
        &format!(
            "INSERT INTO {LEDGER_TABLE} (id, name, fingerprint, applied_at) VALUES (?1, ?2, ?3, ?4)"
        ),
        params![
            migration.id().to_sql()?,
            migration.name(),
            migration.fingerprint().to_hex(),
            applied_at,
        ],
    )?;
    Ok(())
}

/// Raw column values before validation.
struct LedgerRow {
    id: i64,
    name: String,
    fingerprint: String,
    applied_at: i64,
}

impl LedgerRow {
    fn decode(self) -> Result<LedgerEntry> {
        let id = MigrationId::from_sql(self.id)
            .map_err(|_| StoreError::CorruptLedger(format!("negative id {}", self.id)))?;
        let fingerprint = Fingerprint::from_hex(&self.fingerprint).map_err(|_| {
            StoreError::CorruptLedger(format!("bad fingerprint for migration {}", id))
        })?;
        Ok(LedgerEntry {
            id,
            name: self.name,
            fingerprint,
            applied_at: self.applied_at,
        })
    }
}

/// Get current time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_empty_before_ensure() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!exists(&conn).unwrap());
        assert!(entries(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_record_and_read_back() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure(&conn).unwrap();
        ensure(&conn).unwrap(); // Should not error

        let m2 = Migration::new(2, "branches", "CREATE TABLE branches (id INTEGER);");
        let m1 = Migration::new(1, "organizations", "CREATE TABLE organizations (id INTEGER);");

        let tx = conn.transaction().unwrap();
        record_applied(&tx, &m2, 2000).unwrap();
        record_applied(&tx, &m1, 1000).unwrap();
        tx.commit().unwrap();

        let recorded = entries(&conn).unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].id, MigrationId(1));
        assert_eq!(recorded[0].fingerprint, m1.fingerprint());
        assert_eq!(recorded[1].applied_at, 2000);

        let ids: Vec<_> = applied_ids(&conn).unwrap().into_iter().collect();
        assert_eq!(ids, vec![MigrationId(1), MigrationId(2)]);
    }

    #[test]
    fn test_rolled_back_record_is_absent() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure(&conn).unwrap();

        let m = Migration::new(1, "one", "SELECT 1;");
        let tx = conn.transaction().unwrap();
        record_applied(&tx, &m, 1).unwrap();
        drop(tx); // rollback

        assert!(entries(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_fingerprint_is_reported() {
        let conn = Connection::open_in_memory().unwrap();
        ensure(&conn).unwrap();
        conn.execute(
            &format!("INSERT INTO {LEDGER_TABLE} VALUES (1, 'one', 'nothex', 0)"),
            [],
        )
        .unwrap();

        let err = entries(&conn).unwrap_err();
        assert!(matches!(err, StoreError::CorruptLedger(_)));
    }
}
