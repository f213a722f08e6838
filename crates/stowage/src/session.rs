//! The session façade: the query and mutation surface handed to consumers.
//!
//! A [`Session`] can only be obtained from a ready store. It holds a weak
//! reference to the engine, so it never keeps a torn-down store alive; once
//! the store is reset, every call fails with `StaleHandle`.

use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use stowage_store::{Engine, Row, StoreError, Transaction, Value, LEDGER_TABLE};

use crate::error::{Result, StowageError};
use crate::record::{self, Filter};

/// Capability to query and mutate one ready store.
#[derive(Clone)]
pub struct Session {
    name: Arc<str>,
    engine: Weak<Engine>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("stale", &self.is_stale())
            .finish()
    }
}

impl Session {
    /// Only the lifecycle manager constructs sessions, and only when Ready.
    pub(crate) fn new(name: &str, engine: &Arc<Engine>) -> Self {
        Self {
            name: Arc::from(name),
            engine: Arc::downgrade(engine),
        }
    }

    /// Storage key of the store this session belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the underlying engine has been torn down.
    pub fn is_stale(&self) -> bool {
        self.engine.upgrade().map_or(true, |e| e.is_closed())
    }

    /// Whether two sessions share one engine instance.
    pub fn same_store(&self, other: &Session) -> bool {
        Weak::ptr_eq(&self.engine, &other.engine)
    }

    fn engine(&self) -> Result<Arc<Engine>> {
        self.engine.upgrade().ok_or_else(|| {
            StoreError::StaleHandle {
                name: self.name.to_string(),
            }
            .into()
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Raw SQL
    // ─────────────────────────────────────────────────────────────────────────

    /// Execute one statement, returning the number of changed rows.
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<usize> {
        Ok(self.engine()?.execute(sql, params).await?)
    }

    /// Run a query and collect every row.
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        Ok(self.engine()?.query(sql, params).await?)
    }

    /// Run `f` as one atomic unit of work.
    pub async fn run_atomic<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> stowage_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        Ok(self.engine()?.run_atomic(f).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Collections
    // ─────────────────────────────────────────────────────────────────────────

    /// Application tables, sorted by name.
    pub async fn collections(&self) -> Result<Vec<String>> {
        let rows = self
            .query(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != ?1
                 ORDER BY name",
                vec![Value::Text(LEDGER_TABLE.to_string())],
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get_str("name").map(String::from))
            .collect())
    }

    /// Insert one row, returning its rowid.
    pub async fn insert(&self, collection: &str, values: &[(&str, Value)]) -> Result<i64> {
        let owned = values
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect();
        self.insert_columns(collection, owned).await
    }

    /// Insert a serializable record, returning its rowid.
    pub async fn insert_record<T: Serialize>(&self, collection: &str, record: &T) -> Result<i64> {
        let columns = record::json_to_columns(serde_json::to_value(record)?)?;
        self.insert_columns(collection, columns).await
    }

    async fn insert_columns(&self, collection: &str, columns: Vec<(String, Value)>) -> Result<i64> {
        let table = record::quote_ident(collection)?;

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", table)
        } else {
            let names = columns
                .iter()
                .map(|(column, _)| record::quote_ident(column))
                .collect::<Result<Vec<_>>>()?;
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                names.join(", "),
                placeholders.join(", ")
            )
        };
        let params: Vec<Value> = columns.into_iter().map(|(_, value)| value).collect();

        Ok(self.engine()?.insert(sql, params).await?)
    }

    /// Rows of `collection` matching `filter`, ordered by rowid.
    pub async fn select(&self, collection: &str, filter: &Filter) -> Result<Vec<Row>> {
        let table = record::quote_ident(collection)?;
        let (clause, params) = filter.to_sql(0)?;
        self.query(
            &format!("SELECT * FROM {}{} ORDER BY rowid", table, clause),
            params,
        )
        .await
    }

    /// Rows of `collection` matching `filter`, deserialized into `T`.
    pub async fn select_as<T: DeserializeOwned>(&self, collection: &str, filter: &Filter) -> Result<Vec<T>> {
        self.select(collection, filter)
            .await?
            .iter()
            .map(|row| T::deserialize(record::RowDeserializer::new(row)).map_err(StowageError::from))
            .collect()
    }

    /// Number of rows matching `filter`.
    pub async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let table = record::quote_ident(collection)?;
        let (clause, params) = filter.to_sql(0)?;
        let rows = self
            .query(&format!("SELECT count(*) AS n FROM {}{}", table, clause), params)
            .await?;

        Ok(rows
            .first()
            .and_then(|row| row.get_i64("n"))
            .map_or(0, |n| n as u64))
    }

    /// Set `changes` on rows matching `filter`; returns rows changed.
    pub async fn update(&self, collection: &str, filter: &Filter, changes: &[(&str, Value)]) -> Result<usize> {
        if changes.is_empty() {
            return Ok(0);
        }

        let table = record::quote_ident(collection)?;
        let assignments = changes
            .iter()
            .enumerate()
            .map(|(i, (column, _))| Ok(format!("{} = ?{}", record::quote_ident(column)?, i + 1)))
            .collect::<Result<Vec<_>>>()?;
        let (clause, filter_params) = filter.to_sql(changes.len())?;

        let mut params: Vec<Value> = changes.iter().map(|(_, value)| value.clone()).collect();
        params.extend(filter_params);

        self.execute(
            &format!("UPDATE {} SET {}{}", table, assignments.join(", "), clause),
            params,
        )
        .await
    }

    /// Delete rows matching `filter`; returns rows removed.
    pub async fn delete(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let table = record::quote_ident(collection)?;
        let (clause, params) = filter.to_sql(0)?;
        self.execute(&format!("DELETE FROM {}{}", table, clause), params)
            .await
    }
}
