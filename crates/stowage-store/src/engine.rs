//! The storage engine handle: the single SQLite connection behind a store.
//!
//! All operations run on tokio's blocking pool via `spawn_blocking`, so the
//! async runtime is never blocked on SQLite I/O. Once [`Engine::close`] has
//! run, every further operation fails with [`StoreError::StaleHandle`].

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Transaction};

use crate::error::{Result, StoreError};
use crate::ledger::{self, LedgerEntry};

/// One row of a query result: column names paired with values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the named column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Integer value of the named column, if it holds one.
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Text value of the named column, if it holds one.
    pub fn get_str(&self, column: &str) -> Option<&str> {
        match self.get(column)? {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Iterate `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Owning handle to the engine instance of one store.
///
/// Thread-safe via an internal mutex; the connection slot becomes `None`
/// when the engine is closed by a reset.
pub struct Engine {
    name: String,
    conn: Arc<Mutex<Option<Connection>>>,
    log_statements: bool,
}

impl Engine {
    /// Wrap an open connection.
    pub fn new(name: impl Into<String>, conn: Connection, log_statements: bool) -> Self {
        Self {
            name: name.into(),
            conn: Arc::new(Mutex::new(Some(conn))),
            log_statements,
        }
    }

    /// Name of the store this engine backs.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log_statements(&self) -> bool {
        self.log_statements
    }

    /// Whether the engine has been torn down.
    pub fn is_closed(&self) -> bool {
        lock(&self.conn).is_none()
    }

    /// Run a blocking closure against the live connection.
    pub(crate) async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let name = self.name.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn);
            let conn = guard.as_mut().ok_or(StoreError::StaleHandle { name })?;
            f(conn)
        })
        .await?
    }

    /// Execute a single statement, returning the number of changed rows.
    pub async fn execute(&self, sql: impl Into<String>, params: Vec<Value>) -> Result<usize> {
        let sql = sql.into();
        self.trace(&sql);
        self.with_connection(move |conn| Ok(conn.execute(&sql, params_from_iter(params.iter()))?))
            .await
    }

    /// Execute an INSERT, returning the rowid of the new row.
    pub async fn insert(&self, sql: impl Into<String>, params: Vec<Value>) -> Result<i64> {
        let sql = sql.into();
        self.trace(&sql);
        self.with_connection(move |conn| {
            conn.execute(&sql, params_from_iter(params.iter()))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Execute one or more statements without parameters.
    pub async fn execute_batch(&self, sql: impl Into<String>) -> Result<()> {
        let sql = sql.into();
        self.trace(&sql);
        self.with_connection(move |conn| Ok(conn.execute_batch(&sql)?))
            .await
    }

    /// Run a query and collect every row.
    pub async fn query(&self, sql: impl Into<String>, params: Vec<Value>) -> Result<Vec<Row>> {
        let sql = sql.into();
        self.trace(&sql);
        self.with_connection(move |conn| query_rows(conn, &sql, &params))
            .await
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits if `f` returns `Ok`; otherwise the transaction is dropped and
    /// rolled back, so none of its effects become visible.
    pub async fn run_atomic<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await
    }

    /// Entries of the migration ledger stored in this engine.
    pub async fn ledger(&self) -> Result<Vec<LedgerEntry>> {
        self.with_connection(|conn| ledger::entries(conn)).await
    }

    /// Close the connection and invalidate this engine.
    ///
    /// Idempotent. Waits for any in-progress operation to finish first.
    pub async fn close(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let name = self.name.clone();

        tokio::task::spawn_blocking(move || {
            if let Some(conn) = lock(&conn).take() {
                if let Err((_, e)) = conn.close() {
                    tracing::warn!(store = %name, error = %e, "error while closing connection");
                }
            }
        })
        .await?;

        Ok(())
    }

    fn trace(&self, sql: &str) {
        if self.log_statements {
            tracing::debug!(store = %self.name, sql = %sql, "statement");
        }
    }
}

/// Collect all rows of a query on any connection (or transaction).
pub fn query_rows(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Arc<[String]> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>()
        .into();
    let width = columns.len();

    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows
        .into_iter()
        .map(|values| Row::new(Arc::clone(&columns), values))
        .collect())
}

/// Lock the connection slot, recovering from a poisoned mutex.
///
/// A panic inside a closure cannot leave the connection half-written:
/// uncommitted transactions roll back when dropped.
fn lock(conn: &Mutex<Option<Connection>>) -> MutexGuard<'_, Option<Connection>> {
    conn.lock().unwrap_or_else(|e| e.into_inner())
}
