//! The migration executor: reconciles a script set against a store's ledger.
//!
//! Reconciliation first plans without touching the store (drift and orphan
//! checks, pending computation), then applies pending scripts strictly in
//! ascending id order. Each script runs in its own transaction together with
//! its ledger row; the first failure rolls that script back and stops the
//! pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::{Connection, Transaction};
use stowage_migrate::{Migration, MigrationId, MigrationSet};

use crate::engine::Engine;
use crate::error::{Result, StoreError};
use crate::ledger::{self, LedgerEntry};

/// What a reconciliation pass will do.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MigrationPlan {
    /// Scripts to apply, ascending.
    pub pending: Vec<MigrationId>,
    /// Scripts already recorded with a matching fingerprint.
    pub skipped: Vec<MigrationId>,
}

impl MigrationPlan {
    pub fn is_noop(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Outcome of a successful reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MigrationReport {
    /// Scripts applied by this pass, in order.
    pub applied: Vec<MigrationId>,
    /// Scripts that were already applied.
    pub skipped: Vec<MigrationId>,
    pub elapsed: Duration,
}

/// Counters exposed for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutorStats {
    /// Reconciliation passes started.
    pub runs: u64,
    /// Scripts committed across all passes.
    pub scripts_applied: u64,
}

/// Compare the script set with the ledger.
///
/// Fails with [`StoreError::MigrationDrift`] if an applied script's
/// fingerprint changed, and [`StoreError::OrphanedMigration`] if the ledger
/// records an id the set no longer has. Either way nothing is executed.
pub fn plan(set: &MigrationSet, ledger: &[LedgerEntry]) -> Result<MigrationPlan> {
    let mut skipped = Vec::with_capacity(ledger.len());

    for entry in ledger {
        let script = set
            .get(entry.id)
            .ok_or(StoreError::OrphanedMigration { id: entry.id })?;

        if script.fingerprint() != entry.fingerprint {
            return Err(StoreError::MigrationDrift {
                id: entry.id,
                recorded: entry.fingerprint,
                current: script.fingerprint(),
            });
        }
        skipped.push(entry.id);
    }

    let pending = set
        .ids()
        .into_iter()
        .filter(|id| !skipped.contains(id))
        .collect();

    Ok(MigrationPlan { pending, skipped })
}

/// Applies migration scripts to engines.
#[derive(Debug, Default)]
pub struct MigrationExecutor {
    runs: AtomicU64,
    scripts_applied: Arc<AtomicU64>,
}

impl MigrationExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            runs: self.runs.load(Ordering::SeqCst),
            scripts_applied: self.scripts_applied.load(Ordering::SeqCst),
        }
    }

    /// Bring `engine` up to date with `set`.
    ///
    /// On failure, every script before the failing one stays committed and
    /// recorded; the failing script and everything after it are absent.
    pub async fn reconcile(&self, engine: &Engine, set: Arc<MigrationSet>) -> Result<MigrationReport> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let counter = Arc::clone(&self.scripts_applied);
        let name = engine.name().to_string();
        let log_statements = engine.log_statements();

        engine
            .with_connection(move |conn| {
                let started = Instant::now();
                let recorded = ledger::entries(conn)?;
                let plan = plan(&set, &recorded)?;
                ledger::ensure(conn)?;

                if plan.is_noop() {
                    tracing::debug!(store = %name, applied = plan.skipped.len(), "schema up to date");
                }

                let mut applied = Vec::with_capacity(plan.pending.len());
                for id in &plan.pending {
                    let Some(script) = set.get(*id) else {
                        continue;
                    };
                    apply_one(conn, script, log_statements)?;
                    counter.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!(store = %name, id = %id, name = script.name(), "applied migration");
                    applied.push(*id);
                }

                Ok(MigrationReport {
                    applied,
                    skipped: plan.skipped,
                    elapsed: started.elapsed(),
                })
            })
            .await
    }
}

/// Apply one script and its ledger row as a single transaction.
///
/// Transaction control inside the script is refused at prepare time, so a
/// stray `COMMIT` cannot end the transaction ahead of the ledger row.
fn apply_one(conn: &mut Connection, script: &Migration, log_statements: bool) -> Result<()> {
    let failed = |cause: rusqlite::Error| StoreError::MigrationApply {
        id: script.id(),
        name: script.name().to_string(),
        cause: Arc::new(cause),
    };

    let tx = conn.transaction()?;
    tx.authorizer(Some(deny_transaction_control));
    let executed = run_statements(&tx, script, log_statements);
    tx.authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
    executed.map_err(failed)?;

    ledger::record_applied(&tx, script, ledger::now_millis())?;
    tx.commit().map_err(failed)?;

    Ok(())
}

fn run_statements(tx: &Transaction<'_>, script: &Migration, log_statements: bool) -> rusqlite::Result<()> {
    for statement in script.statements() {
        if log_statements {
            tracing::debug!(id = %script.id(), sql = %statement, "statement");
        }
        tx.execute_batch(statement)?;
    }
    Ok(())
}

fn deny_transaction_control(ctx: AuthContext<'_>) -> Authorization {
    match ctx.action {
        AuthAction::Transaction { .. } | AuthAction::Savepoint { .. } => Authorization::Deny,
        _ => Authorization::Allow,
    }
}
