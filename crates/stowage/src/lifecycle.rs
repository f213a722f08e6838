//! The lifecycle manager: Open → Migrate → Ready, once per store.
//!
//! Every logical store has a [`Phase`] guarded by one registry lock. A
//! transition is driven by a spawned task that reports its outcome on a
//! `watch` channel; callers that arrive while it is in flight subscribe to
//! that channel instead of starting their own. The task runs to completion
//! even if every caller stops waiting; if it dies without reporting, waiters
//! get `TransitionAborted` and the store is left Failed, so the next caller
//! starts over.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;
use stowage_migrate::MigrationSet;
use stowage_store::{
    Engine, ExecutorStats, LedgerEntry, MigrationExecutor, MigrationReport, StorageMedium,
};
use tokio::sync::watch;

use crate::config::StoreConfig;
use crate::error::{Result, StowageError};
use crate::session::Session;

/// Observable lifecycle state of one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Uninitialized,
    Opening,
    Migrating,
    Ready,
    Failed,
    Resetting,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Opening => "opening",
            LifecycleState::Migrating => "migrating",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
            LifecycleState::Resetting => "resetting",
        };
        f.write_str(s)
    }
}

pub(crate) type Outcome<T> = watch::Receiver<Option<Result<T>>>;

/// Internal phase; carries what waiters need to join a transition.
pub(crate) enum Phase {
    Opening {
        migrating: bool,
        done: Outcome<Arc<Engine>>,
    },
    Ready(Arc<Engine>),
    Failed(StowageError),
    Resetting(Outcome<()>),
    /// Teardown failed part-way; storage may still hold data.
    ResetFailed(StowageError),
}

impl Phase {
    fn state(&self) -> LifecycleState {
        match self {
            Phase::Opening { migrating: false, .. } => LifecycleState::Opening,
            Phase::Opening { migrating: true, .. } => LifecycleState::Migrating,
            Phase::Ready(_) => LifecycleState::Ready,
            Phase::Failed(_) | Phase::ResetFailed(_) => LifecycleState::Failed,
            Phase::Resetting(_) => LifecycleState::Resetting,
        }
    }

    /// An in-flight phase whose driving task is gone without reporting.
    pub(crate) fn is_abandoned(&self) -> bool {
        match self {
            Phase::Opening { done, .. } => done.has_changed().is_err(),
            Phase::Resetting(done) => done.has_changed().is_err(),
            _ => false,
        }
    }

    fn error(&self) -> Option<&StowageError> {
        match self {
            Phase::Failed(e) | Phase::ResetFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// Per-process bookkeeping. A store with no phase entry is Uninitialized.
#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) phases: HashMap<String, Phase>,
    /// The one engine instance per store. Survives a failed migration pass
    /// so a retry reuses it; removed only by a reset.
    pub(crate) engines: HashMap<String, Arc<Engine>>,
    pub(crate) reports: HashMap<String, MigrationReport>,
}

pub(crate) struct Inner {
    pub(crate) config: StoreConfig,
    pub(crate) migrations: Arc<MigrationSet>,
    pub(crate) medium: Arc<dyn StorageMedium>,
    pub(crate) executor: MigrationExecutor,
    registry: Mutex<Registry>,
}

impl Inner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owns every store of one process and the script set they migrate to.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct StoreManager {
    pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for StoreManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreManager")
            .field("config", &self.inner.config)
            .field("migrations", &self.inner.migrations.len())
            .finish()
    }
}

enum Step {
    Ready(Arc<Engine>),
    AwaitOpen(Outcome<Arc<Engine>>),
    AwaitReset(Outcome<()>),
}

impl StoreManager {
    /// Manager over the medium described by `config`.
    pub fn new(config: StoreConfig, migrations: MigrationSet) -> Self {
        let medium = config.medium();
        Self::with_medium(config, migrations, medium)
    }

    /// Manager over a caller-supplied medium.
    pub fn with_medium(
        config: StoreConfig,
        migrations: MigrationSet,
        medium: Arc<dyn StorageMedium>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                migrations: Arc::new(migrations),
                medium,
                executor: MigrationExecutor::new(),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn migrations(&self) -> &MigrationSet {
        &self.inner.migrations
    }

    /// Get a session for the store `name`, opening and migrating it first
    /// if needed.
    ///
    /// Concurrent callers share one open-and-migrate pass and observe the
    /// same session or the same error. With an init timeout configured, a
    /// caller that gives up gets [`StowageError::Timeout`] while the pass
    /// keeps running.
    pub async fn get_store(&self, name: &str) -> Result<Session> {
        let key = self.inner.config.storage_key(name)?;

        match self.inner.config.init_timeout {
            Some(after) => tokio::time::timeout(after, self.acquire(&key))
                .await
                .unwrap_or_else(|_| {
                    tracing::warn!(store = %key, after_ms = after.as_millis() as u64, "store not ready in time");
                    Err(StowageError::Timeout { name: key.clone(), after })
                }),
            None => self.acquire(&key).await,
        }
    }

    async fn acquire(&self, key: &str) -> Result<Session> {
        loop {
            let step = {
                let mut registry = self.inner.lock();
                let abandoned = registry.phases.get(key).is_some_and(Phase::is_abandoned);
                match registry.phases.get(key) {
                    Some(Phase::Resetting(_)) if abandoned => {
                        return Err(StowageError::ResetIncomplete { name: key.to_string() });
                    }
                    Some(Phase::Ready(engine)) => Step::Ready(Arc::clone(engine)),
                    Some(Phase::Opening { done, .. }) if !abandoned => Step::AwaitOpen(done.clone()),
                    Some(Phase::Resetting(done)) => Step::AwaitReset(done.clone()),
                    Some(Phase::ResetFailed(_)) => {
                        return Err(StowageError::ResetIncomplete { name: key.to_string() });
                    }
                    None | Some(Phase::Failed(_)) | Some(Phase::Opening { .. }) => {
                        let (tx, rx) = watch::channel(None);
                        registry.phases.insert(
                            key.to_string(),
                            Phase::Opening {
                                migrating: false,
                                done: rx.clone(),
                            },
                        );
                        tokio::spawn(run_open(Arc::clone(&self.inner), key.to_string(), tx));
                        Step::AwaitOpen(rx)
                    }
                }
            };

            match step {
                Step::Ready(engine) => return Ok(Session::new(key, &engine)),
                Step::AwaitOpen(rx) => {
                    let engine = settle(rx, key).await?;
                    return Ok(Session::new(key, &engine));
                }
                Step::AwaitReset(rx) => {
                    // The outcome is the resetter's to report; re-read the phase.
                    let _ = settle(rx, key).await;
                }
            }
        }
    }

    /// Current lifecycle state of the store `name`.
    pub fn state(&self, name: &str) -> Result<LifecycleState> {
        let key = self.inner.config.storage_key(name)?;
        Ok(self
            .inner
            .lock()
            .phases
            .get(&key)
            .map_or(LifecycleState::Uninitialized, Phase::state))
    }

    /// Error that left the store `name` in the Failed state, if any.
    pub fn last_error(&self, name: &str) -> Result<Option<StowageError>> {
        let key = self.inner.config.storage_key(name)?;
        Ok(self
            .inner
            .lock()
            .phases
            .get(&key)
            .and_then(Phase::error)
            .cloned())
    }

    /// Ledger entries of the store `name`, ascending by id.
    ///
    /// Waits for an in-flight transition to settle first. A store that was
    /// never opened in this process is read through a temporary connection
    /// if the medium holds it, and is otherwise empty.
    pub async fn ledger(&self, name: &str) -> Result<Vec<LedgerEntry>> {
        let key = self.inner.config.storage_key(name)?;

        let pending = match self.inner.lock().phases.get(&key) {
            Some(Phase::Opening { done, .. }) => Some(Step::AwaitOpen(done.clone())),
            Some(Phase::Resetting(done)) => Some(Step::AwaitReset(done.clone())),
            _ => None,
        };
        match pending {
            Some(Step::AwaitOpen(rx)) => {
                let _ = settle(rx, &key).await;
            }
            Some(Step::AwaitReset(rx)) => {
                let _ = settle(rx, &key).await;
            }
            _ => {}
        }

        let engine = self.inner.lock().engines.get(&key).cloned();
        if let Some(engine) = engine {
            return Ok(engine.ledger().await?);
        }

        if !self.inner.medium.exists(&key).await? {
            return Ok(Vec::new());
        }
        let conn = self.inner.medium.open(&key).await?;
        let reader = Engine::new(key.as_str(), conn, false);
        let entries = reader.ledger().await;
        reader.close().await?;
        Ok(entries?)
    }

    /// Report of the last successful migration pass for `name`.
    pub fn last_report(&self, name: &str) -> Result<Option<MigrationReport>> {
        let key = self.inner.config.storage_key(name)?;
        Ok(self.inner.lock().reports.get(&key).cloned())
    }

    /// Migration executor counters across all stores of this manager.
    pub fn executor_stats(&self) -> ExecutorStats {
        self.inner.executor.stats()
    }
}

/// Wait for a transition's outcome.
pub(crate) async fn settle<T: Clone>(mut rx: Outcome<T>, key: &str) -> Result<T> {
    let aborted = || StowageError::TransitionAborted {
        name: key.to_string(),
    };
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.as_ref().cloned().unwrap_or_else(|| Err(aborted())),
        Err(_) => Err(aborted()),
    }
}

/// Reports the outcome of one transition exactly once.
///
/// Dropped without [`Transition::finish`] (the driving task panicked or
/// was cancelled), it records `TransitionAborted` through `on_abort` and
/// wakes every waiter with that error.
pub(crate) struct Transition<T: Clone> {
    inner: Arc<Inner>,
    key: String,
    tx: Option<watch::Sender<Option<Result<T>>>>,
    on_abort: fn(&mut Registry, &str, StowageError),
}

impl<T: Clone> Transition<T> {
    pub(crate) fn new(
        inner: Arc<Inner>,
        key: String,
        tx: watch::Sender<Option<Result<T>>>,
        on_abort: fn(&mut Registry, &str, StowageError),
    ) -> Self {
        Self {
            inner,
            key,
            tx: Some(tx),
            on_abort,
        }
    }

    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn finish(mut self, outcome: Result<T>) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome));
        }
    }
}

impl<T: Clone> Drop for Transition<T> {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let error = StowageError::TransitionAborted {
            name: self.key.clone(),
        };
        tracing::warn!(store = %self.key, "transition ended without an outcome");
        (self.on_abort)(&mut self.inner.lock(), &self.key, error.clone());
        tx.send_replace(Some(Err(error)));
    }
}

fn abort_open(registry: &mut Registry, key: &str, error: StowageError) {
    registry.phases.insert(key.to_string(), Phase::Failed(error));
}

async fn run_open(inner: Arc<Inner>, key: String, tx: watch::Sender<Option<Result<Arc<Engine>>>>) {
    let transition = Transition::new(inner, key, tx, abort_open);
    let (inner, key) = (transition.inner(), transition.key());
    let started = Instant::now();
    tracing::info!(store = %key, "opening store");

    let outcome = open_and_migrate(inner, key).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    {
        let mut registry = inner.lock();
        match &outcome {
            Ok((engine, report)) => {
                tracing::info!(
                    store = %key,
                    elapsed_ms,
                    applied = report.applied.len(),
                    skipped = report.skipped.len(),
                    "store ready"
                );
                registry.phases.insert(key.to_string(), Phase::Ready(Arc::clone(engine)));
                registry.reports.insert(key.to_string(), report.clone());
            }
            Err(e) => {
                tracing::warn!(store = %key, elapsed_ms, error = %e, "store failed to open");
                registry.phases.insert(key.to_string(), Phase::Failed(e.clone()));
            }
        }
    }

    transition.finish(outcome.map(|(engine, _)| engine));
}

async fn open_and_migrate(inner: &Inner, key: &str) -> Result<(Arc<Engine>, MigrationReport)> {
    let existing = inner.lock().engines.get(key).cloned();
    let engine = match existing {
        Some(engine) => engine,
        None => {
            let conn = inner.medium.open(key).await?;
            let engine = Arc::new(Engine::new(key, conn, inner.config.log_statements));
            inner
                .lock()
                .engines
                .insert(key.to_string(), Arc::clone(&engine));
            engine
        }
    };

    if let Some(Phase::Opening { migrating, .. }) = inner.lock().phases.get_mut(key) {
        *migrating = true;
    }

    let report = inner
        .executor
        .reconcile(&engine, Arc::clone(&inner.migrations))
        .await?;
    Ok((engine, report))
}
