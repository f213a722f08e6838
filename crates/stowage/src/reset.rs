//! Reset: destroy a store's engine instance and ledger, returning it to
//! Uninitialized.
//!
//! Concurrent resets of one store collapse onto one teardown, and a reset
//! never interleaves with an open: it waits for an in-flight open to settle
//! first.

use std::sync::Arc;
use std::time::Instant;

use stowage_store::Engine;
use tokio::sync::watch;

use crate::error::{Result, StowageError};
use crate::lifecycle::{settle, Inner, Outcome, Phase, Registry, StoreManager, Transition};

enum Step {
    AwaitOpen(Outcome<Arc<Engine>>),
    Join(Outcome<()>),
}

impl StoreManager {
    /// Destroy the store `name` so the next `get_store` starts from scratch.
    ///
    /// Outstanding sessions become stale. Resetting a store that holds
    /// nothing succeeds. If teardown fails part-way the store is reported
    /// as Failed and `get_store` refuses it until a reset succeeds.
    pub async fn reset(&self, name: &str) -> Result<()> {
        let key = self.inner.config.storage_key(name)?;

        loop {
            let step = {
                let mut registry = self.inner.lock();
                let abandoned = registry.phases.get(&key).is_some_and(Phase::is_abandoned);
                match registry.phases.get(&key) {
                    Some(Phase::Opening { done, .. }) if !abandoned => Step::AwaitOpen(done.clone()),
                    Some(Phase::Resetting(done)) if !abandoned => Step::Join(done.clone()),
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        registry
                            .phases
                            .insert(key.clone(), Phase::Resetting(rx.clone()));
                        tokio::spawn(run_reset(Arc::clone(&self.inner), key.clone(), tx));
                        Step::Join(rx)
                    }
                }
            };

            match step {
                Step::AwaitOpen(rx) => {
                    // Open failures belong to get_store callers.
                    let _ = settle(rx, &key).await;
                }
                Step::Join(rx) => return settle(rx, &key).await,
            }
        }
    }
}

fn abort_reset(registry: &mut Registry, key: &str, error: StowageError) {
    registry.reports.remove(key);
    registry.phases.insert(key.to_string(), Phase::ResetFailed(error));
}

async fn run_reset(inner: Arc<Inner>, key: String, tx: watch::Sender<Option<Result<()>>>) {
    let transition = Transition::new(inner, key, tx, abort_reset);
    let (inner, key) = (transition.inner(), transition.key());
    let started = Instant::now();
    tracing::info!(store = %key, "resetting store");

    let outcome = teardown(inner, key).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    {
        let mut registry = inner.lock();
        registry.reports.remove(key);
        match &outcome {
            Ok(()) => {
                tracing::info!(store = %key, elapsed_ms, "store reset");
                registry.phases.remove(key);
            }
            Err(e) => {
                tracing::warn!(store = %key, elapsed_ms, error = %e, "store reset failed");
                registry.phases.insert(key.to_string(), Phase::ResetFailed(e.clone()));
            }
        }
    }

    transition.finish(outcome);
}

async fn teardown(inner: &Inner, key: &str) -> Result<()> {
    let engine = inner.lock().engines.remove(key);
    if let Some(engine) = engine {
        engine.close().await?;
    }
    inner.medium.destroy(key).await?;
    Ok(())
}
