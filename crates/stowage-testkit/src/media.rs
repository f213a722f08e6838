//! A storage medium that can be slowed down or made to fail.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use stowage_store::{MemoryMedium, StorageMedium, StoreError};

/// Wraps another medium, counting opens and injecting faults.
pub struct FaultyMedium {
    inner: Arc<dyn StorageMedium>,
    open_delay: Duration,
    destroy_delay: Duration,
    panic_next_open: AtomicBool,
    fail_open: AtomicBool,
    fail_destroy: AtomicBool,
    opens: AtomicUsize,
    destroys: AtomicUsize,
}

impl FaultyMedium {
    pub fn new(inner: Arc<dyn StorageMedium>) -> Self {
        Self {
            inner,
            open_delay: Duration::ZERO,
            destroy_delay: Duration::ZERO,
            panic_next_open: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            fail_destroy: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryMedium::new()))
    }

    /// Sleep this long before every open.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Sleep this long before every destroy.
    pub fn with_destroy_delay(mut self, delay: Duration) -> Self {
        self.destroy_delay = delay;
        self
    }

    /// Make the next open panic instead of returning.
    pub fn panic_next_open(&self) {
        self.panic_next_open.store(true, Ordering::SeqCst);
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn fail_destroy(&self, fail: bool) {
        self.fail_destroy.store(fail, Ordering::SeqCst);
    }

    /// Number of open calls that reached the wrapped medium.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of destroy calls, failed ones included.
    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageMedium for FaultyMedium {
    async fn open(&self, name: &str) -> stowage_store::Result<Connection> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.panic_next_open.swap(false, Ordering::SeqCst) {
            panic!("injected open panic for {}", name);
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(StoreError::StorageOpen {
                name: name.to_string(),
                reason: "injected open failure".to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open(name).await
    }

    async fn destroy(&self, name: &str) -> stowage_store::Result<()> {
        if !self.destroy_delay.is_zero() {
            tokio::time::sleep(self.destroy_delay).await;
        }
        self.destroys.fetch_add(1, Ordering::SeqCst);
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(StoreError::Reset {
                name: name.to_string(),
                reason: "injected destroy failure".to_string(),
            });
        }
        self.inner.destroy(name).await
    }

    async fn exists(&self, name: &str) -> stowage_store::Result<bool> {
        self.inner.exists(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_and_faults() {
        let medium = FaultyMedium::in_memory();
        medium.open("a").await.unwrap();
        assert_eq!(medium.opens(), 1);

        medium.fail_open(true);
        assert!(matches!(
            medium.open("a").await,
            Err(StoreError::StorageOpen { .. })
        ));
        assert_eq!(medium.opens(), 1);

        medium.fail_destroy(true);
        assert!(matches!(
            medium.destroy("a").await,
            Err(StoreError::Reset { .. })
        ));
        medium.fail_destroy(false);
        medium.destroy("a").await.unwrap();
        assert_eq!(medium.destroys(), 2);
    }

    #[tokio::test]
    async fn test_panic_is_one_shot() {
        let medium = Arc::new(FaultyMedium::in_memory());
        medium.panic_next_open();

        let first = tokio::spawn({
            let medium = Arc::clone(&medium);
            async move { medium.open("a").await.map(|_| ()) }
        });
        assert!(first.await.unwrap_err().is_panic());

        medium.open("a").await.unwrap();
        assert_eq!(medium.opens(), 1);
    }
}
