//! Release guard for admitted slots
//!
//! Created as soon as slots are admitted. Whichever path leaves the launch
//! scope first (task exit, interrupt escalation, an error or a panic) frees
//! the slots; every later release is a no-op, so slots that another
//! scheduler has claimed in the meantime are never freed twice.

use gpusched_core::GpuschedResult;
use gpusched_store::StateStore;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error};

/// Returns admitted slots to the pool exactly once
#[derive(Debug)]
pub struct ReleaseGuard {
    store: StateStore,
    slots: Vec<usize>,
    released: AtomicBool,
}

impl ReleaseGuard {
    pub fn new(store: StateStore, slots: Vec<usize>) -> Self {
        Self {
            store,
            slots,
            released: AtomicBool::new(false),
        }
    }

    pub fn slots(&self) -> &[usize] {
        &self.slots
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Free the slots; returns false if they were already released
    pub async fn release(&self) -> GpuschedResult<bool> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        if let Err(e) = self.store.release(&self.slots).await {
            self.released.store(false, Ordering::Release);
            return Err(e);
        }
        debug!(gpus = ?self.slots, "Slots returned to pool");
        Ok(true)
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if *self.released.get_mut() {
            return;
        }
        if let Err(e) = self.store.release_blocking(&self.slots) {
            error!(gpus = ?self.slots, error = %e, "Failed to release GPUs");
        } else {
            debug!(gpus = ?self.slots, "Slots returned to pool on scope exit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> StateStore {
        StateStore::open(dir.path().join("state"), 4)
            .unwrap()
            .with_lock_retry(Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_release_once() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.with_lock(|pool| Ok(pool.reserve(&[1, 2]))).await.unwrap();

        let guard = ReleaseGuard::new(store.clone(), vec![1, 2]);
        assert!(guard.release().await.unwrap());
        assert!(guard.is_released());

        // Another scheduler claims slot 1 after our release.
        store.with_lock(|pool| Ok(pool.reserve(&[1]))).await.unwrap();
        assert!(!guard.release().await.unwrap());
        drop(guard);

        let pool = store.snapshot().await.unwrap();
        assert_eq!(pool.free_indices(), vec![0, 2, 3]);
    }

    #[tokio::test]
    async fn test_release_on_drop() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.with_lock(|pool| Ok(pool.reserve(&[0, 3]))).await.unwrap();

        {
            let _guard = ReleaseGuard::new(store.clone(), vec![0, 3]);
        }

        let pool = store.snapshot().await.unwrap();
        assert_eq!(pool.free_indices(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_release_on_error_path() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.with_lock(|pool| Ok(pool.reserve(&[2]))).await.unwrap();

        async fn failing(guard: ReleaseGuard) -> GpuschedResult<()> {
            let _guard = guard;
            Err(gpusched_core::GpuschedError::Launch("spawn failed".to_string()))
        }

        let result = failing(ReleaseGuard::new(store.clone(), vec![2])).await;
        assert!(result.is_err());
        assert_eq!(store.snapshot().await.unwrap().free_indices(), vec![0, 1, 2, 3]);
    }
}
