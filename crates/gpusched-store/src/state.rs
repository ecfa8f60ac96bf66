//! Lock-guarded access to the shared state file
//!
//! Every scheduler process opens the same file and serializes access with a
//! non-blocking `flock`. A held lock is represented by [`PoolLock`]; dropping
//! it rewinds the file and releases the lock, so every exit path of a
//! critical section (including `?` returns) gives the lock back.

use gpusched_core::{GpuschedError, GpuschedResult, Occupant, ResourcePool};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::layout;

/// Exclusive hold on the state file
pub struct PoolLock {
    file: Flock<File>,
}

impl PoolLock {
    /// Read the whole pool from the start of the file
    pub fn read(&mut self) -> GpuschedResult<ResourcePool> {
        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut bytes)?;
        self.file.seek(SeekFrom::Start(0))?;
        if bytes.is_empty() {
            return Err(GpuschedError::Storage("state file is empty".to_string()));
        }
        layout::decode(&bytes)
    }

    /// Replace the whole pool and flush it to disk
    pub fn write(&mut self, pool: &ResourcePool) -> GpuschedResult<()> {
        let bytes = layout::encode(pool)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.set_len(0)?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        self.file.sync_data()?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    fn is_empty(&self) -> GpuschedResult<bool> {
        Ok(self.file.metadata()?.len() == 0)
    }
}

impl Drop for PoolLock {
    fn drop(&mut self) {
        // The flock itself is released when `file` drops.
        let _ = self.file.seek(SeekFrom::Start(0));
    }
}

/// Handle on the shared state file
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    lock_retry: Duration,
}

impl StateStore {
    /// Open the state file, creating it with a pool of `default_size` free
    /// slots when it does not exist yet
    pub fn open(path: impl Into<PathBuf>, default_size: usize) -> GpuschedResult<Self> {
        let store = Self {
            path: path.into(),
            lock_retry: Duration::from_millis(100),
        };

        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o666)
            .open(&store.path)?;

        let mut lock = store.lock_blocking()?;
        if lock.is_empty()? {
            lock.write(&ResourcePool::new(default_size, &[]))?;
            info!(
                path = %store.path.display(),
                slots = default_size,
                "Created state file"
            );
        }

        Ok(store)
    }

    /// Set the delay between lock attempts under contention
    pub fn with_lock_retry(mut self, lock_retry: Duration) -> Self {
        self.lock_retry = lock_retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attempt the lock once; `None` means another holder has it
    pub fn try_lock(&self) -> GpuschedResult<Option<PoolLock>> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(file) => Ok(Some(PoolLock { file })),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err((_, errno)) => Err(GpuschedError::Lock(format!(
                "flock on {} failed: {}",
                self.path.display(),
                errno
            ))),
        }
    }

    /// Acquire the lock, sleeping between attempts while it is busy
    pub async fn lock(&self) -> GpuschedResult<PoolLock> {
        loop {
            if let Some(lock) = self.try_lock()? {
                return Ok(lock);
            }
            trace!("State file busy, retrying");
            tokio::time::sleep(self.lock_retry).await;
        }
    }

    /// Blocking variant of [`StateStore::lock`] for contexts that cannot await
    pub fn lock_blocking(&self) -> GpuschedResult<PoolLock> {
        loop {
            if let Some(lock) = self.try_lock()? {
                return Ok(lock);
            }
            trace!("State file busy, retrying");
            std::thread::sleep(self.lock_retry);
        }
    }

    /// Run `f` on the pool under the lock, writing it back if it changed
    pub async fn with_lock<T, F>(&self, f: F) -> GpuschedResult<T>
    where
        F: FnOnce(&mut ResourcePool) -> GpuschedResult<T>,
    {
        let mut lock = self.lock().await?;
        apply(&mut lock, f)
    }

    /// Blocking variant of [`StateStore::with_lock`]
    pub fn with_lock_blocking<T, F>(&self, f: F) -> GpuschedResult<T>
    where
        F: FnOnce(&mut ResourcePool) -> GpuschedResult<T>,
    {
        let mut lock = self.lock_blocking()?;
        apply(&mut lock, f)
    }

    /// Lock-protected copy of the pool
    pub async fn snapshot(&self) -> GpuschedResult<ResourcePool> {
        self.with_lock(|pool| Ok(pool.clone())).await
    }

    /// Overwrite the pool with `size` slots, `busy` ones unavailable
    pub async fn initialize(&self, size: usize, busy: &[usize]) -> GpuschedResult<()> {
        let mut lock = self.lock().await?;
        lock.write(&ResourcePool::new(size, busy))?;
        info!(slots = size, busy = ?busy, "Initialized pool");
        Ok(())
    }

    /// Free the slots and clear their occupants; returns how many changed
    pub async fn release(&self, indices: &[usize]) -> GpuschedResult<usize> {
        let changed = self.with_lock(|pool| Ok(pool.release(indices))).await?;
        debug!(gpus = ?indices, changed, "Released GPUs");
        Ok(changed)
    }

    /// Blocking variant of [`StateStore::release`]
    pub fn release_blocking(&self, indices: &[usize]) -> GpuschedResult<usize> {
        let changed = self.with_lock_blocking(|pool| Ok(pool.release(indices)))?;
        debug!(gpus = ?indices, changed, "Released GPUs");
        Ok(changed)
    }

    /// Record task metadata for slots that stay unavailable
    pub async fn record_occupant(
        &self,
        indices: &[usize],
        occupant: &Occupant,
    ) -> GpuschedResult<()> {
        self.with_lock(|pool| {
            pool.occupy(indices, occupant);
            Ok(())
        })
        .await
    }
}

fn apply<T, F>(lock: &mut PoolLock, f: F) -> GpuschedResult<T>
where
    F: FnOnce(&mut ResourcePool) -> GpuschedResult<T>,
{
    let original = lock.read()?;
    let mut pool = original.clone();
    let out = f(&mut pool)?;
    if pool != original {
        lock.write(&pool)?;
    }
    Ok(out)
}
