//! Admission loop
//!
//! Polls the shared pool until the request can be satisfied, then claims the
//! selected slots in the same critical section that selected them.

use gpusched_core::GpuschedResult;
use gpusched_store::StateStore;
use std::time::Duration;
use tracing::{debug, info};

use crate::selection::{select, AdmissionRequest, Selection};

/// Admits tasks onto the pool held by a [`StateStore`]
#[derive(Debug, Clone)]
pub struct Admission {
    store: StateStore,
    poll_delay: Duration,
}

impl Admission {
    /// Create an admission loop polling every `poll_delay`
    pub fn new(store: StateStore, poll_delay: Duration) -> Self {
        Self { store, poll_delay }
    }

    /// One locked selection attempt; on success the slots are already
    /// marked unavailable when this returns
    pub async fn try_admit(&self, request: &AdmissionRequest) -> GpuschedResult<Selection> {
        self.store
            .with_lock(|pool| {
                let selection = select(pool.free_indices(), request);
                if let Selection::Assigned(slots) = &selection {
                    pool.reserve(slots);
                }
                Ok(selection)
            })
            .await
    }

    /// Wait until the request is admitted and return the claimed slots.
    ///
    /// Never returns if the pool is smaller than the requested count.
    pub async fn admit(&self, request: &AdmissionRequest) -> GpuschedResult<Vec<usize>> {
        let mut waiting = false;
        let mut waiting_forced = false;

        loop {
            let selection = self.try_admit(request).await?;
            let notified = match &selection {
                Selection::Assigned(slots) => {
                    info!(gpus = ?slots, "Admitted task");
                    return Ok(slots.clone());
                }
                Selection::Insufficient => &mut waiting,
                Selection::ForcedUnavailable => &mut waiting_forced,
            };
            if !*notified {
                *notified = true;
                if let Some(notice) = waiting_notice(&selection, request, std::process::id()) {
                    info!(requested = request.count(), forced = ?request.forced(), "{}", notice);
                    println!("{}", notice);
                }
            }
            debug!(delay = ?self.poll_delay, "Admission retry");
            tokio::time::sleep(self.poll_delay).await;
        }
    }
}

/// Notice printed once when a request has to wait for `selection`
pub fn waiting_notice(selection: &Selection, request: &AdmissionRequest, pid: u32) -> Option<String> {
    match selection {
        Selection::Assigned(_) => None,
        Selection::Insufficient => Some(format!(
            "Scheduler (PID: {}) is waiting for {} free GPU(s).",
            pid,
            request.count()
        )),
        Selection::ForcedUnavailable => Some(format!(
            "Scheduler (PID: {}) is waiting for GPU {}.",
            pid,
            join(request.forced())
        )),
    }
}

fn join(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn admission_in(dir: &TempDir, size: usize) -> (StateStore, Admission) {
        let store = StateStore::open(dir.path().join("state"), size)
            .unwrap()
            .with_lock_retry(Duration::from_millis(2));
        let admission = Admission::new(store.clone(), Duration::from_millis(10));
        (store, admission)
    }

    #[tokio::test]
    async fn test_admit_marks_exactly_k() {
        let dir = TempDir::new().unwrap();
        let (store, admission) = admission_in(&dir, 5);
        store.initialize(5, &[1]).await.unwrap();
        let before = store.snapshot().await.unwrap().availability();

        let req = AdmissionRequest::new(3, vec![], vec![]).unwrap();
        let slots = admission.admit(&req).await.unwrap();
        assert_eq!(slots, vec![0, 2, 3]);

        let after = store.snapshot().await.unwrap();
        assert_eq!(after.free_indices(), vec![4]);
        for idx in &slots {
            assert!(after.get(*idx).unwrap().is_reserved());
        }

        store.release(&slots).await.unwrap();
        assert_eq!(store.snapshot().await.unwrap().availability(), before);
    }

    #[tokio::test]
    async fn test_try_admit_insufficient_leaves_pool() {
        let dir = TempDir::new().unwrap();
        let (store, admission) = admission_in(&dir, 2);

        let req = AdmissionRequest::new(3, vec![], vec![]).unwrap();
        assert_eq!(admission.try_admit(&req).await.unwrap(), Selection::Insufficient);
        assert_eq!(store.snapshot().await.unwrap().free_indices(), vec![0, 1]);
    }

    #[test]
    fn test_waiting_notices() {
        let req = AdmissionRequest::new(2, vec![], vec![3, 1]).unwrap();
        assert_eq!(
            waiting_notice(&Selection::Insufficient, &req, 77).as_deref(),
            Some("Scheduler (PID: 77) is waiting for 2 free GPU(s).")
        );
        assert_eq!(
            waiting_notice(&Selection::ForcedUnavailable, &req, 77).as_deref(),
            Some("Scheduler (PID: 77) is waiting for GPU 3, 1.")
        );
        assert_eq!(waiting_notice(&Selection::Assigned(vec![3, 1]), &req, 77), None);
    }

    #[tokio::test]
    async fn test_admit_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let (store, admission) = admission_in(&dir, 2);
        store.initialize(2, &[0, 1]).await.unwrap();

        let req = AdmissionRequest::new(1, vec![], vec![]).unwrap();
        let waiter = tokio::spawn(async move { admission.admit(&req).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        store.release(&[1]).await.unwrap();
        let slots = waiter.await.unwrap().unwrap();
        assert_eq!(slots, vec![1]);
    }

    #[tokio::test]
    async fn test_forced_waits_for_specific_gpu() {
        let dir = TempDir::new().unwrap();
        let (store, admission) = admission_in(&dir, 6);
        store.initialize(6, &[0, 1, 3, 4]).await.unwrap();

        let req = AdmissionRequest::new(1, vec![], vec![0]).unwrap();
        assert_eq!(
            admission.try_admit(&req).await.unwrap(),
            Selection::ForcedUnavailable
        );
        assert_eq!(store.snapshot().await.unwrap().free_indices(), vec![2, 5]);

        let waiter = tokio::spawn(async move { admission.admit(&req).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        store.release(&[0]).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), vec![0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_never_share() {
        let dir = TempDir::new().unwrap();
        let (store, _) = admission_in(&dir, 8);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let admission = Admission::new(store.clone(), Duration::from_millis(5));
            handles.push(tokio::spawn(async move {
                let req = AdmissionRequest::new(2, vec![0, 1], vec![]).unwrap();
                admission.admit(&req).await.unwrap()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for slot in handle.await.unwrap() {
                assert!(seen.insert(slot), "slot {} assigned twice", slot);
            }
        }
        assert_eq!(seen.len(), 8);
        assert!(store.snapshot().await.unwrap().free_indices().is_empty());
    }
}
