//! Real SIGINT delivery to the scheduler process.
//!
//! Kept in its own test binary: once the handler is installed SIGINT no
//! longer terminates the process, and the signal reaches every test thread.

use gpusched_core::SchedulerConfig;
use gpusched_runtime::{Session, SessionOutcome, TaskSpec};
use gpusched_scheduler::AdmissionRequest;
use gpusched_store::StateStore;
use nix::sys::signal::{kill, Signal};
use nix::unistd::getpid;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

async fn wait_for_occupant(store: &StateStore, slot: usize) -> u32 {
    for _ in 0..200 {
        let pool = store.snapshot().await.unwrap();
        if let Some(occ) = &pool.get(slot).unwrap().occupant {
            return occ.pid;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("slot {} never got an occupant", slot);
}

async fn read_ids(path: &Path) -> Vec<u32> {
    for _ in 0..200 {
        if let Ok(text) = std::fs::read_to_string(path) {
            let ids: Vec<u32> = text
                .split_whitespace()
                .filter_map(|s| s.parse().ok())
                .collect();
            if ids.len() == 3 {
                return ids;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task never wrote its ids to {}", path.display());
}

#[tokio::test]
async fn test_sigint_escalates_detached_task() {
    let dir = TempDir::new().unwrap();
    let mut config = SchedulerConfig::default();
    config.store.path = dir.path().join("state");
    config.store.lock_retry_ms = 2;
    config.admission.poll_delay_ms = 10;
    config.launcher.kill_delay_ms = 2000;
    config.launcher.liveness_tick_ms = 10;

    let store = StateStore::open(&config.store.path, 2)
        .unwrap()
        .with_lock_retry(config.store.lock_retry());
    let ids_file = dir.path().join("ids");

    let session = Session::new(store.clone(), &config);
    let script = format!(
        "ps -o pid=,pgid=,sid= -p $$ > '{}'; sleep 30",
        ids_file.display()
    );
    let handle = tokio::spawn(async move {
        let request = AdmissionRequest::new(1, vec![], vec![]).unwrap();
        let task = TaskSpec::new(vec!["sh".to_string(), "-c".to_string(), script]);
        session.run(&request, &task).await
    });

    // The task leads its own process group and session.
    let pid = wait_for_occupant(&store, 0).await;
    assert_eq!(read_ids(&ids_file).await, vec![pid, pid, pid]);

    // First interrupt only warns.
    kill(getpid(), Signal::SIGINT).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!handle.is_finished());
    assert!(!store.snapshot().await.unwrap().get(0).unwrap().available);

    // Second interrupt terminates the group.
    kill(getpid(), Signal::SIGINT).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("task was not terminated")
        .unwrap()
        .unwrap();

    match outcome {
        SessionOutcome::Completed(outcome) => assert_eq!(outcome.status.signal(), Some(15)),
        SessionOutcome::Cancelled => panic!("session was cancelled"),
    }
    assert_eq!(store.snapshot().await.unwrap().free_indices(), vec![0, 1]);
}
