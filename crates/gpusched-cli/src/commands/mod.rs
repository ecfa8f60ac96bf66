//! CLI commands implementation

use anyhow::{bail, Result};
use gpusched_core::{PoolStatus, SchedulerConfig, TIMESTAMP_FORMAT};
use gpusched_runtime::{Session, SessionOutcome, TaskSpec};
use gpusched_scheduler::AdmissionRequest;
use gpusched_store::StateStore;
use std::fmt::Write;
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit code when the scheduler is interrupted before the task starts
const EXIT_CANCELLED: u8 = 130;

/// Everything needed to run one task
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub count: usize,
    pub preferred: Vec<usize>,
    pub forced: Vec<usize>,
    pub command: Vec<String>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub announce_count: bool,
    pub verbose: bool,
}

/// Reset the pool: `sizes[0]` slots, `sizes[1..]` marked busy
pub async fn init(store: &StateStore, sizes: &[usize]) -> Result<()> {
    let Some((&size, busy)) = sizes.split_first() else {
        bail!("--init needs the pool size");
    };
    if let Some(bad) = busy.iter().find(|&&i| i >= size) {
        bail!("Busy GPU {} is outside a pool of {}", bad, size);
    }
    store.initialize(size, busy).await?;
    Ok(())
}

/// Free the listed slots whoever holds them
pub async fn release(store: &StateStore, indices: &[usize]) -> Result<()> {
    let changed = store.release(indices).await?;
    if changed == 0 {
        println!("Nothing to release.");
    }
    Ok(())
}

/// Print used and free slots
pub async fn status(store: &StateStore) -> Result<()> {
    let pool = store.snapshot().await?;
    print!("{}", format_status(&pool.status()));
    Ok(())
}

/// Render a status report the way `--status` prints it
pub fn format_status(status: &PoolStatus) -> String {
    let mut out = String::new();

    if !status.occupied.is_empty() {
        out.push_str("Currently used GPU:\n-------------------\n");
        for slot in &status.occupied {
            match &slot.occupant {
                Some(occ) => {
                    let _ = writeln!(
                        out,
                        "GPU: {}\nUser: {}\nTask: {:?}\nTask PID: {}\nStarted: {}\n",
                        occ.label,
                        occ.user,
                        occ.task,
                        occ.pid,
                        occ.started_at.format(TIMESTAMP_FORMAT),
                    );
                }
                None => {
                    let _ = writeln!(out, "GPU {} (reserved, task not started)\n", slot.index);
                }
            }
        }
    }

    if status.free.is_empty() {
        out.push_str("No GPU available.\n");
    } else {
        out.push_str("Free GPU:\n---------\n");
        for index in &status.free {
            let _ = writeln!(out, "GPU {}", index);
        }
    }

    out
}

/// Wait for GPUs, run the task and map its result to an exit code
pub async fn run(
    store: &StateStore,
    config: &SchedulerConfig,
    options: RunOptions,
) -> Result<ExitCode> {
    let request = AdmissionRequest::new(options.count, options.preferred, options.forced)?;
    let task = TaskSpec {
        command: options.command,
        stdout: options.stdout,
        stderr: options.stderr,
        announce_count: options.announce_count,
    };

    let session = Session::new(store.clone(), config);
    match session.run(&request, &task).await? {
        SessionOutcome::Completed(outcome) => {
            if options.verbose {
                println!(
                    "{}",
                    outcome.summary(
                        &stream_name(task.stdout.as_ref(), "stdout"),
                        &stream_name(task.stderr.as_ref(), "stderr"),
                    )
                );
            }
            Ok(ExitCode::from(
                u8::try_from(outcome.exit_code()).unwrap_or(1),
            ))
        }
        SessionOutcome::Cancelled => {
            eprintln!("\nCancelled while waiting for GPUs.");
            Ok(ExitCode::from(EXIT_CANCELLED))
        }
    }
}

fn stream_name(path: Option<&PathBuf>, inherited: &str) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| inherited.to_string())
}
