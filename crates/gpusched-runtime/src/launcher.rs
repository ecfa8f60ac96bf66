//! Task launcher
//!
//! Spawns the task as the leader of a new session so that terminal
//! interrupts reach only the scheduler, which forwards them to the task's
//! group through the escalation machinery.

use chrono::{Local, NaiveDateTime, TimeDelta};
use gpusched_core::{GpuschedError, GpuschedResult, LauncherConfig, Occupant, TIMESTAMP_FORMAT};
use gpusched_store::StateStore;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::{self, Pid, Uid, User};
use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::escalation::{Event, Supervisor};
use crate::group::{ProcessGroup, UnixProcessGroup};
use crate::guard::ReleaseGuard;

/// The command to run and where its output goes
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    /// Program and arguments
    pub command: Vec<String>,
    /// File receiving the task's stdout (inherited when unset)
    pub stdout: Option<PathBuf>,
    /// File receiving the task's stderr (inherited when unset)
    pub stderr: Option<PathBuf>,
    /// Also export the number of assigned slots
    pub announce_count: bool,
}

impl TaskSpec {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            ..Default::default()
        }
    }
}

/// Slots handed to a task and the handle it sees them under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub slots: Vec<usize>,
    pub label: String,
}

impl Assignment {
    /// A single slot is named `<prefix><index>`; several slots are listed
    /// as comma-joined indices
    pub fn new(slots: Vec<usize>, label_prefix: &str) -> Self {
        let label = match slots.as_slice() {
            [only] => format!("{}{}", label_prefix, only),
            many => many
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(","),
        };
        Self { slots, label }
    }
}

/// Port derived from the first assigned slot
pub fn port_for(first_slot: usize, base: u32, stride: u32) -> GpuschedResult<u32> {
    u32::try_from(first_slot)
        .ok()
        .and_then(|slot| slot.checked_mul(stride))
        .and_then(|offset| offset.checked_add(base))
        .ok_or_else(|| {
            GpuschedError::Launch(format!(
                "Port for GPU {} overflows (base {}, stride {})",
                first_slot, base, stride
            ))
        })
}

/// Replace every argument equal to `token` with `value`
pub fn substitute_placeholder(args: &[String], token: &str, value: &str) -> Vec<String> {
    args.iter()
        .map(|a| {
            if a == token {
                value.to_string()
            } else {
                a.clone()
            }
        })
        .collect()
}

/// Result of a finished task
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub command: Vec<String>,
    pub status: ExitStatus,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
}

impl TaskOutcome {
    pub fn elapsed(&self) -> TimeDelta {
        self.finished_at - self.started_at
    }

    /// Exit code, or 128 + signal number for a task killed by a signal
    pub fn exit_code(&self) -> i32 {
        match (self.status.code(), self.status.signal()) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => 1,
        }
    }

    /// Multi-line summary printed in verbose mode
    pub fn summary(&self, stdout: &str, stderr: &str) -> String {
        format!(
            "\ntask: {:?}\nstdout: {}\nstderr: {}\nstart: {}\nend: {}\ntotal time: {}\n",
            self.command,
            stdout,
            stderr,
            self.started_at.format(TIMESTAMP_FORMAT),
            self.finished_at.format(TIMESTAMP_FORMAT),
            format_duration(self.elapsed()),
        )
    }
}

/// `hours:minutes:seconds` without padding
pub fn format_duration(delta: TimeDelta) -> String {
    let total = delta.num_seconds().max(0);
    let (mins, secs) = (total / 60, total % 60);
    let (hours, mins) = (mins / 60, mins % 60);
    format!("{}:{}:{}", hours, mins, secs)
}

/// Login name of the invoking user
pub fn current_user() -> String {
    let uid = Uid::current();
    match User::from_uid(uid) {
        Ok(Some(user)) => user.name,
        _ => std::env::var("USER").unwrap_or_else(|_| uid.to_string()),
    }
}

/// Launches tasks onto admitted slots
#[derive(Debug, Clone)]
pub struct Launcher {
    store: StateStore,
    config: LauncherConfig,
}

impl Launcher {
    pub fn new(store: StateStore, config: LauncherConfig) -> Self {
        Self { store, config }
    }

    /// Build the command for `task` on `assignment`
    fn build_command(&self, task: &TaskSpec, assignment: &Assignment) -> GpuschedResult<Command> {
        let argv = self.prepare_args(task, assignment)?;

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.env(&self.config.env_var, &assignment.label);
        if task.announce_count {
            cmd.env(
                &self.config.count_env_var,
                assignment.slots.len().to_string(),
            );
        }

        cmd.stdin(Stdio::inherit());
        cmd.stdout(output_stream(task.stdout.as_ref())?);
        cmd.stderr(output_stream(task.stderr.as_ref())?);

        // SAFETY: the hook only calls async-signal-safe functions.
        unsafe {
            cmd.pre_exec(detach_from_terminal);
        }

        Ok(cmd)
    }

    /// Command line after placeholder substitution
    pub fn prepare_args(
        &self,
        task: &TaskSpec,
        assignment: &Assignment,
    ) -> GpuschedResult<Vec<String>> {
        let first = *assignment
            .slots
            .first()
            .ok_or_else(|| GpuschedError::Launch("No slots assigned".to_string()))?;
        if task.command.is_empty() {
            return Err(GpuschedError::Launch("Empty task command".to_string()));
        }

        let port = port_for(first, self.config.port_base, self.config.port_stride)?;
        Ok(substitute_placeholder(
            &task.command,
            &self.config.placeholder,
            &port.to_string(),
        ))
    }

    /// Run `task` on the slots held by `guard` until it exits.
    ///
    /// `events` delivers interrupts to the escalation machine; its sender is
    /// also used by the liveness poll. The guard is released by escalation
    /// when the task is terminated, not here.
    pub async fn launch(
        &self,
        task: &TaskSpec,
        guard: &ReleaseGuard,
        events: (mpsc::Sender<Event>, mpsc::Receiver<Event>),
    ) -> GpuschedResult<TaskOutcome> {
        let assignment = Assignment::new(guard.slots().to_vec(), &self.config.label_prefix);
        let command = self.prepare_args(task, &assignment)?;
        let mut cmd = self.build_command(task, &assignment)?;

        let started_at = Local::now().naive_local();
        let mut child = cmd.spawn().map_err(|e| {
            error!(task = ?command, error = %e, "Failed to spawn task");
            GpuschedError::Launch(format!("Failed to spawn {}: {}", command[0], e))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| GpuschedError::Launch("Task exited before its PID was read".to_string()))?;

        let occupant = Occupant {
            user: current_user(),
            task: command.clone(),
            pid,
            started_at,
            label: assignment.label.clone(),
        };

        // Never leave the task running once supervision is gone.
        let status = match self.supervise(&mut child, &assignment, occupant, guard, events).await {
            Ok(status) => status,
            Err(e) => {
                error!(pid, error = %e, "Supervision failed, killing task group");
                if let Err(kill_err) = UnixProcessGroup::new(pid as i32).kill() {
                    error!(pid, error = %kill_err, "Failed to kill task group");
                }
                let _ = child.wait().await;
                return Err(e);
            }
        };

        let finished_at = Local::now().naive_local();
        debug!(pid, %status, "Task finished");

        Ok(TaskOutcome {
            command,
            status,
            started_at,
            finished_at,
        })
    }

    /// Record the occupant, then apply escalation events until the task exits
    async fn supervise(
        &self,
        child: &mut Child,
        assignment: &Assignment,
        occupant: Occupant,
        guard: &ReleaseGuard,
        events: (mpsc::Sender<Event>, mpsc::Receiver<Event>),
    ) -> GpuschedResult<ExitStatus> {
        let (tx, mut rx) = events;
        let pid = occupant.pid;
        self.store.record_occupant(&assignment.slots, &occupant).await?;

        info!(gpus = ?assignment.slots, pid, "Task started");
        print_banner(&assignment.label, pid);

        let group = Arc::new(UnixProcessGroup::new(pid as i32));
        let mut supervisor = Supervisor::new(
            group,
            guard,
            tx,
            self.config.kill_delay(),
            self.config.liveness_tick(),
        );

        loop {
            tokio::select! {
                status = child.wait() => return Ok(status?),
                Some(event) = rx.recv() => supervisor.dispatch(event).await?,
            }
        }
    }
}

fn output_stream(path: Option<&PathBuf>) -> GpuschedResult<Stdio> {
    match path {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                GpuschedError::Launch(format!("Cannot create {}: {}", path.display(), e))
            })?;
            Ok(Stdio::from(file))
        }
        None => Ok(Stdio::inherit()),
    }
}

/// Runs in the child between fork and exec: start a new session and give
/// SIGINT back its default disposition.
fn detach_from_terminal() -> std::io::Result<()> {
    unistd::setsid()?;
    // SAFETY: resetting to SIG_DFL installs no handler code.
    unsafe { signal::signal(Signal::SIGINT, SigHandler::SigDfl) }?;
    Ok(())
}

fn print_banner(label: &str, task_pid: u32) {
    let own_pid = std::process::id();
    let pgid = |pid: u32| {
        unistd::getpgid(Some(Pid::from_raw(pid as i32)))
            .map(|p| p.to_string())
            .unwrap_or_else(|_| "?".to_string())
    };
    println!("GPU: {}\nSCH PID: {}\nTASK PID: {}", label, own_pid, task_pid);
    println!("SCH PGID: {}\nTASK PGID: {}", pgid(own_pid), pgid(task_pid));
}
