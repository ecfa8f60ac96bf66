//! Interrupt escalation for a running task
//!
//! Repeated user interrupts walk the task through
//! `Warn -> Terminate -> Done`. Terminating starts a liveness poll; if the
//! process group outlives the poll budget the poll raises a deadline event,
//! which arms `Kill` and kills the group without another interrupt.
//!
//! Interrupts and deadlines are queued as [`Event`]s and applied one at a
//! time by [`Supervisor::dispatch`]. The stage itself is an atomic updated
//! only through compare-and-set, so an event can never be applied twice.

use gpusched_core::GpuschedResult;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::group::ProcessGroup;
use crate::guard::ReleaseGuard;

/// Escalation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Warn = 0,
    Terminate = 1,
    Kill = 2,
    Done = 3,
}

impl Stage {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Stage::Warn,
            1 => Stage::Terminate,
            2 => Stage::Kill,
            _ => Stage::Done,
        }
    }
}

/// Input to the escalation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The user interrupted the scheduler
    Interrupt,
    /// The task outlived the terminate budget
    Deadline,
}

/// What to do to the task after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Warn,
    Terminate,
    Kill,
}

/// The escalation state machine
#[derive(Debug)]
pub struct Escalation {
    stage: AtomicU8,
}

impl Default for Escalation {
    fn default() -> Self {
        Self::new()
    }
}

impl Escalation {
    pub fn new() -> Self {
        Self {
            stage: AtomicU8::new(Stage::Warn as u8),
        }
    }

    pub fn stage(&self) -> Stage {
        Stage::from_u8(self.stage.load(Ordering::Acquire))
    }

    /// Apply `event`, returning the action it calls for
    pub fn transition(&self, event: Event) -> Option<Action> {
        match event {
            Event::Interrupt => loop {
                let current = self.stage();
                let (next, action) = match current {
                    Stage::Warn => (Stage::Terminate, Action::Warn),
                    Stage::Terminate => (Stage::Done, Action::Terminate),
                    Stage::Kill => (Stage::Done, Action::Kill),
                    Stage::Done => return None,
                };
                if self.advance(current, next) {
                    return Some(action);
                }
            },
            Event::Deadline => {
                if self.advance(Stage::Done, Stage::Kill) && self.advance(Stage::Kill, Stage::Done)
                {
                    Some(Action::Kill)
                } else {
                    None
                }
            }
        }
    }

    fn advance(&self, from: Stage, to: Stage) -> bool {
        self.stage
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Applies escalation events to one launched task
pub struct Supervisor<'a> {
    escalation: Escalation,
    group: Arc<dyn ProcessGroup>,
    guard: &'a ReleaseGuard,
    events: mpsc::Sender<Event>,
    kill_delay: Duration,
    liveness_tick: Duration,
    liveness: Option<JoinHandle<()>>,
}

impl<'a> Supervisor<'a> {
    pub fn new(
        group: Arc<dyn ProcessGroup>,
        guard: &'a ReleaseGuard,
        events: mpsc::Sender<Event>,
        kill_delay: Duration,
        liveness_tick: Duration,
    ) -> Self {
        Self {
            escalation: Escalation::new(),
            group,
            guard,
            events,
            kill_delay,
            liveness_tick,
            liveness: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.escalation.stage()
    }

    /// Apply one event and carry out the resulting action
    pub async fn dispatch(&mut self, event: Event) -> GpuschedResult<()> {
        let pgid = self.group.id();
        match self.escalation.transition(event) {
            Some(Action::Warn) => {
                eprintln!("\nNext Ctrl-C terminates the task (PGID: {}).", pgid);
            }
            Some(Action::Terminate) => {
                eprintln!("\nThe task (PGID: {}) was terminated.", pgid);
                self.guard.release().await?;
                // Twice, for tasks that block the first delivery.
                self.group.terminate()?;
                self.group.terminate()?;
                info!(pgid, "Sent SIGTERM to task group");
                self.liveness = Some(spawn_liveness_poll(
                    self.group.clone(),
                    self.events.clone(),
                    self.kill_delay,
                    self.liveness_tick,
                ));
            }
            Some(Action::Kill) => {
                eprintln!("\nThe task (PGID: {}) was killed.", pgid);
                self.guard.release().await?;
                self.group.kill()?;
                warn!(pgid, "Sent SIGKILL to task group");
            }
            None => debug!(?event, "Event ignored"),
        }
        Ok(())
    }
}

impl Drop for Supervisor<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.liveness.take() {
            handle.abort();
        }
    }
}

/// Watch `group` for up to `budget`; emit [`Event::Deadline`] if it is
/// still alive when the budget runs out
pub fn spawn_liveness_poll(
    group: Arc<dyn ProcessGroup>,
    events: mpsc::Sender<Event>,
    budget: Duration,
    tick: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let deadline = Instant::now() + budget;
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            if !group.is_alive() {
                debug!(pgid = group.id(), "Task group exited after SIGTERM");
                return;
            }
            if Instant::now() >= deadline {
                debug!(pgid = group.id(), "Task group survived SIGTERM");
                let _ = events.send(Event::Deadline).await;
                return;
            }
        }
    })
}
