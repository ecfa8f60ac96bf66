//! One scheduler run: admit, launch, release

use gpusched_core::{GpuschedResult, SchedulerConfig};
use gpusched_scheduler::{Admission, AdmissionRequest};
use gpusched_store::StateStore;
use tokio::sync::mpsc;
use tracing::info;

use crate::escalation::Event;
use crate::guard::ReleaseGuard;
use crate::launcher::{Launcher, TaskOutcome, TaskSpec};
use crate::signals::{event_channel, forward_interrupts};

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// The task ran and exited (for any reason)
    Completed(TaskOutcome),
    /// Interrupted while still waiting for admission
    Cancelled,
}

/// Admits a task, runs it and returns its slots
#[derive(Debug, Clone)]
pub struct Session {
    store: StateStore,
    admission: Admission,
    launcher: Launcher,
}

impl Session {
    pub fn new(store: StateStore, config: &SchedulerConfig) -> Self {
        Self {
            admission: Admission::new(store.clone(), config.admission.poll_delay()),
            launcher: Launcher::new(store.clone(), config.launcher.clone()),
            store,
        }
    }

    /// Run `task` with SIGINT routed into interrupt escalation
    pub async fn run(
        &self,
        request: &AdmissionRequest,
        task: &TaskSpec,
    ) -> GpuschedResult<SessionOutcome> {
        let (tx, rx) = event_channel();
        let forwarder = forward_interrupts(tx.clone())?;
        let result = self.run_with_events(request, task, (tx, rx)).await;
        forwarder.abort();
        result
    }

    /// Run `task`, taking interrupts from `events`
    pub async fn run_with_events(
        &self,
        request: &AdmissionRequest,
        task: &TaskSpec,
        events: (mpsc::Sender<Event>, mpsc::Receiver<Event>),
    ) -> GpuschedResult<SessionOutcome> {
        let (tx, mut rx) = events;

        // Claiming slots happens without an await point, so abandoning the
        // admission future on interrupt never leaks a reservation.
        let slots = tokio::select! {
            slots = self.admission.admit(request) => slots?,
            Some(Event::Interrupt) = rx.recv() => {
                info!("Interrupted while waiting for admission");
                return Ok(SessionOutcome::Cancelled);
            }
        };

        let guard = ReleaseGuard::new(self.store.clone(), slots);
        let outcome = self.launcher.launch(task, &guard, (tx, rx)).await;
        let released = guard.release().await;

        let outcome = outcome?;
        released?;
        Ok(SessionOutcome::Completed(outcome))
    }
}
