//! Forwarding of OS interrupts into the escalation event queue

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::escalation::Event;

/// Capacity of the escalation event queue
pub const EVENT_QUEUE: usize = 16;

/// Create an escalation event queue
pub fn event_channel() -> (mpsc::Sender<Event>, mpsc::Receiver<Event>) {
    mpsc::channel(EVENT_QUEUE)
}

/// Take over SIGINT and deliver each one as [`Event::Interrupt`].
///
/// From this point on SIGINT no longer terminates the scheduler.
pub fn forward_interrupts(events: mpsc::Sender<Event>) -> std::io::Result<JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(tokio::spawn(async move {
        while sigint.recv().await.is_some() {
            trace!("SIGINT received");
            if events.send(Event::Interrupt).await.is_err() {
                break;
            }
        }
    }))
}
