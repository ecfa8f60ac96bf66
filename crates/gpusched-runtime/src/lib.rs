//! gpusched-runtime: Running tasks on admitted slots
//!
//! This crate provides everything between admission and exit:
//! - Spawning the task in its own process group
//! - Interrupt escalation (warn, terminate, kill)
//! - The release guard returning slots on every exit path

pub mod escalation;
pub mod group;
pub mod guard;
pub mod launcher;
pub mod session;
pub mod signals;

pub use escalation::{Escalation, Event, Stage, Supervisor};
pub use group::{ProcessGroup, UnixProcessGroup};
pub use guard::ReleaseGuard;
pub use launcher::{Assignment, Launcher, TaskOutcome, TaskSpec};
pub use session::{Session, SessionOutcome};
