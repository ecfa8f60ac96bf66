//! Process group control

use gpusched_core::{GpuschedError, GpuschedResult};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Signal delivery to the process group of a launched task
pub trait ProcessGroup: Send + Sync {
    /// Process group id
    fn id(&self) -> i32;

    /// Ask every process in the group to terminate
    fn terminate(&self) -> GpuschedResult<()>;

    /// Unconditionally kill every process in the group
    fn kill(&self) -> GpuschedResult<()>;

    /// Whether any process of the group still exists
    fn is_alive(&self) -> bool;
}

/// A Unix process group addressed by its id
#[derive(Debug, Clone, Copy)]
pub struct UnixProcessGroup {
    pgid: Pid,
}

impl UnixProcessGroup {
    pub fn new(pgid: i32) -> Self {
        Self {
            pgid: Pid::from_raw(pgid),
        }
    }

    fn send(&self, sig: Signal) -> GpuschedResult<()> {
        match signal::killpg(self.pgid, Some(sig)) {
            // The group is already gone.
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(GpuschedError::Launch(format!(
                "Cannot send {} to PGID {}: {}",
                sig, self.pgid, errno
            ))),
        }
    }
}

impl ProcessGroup for UnixProcessGroup {
    fn id(&self) -> i32 {
        self.pgid.as_raw()
    }

    fn terminate(&self) -> GpuschedResult<()> {
        self.send(Signal::SIGTERM)
    }

    fn kill(&self) -> GpuschedResult<()> {
        self.send(Signal::SIGKILL)
    }

    fn is_alive(&self) -> bool {
        !matches!(signal::killpg(self.pgid, None::<Signal>), Err(Errno::ESRCH))
    }
}
