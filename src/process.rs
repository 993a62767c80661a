//! Supervised child processes.
//!
//! A [`ProcessHandle`] owns exactly one spawned child. Termination is
//! requested and waited exactly once; a handle dropped without being
//! terminated is terminated and reaped in `Drop`, so error paths never leave
//! orphans or zombies behind.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ChildStdout, ExitStatus};

/// How a supervised process exited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExitReason {
    /// Exited with code.
    Exited {
        /// Exit code from the process.
        code: i32,
    },

    /// Killed by signal.
    Signaled {
        /// Signal number.
        signal: i32,
    },
}

impl ExitReason {
    /// Map to a shell-style exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Exited { code } => *code,
            ExitReason::Signaled { signal } => 128 + signal,
        }
    }

    /// Create an exited reason with the given code.
    pub fn exited(code: i32) -> Self {
        Self::Exited { code }
    }

    /// Create a signaled reason with the given signal.
    pub fn signaled(signal: i32) -> Self {
        Self::Signaled { signal }
    }

    /// Check if this represents a successful exit.
    pub fn is_success(&self) -> bool {
        matches!(self, ExitReason::Exited { code: 0 })
    }
}

impl From<ExitStatus> for ExitReason {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ExitReason::exited(code),
            (None, Some(signal)) => ExitReason::signaled(signal),
            // Stopped/continued statuses are never returned by wait().
            (None, None) => ExitReason::exited(-1),
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Exited { code } => write!(f, "exitcode {}", code),
            ExitReason::Signaled { signal } => write!(f, "signal {}", signal),
        }
    }
}

/// Termination state of a [`ProcessHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Child is running (or exited but not yet reaped).
    Running,
    /// Child exited and was reaped.
    Exited(ExitReason),
}

/// Handle to a spawned child process.
#[derive(Debug)]
pub struct ProcessHandle {
    /// Human readable name used in logs and errors.
    name: String,
    child: Child,
    /// Signal the whole process group on terminate.
    group_leader: bool,
    state: ProcessState,
}

impl ProcessHandle {
    /// Wrap a freshly spawned child.
    pub fn new(name: impl Into<String>, child: Child) -> Self {
        Self {
            name: name.into(),
            child,
            group_leader: false,
            state: ProcessState::Running,
        }
    }

    /// Wrap a child spawned as a process group leader
    /// (`CommandExt::process_group(0)`). Terminating it signals the group.
    pub fn group_leader(name: impl Into<String>, child: Child) -> Self {
        let mut handle = Self::new(name, child);
        handle.group_leader = true;
        handle
    }

    /// Process name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process ID.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Current termination state.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Take the child's piped standard output.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Non-blocking poll. Returns the exit reason if the child has exited.
    pub fn try_exit(&mut self) -> Result<Option<ExitReason>> {
        if let ProcessState::Exited(reason) = self.state {
            return Ok(Some(reason));
        }
        match self.child.try_wait()? {
            Some(status) => {
                let reason = ExitReason::from(status);
                self.state = ProcessState::Exited(reason);
                Ok(Some(reason))
            }
            None => Ok(None),
        }
    }

    /// Fail with [`Error::ProcessCrash`] if the child has exited.
    pub fn check_running(&mut self) -> Result<()> {
        match self.try_exit()? {
            Some(reason) => Err(Error::process_crash(&self.name, reason)),
            None => Ok(()),
        }
    }

    /// Send SIGTERM (to the group for group leaders) and block until the
    /// child exits.
    ///
    /// A child that already exited is only reaped; "already gone" is not an
    /// error.
    pub fn terminate(&mut self) -> Result<ExitReason> {
        if let ProcessState::Exited(reason) = self.state {
            return Ok(reason);
        }

        let pid = self.child.id() as libc::pid_t;
        tracing::debug!(name = %self.name, pid, group = self.group_leader, "terminating process");

        let ret = unsafe {
            if self.group_leader {
                libc::killpg(pid, libc::SIGTERM)
            } else {
                libc::kill(pid, libc::SIGTERM)
            }
        };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            // ESRCH: exited between our last poll and the signal.
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::warn!(name = %self.name, pid, error = %err, "failed to signal process");
            }
        }

        let status = self.child.wait()?;
        let reason = ExitReason::from(status);
        self.state = ProcessState::Exited(reason);
        tracing::debug!(name = %self.name, pid, exit = %reason, "process exited");
        Ok(reason)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.state == ProcessState::Running {
            // Best-effort cleanup
            if let Err(e) = self.terminate() {
                tracing::warn!(name = %self.name, error = %e, "failed to terminate process");
            }
        }
    }
}
