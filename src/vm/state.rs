//! VM lifecycle state types.

use serde::{Deserialize, Serialize};

/// VM lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    /// VM configured but not started.
    Created,

    /// Validating the configuration and building the command.
    Preparing,

    /// Hypervisor is being spawned.
    Starting,

    /// Hypervisor process is running.
    Running,

    /// Hypervisor was terminated and reaped.
    Stopped,

    /// Preparation or spawn failed; nothing is running.
    Failed,
}

impl VmState {
    /// Check if the VM is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VmState::Stopped | VmState::Failed)
    }

    /// Check if the VM can be started.
    pub fn can_start(&self) -> bool {
        matches!(self, VmState::Created)
    }

    /// Check if the VM can be stopped.
    pub fn can_stop(&self) -> bool {
        matches!(self, VmState::Running)
    }

    /// Get the state name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            VmState::Created => "created",
            VmState::Preparing => "preparing",
            VmState::Starting => "starting",
            VmState::Running => "running",
            VmState::Stopped => "stopped",
            VmState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
