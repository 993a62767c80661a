//! Error types for vmnet-launch.

use crate::process::ExitReason;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using vmnet-launch's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while launching and supervising VMs.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    /// Invalid or contradictory configuration, detected before any process
    /// is spawned.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to load the launcher configuration file.
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Failed to save the launcher configuration file.
    #[error("failed to save config: {0}")]
    ConfigSave(String),

    // Helper errors
    /// The network helper did not complete its startup handshake.
    #[error("helper handshake failed: {0}")]
    Handshake(String),

    // Process errors
    /// A supervised process exited while it was expected to be running.
    #[error("{name} terminated ({reason})")]
    ProcessCrash {
        /// Which process exited ("virtual machine", "vmnet-helper").
        name: String,
        /// How it exited.
        reason: ExitReason,
    },

    /// A process handle is in the wrong state for the requested operation.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state.
        expected: String,
        /// Actual state.
        actual: String,
    },

    /// External command could not be started or failed.
    #[error("command failed: {command}: {message}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// Error message.
        message: String,
    },

    // Discovery errors
    /// The guest did not announce its address before the deadline.
    #[error("timeout looking up ip address of {name} after {}", humantime::format_duration(*timeout))]
    DiscoveryTimeout {
        /// VM name.
        name: String,
        /// How long we waited.
        timeout: Duration,
    },

    /// No guest address was recorded for the VM.
    #[error("no address recorded for vm '{0}'")]
    AddressNotFound(String),

    // Hypervisor errors
    /// No UEFI firmware image exists at any candidate path.
    #[error("unable to find firmware: {}", display_paths(candidates))]
    FirmwareNotFound {
        /// Paths that were tried, in order.
        candidates: Vec<PathBuf>,
    },

    // Serialization errors
    /// JSON error wrapper.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    /// IO error wrapper.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a handshake error with a message.
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::Handshake(msg.into())
    }

    /// Create a command failed error.
    pub fn command_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a process crash error.
    pub fn process_crash(name: impl Into<String>, reason: ExitReason) -> Self {
        Self::ProcessCrash {
            name: name.into(),
            reason,
        }
    }

    /// Exit code carried by a [`Error::ProcessCrash`], if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::ProcessCrash { reason, .. } => Some(reason.exit_code()),
            _ => None,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Error messages should include context that helps users fix the problem.

    #[test]
    fn test_process_crash_includes_exit_code() {
        let err = Error::process_crash("virtual machine", ExitReason::exited(3));
        let msg = err.to_string();
        assert!(msg.contains("virtual machine terminated"));
        assert!(msg.contains("exitcode 3"), "got: {}", msg);
        assert_eq!(err.exit_code(), Some(3));
    }

    #[test]
    fn test_firmware_not_found_lists_candidates() {
        let err = Error::FirmwareNotFound {
            candidates: vec![
                PathBuf::from("/opt/homebrew/share/qemu/edk2-aarch64-code.fd"),
                PathBuf::from("/usr/local/share/qemu/edk2-aarch64-code.fd"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("/opt/homebrew/share/qemu/edk2-aarch64-code.fd"));
        assert!(msg.contains("/usr/local/share/qemu/edk2-aarch64-code.fd"));
    }

    #[test]
    fn test_command_failed_includes_command_and_message() {
        let err = Error::command_failed("sudo", "permission denied");
        let msg = err.to_string();
        assert!(msg.contains("sudo"), "Error should include command name");
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn test_discovery_timeout_includes_name_and_duration() {
        let err = Error::DiscoveryTimeout {
            name: "alpine".to_string(),
            timeout: Duration::from_secs(60),
        };
        let msg = err.to_string();
        assert!(msg.contains("alpine"));
        assert!(msg.contains("1m"), "got: {}", msg);
        assert_eq!(err.exit_code(), None);
    }
}
