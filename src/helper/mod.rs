//! vmnet-helper supervision.
//!
//! vmnet-helper is a small privileged program owning the vmnet interface.
//! It forwards packets between vmnet and the transport it was given, and
//! reports the interface it created as a single JSON line on stdout.
//!
//! - [`HelperConfig`]: validated configuration for one helper process
//! - [`HelperProcess`]: start / handshake / stop state machine
//! - [`InterfaceInfo`]: the handshake reply

mod interface;
mod launcher;
mod manager;

use crate::error::{Error, Result};
use crate::transport::NetworkTransport;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

pub use interface::{keys, InterfaceInfo, InterfaceShape};
pub use launcher::{helper_command, list_shared_interfaces, requires_escalation};
pub use manager::HelperProcess;

/// macOS major version from which vmnet works without root.
pub const UNPRIVILEGED_MACOS_MAJOR: u32 = 26;

/// vmnet operation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// NAT to the host network through a per-VM subnet.
    #[default]
    Shared,
    /// Bridged onto a host interface.
    Bridged,
    /// Host-only network.
    Host,
}

impl OperationMode {
    /// Mode name as accepted by vmnet-helper.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::Shared => "shared",
            OperationMode::Bridged => "bridged",
            OperationMode::Host => "host",
        }
    }
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "shared" => Ok(OperationMode::Shared),
            "bridged" => Ok(OperationMode::Bridged),
            "host" => Ok(OperationMode::Host),
            other => Err(Error::config(format!(
                "invalid operation mode '{}' (expected shared, bridged or host)",
                other
            ))),
        }
    }
}

/// Per-VM vmnet interface settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeConfig {
    /// Operation mode.
    pub mode: OperationMode,
    /// First DHCP address (shared mode).
    pub start_address: Option<Ipv4Addr>,
    /// Last DHCP address (shared mode).
    pub end_address: Option<Ipv4Addr>,
    /// Subnet mask (shared mode).
    pub subnet_mask: Option<Ipv4Addr>,
    /// Host interface to bridge onto (bridged mode).
    pub shared_interface: Option<String>,
    /// Isolate guests from each other (host mode).
    pub enable_isolation: bool,
}

impl ModeConfig {
    /// Mode with no extra settings.
    pub fn new(mode: OperationMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Set an explicit shared-mode subnet.
    pub fn subnet(mut self, start: Ipv4Addr, end: Ipv4Addr, mask: Ipv4Addr) -> Self {
        self.start_address = Some(start);
        self.end_address = Some(end);
        self.subnet_mask = Some(mask);
        self
    }

    /// Reject combinations vmnet-helper would refuse.
    pub fn validate(&self) -> Result<()> {
        if self.shared_interface.is_some() != (self.mode == OperationMode::Bridged) {
            return Err(Error::config(
                "shared interface is required for bridged mode and only valid there",
            ));
        }
        if self.enable_isolation && self.mode != OperationMode::Host {
            return Err(Error::config("isolation is only valid in host mode"));
        }

        match (self.start_address, self.end_address, self.subnet_mask) {
            (None, None, None) => Ok(()),
            (Some(start), Some(end), Some(_)) => {
                if self.mode != OperationMode::Shared {
                    return Err(Error::config("subnet is only valid in shared mode"));
                }
                if u32::from(start) > u32::from(end) {
                    return Err(Error::config(format!(
                        "start address {} is after end address {}",
                        start, end
                    )));
                }
                Ok(())
            }
            _ => Err(Error::config(
                "start address, end address and subnet mask must be set together",
            )),
        }
    }
}

/// What vmnet-helper connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HelperTarget {
    /// A shared network managed by vmnet-broker (`--network=NAME`).
    Network {
        /// Network name.
        name: String,
    },
    /// A per-VM interface (`--operation-mode=...`).
    Mode(ModeConfig),
}

impl Default for HelperTarget {
    fn default() -> Self {
        HelperTarget::Mode(ModeConfig::default())
    }
}

impl HelperTarget {
    /// Validate the target.
    pub fn validate(&self) -> Result<()> {
        match self {
            HelperTarget::Network { name } if name.trim().is_empty() => {
                Err(Error::config("network name must not be empty"))
            }
            HelperTarget::Network { .. } => Ok(()),
            HelperTarget::Mode(mode) => mode.validate(),
        }
    }

    /// Shape of the handshake reply this target produces.
    pub fn interface_shape(&self) -> InterfaceShape {
        match self {
            HelperTarget::Network { .. } => InterfaceShape::SharedNetwork,
            HelperTarget::Mode(mode) => match mode.mode {
                OperationMode::Shared => InterfaceShape::PerVmSubnet,
                OperationMode::Bridged | OperationMode::Host => InterfaceShape::BareInterface,
            },
        }
    }
}

/// Whether to run vmnet-helper through sudo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    /// Escalate when the host OS requires it.
    #[default]
    Auto,
    /// Always use sudo.
    Always,
    /// Never use sudo.
    Never,
}

impl Privilege {
    /// Resolve to a yes/no decision.
    pub fn escalate(&self) -> bool {
        match self {
            Privilege::Auto => requires_escalation(),
            Privilege::Always => true,
            Privilege::Never => false,
        }
    }
}

impl FromStr for Privilege {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Privilege::Auto),
            "always" => Ok(Privilege::Always),
            "never" => Ok(Privilege::Never),
            other => Err(Error::config(format!("invalid privilege '{}'", other))),
        }
    }
}

/// Lifecycle of a helper process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperState {
    /// Configured, not started.
    Created,
    /// Spawned, waiting for the handshake.
    Starting,
    /// Handshake completed.
    Running,
    /// Terminated and reaped.
    Stopped,
    /// Spawn or handshake failed; the process was stopped.
    Failed,
}

impl std::fmt::Display for HelperState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HelperState::Created => "created",
            HelperState::Starting => "starting",
            HelperState::Running => "running",
            HelperState::Stopped => "stopped",
            HelperState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Configuration for one vmnet-helper process.
#[derive(Debug, Clone)]
pub struct HelperConfig {
    /// VM served by this helper (for logs).
    pub vm_name: String,
    /// vmnet-helper executable.
    pub helper_path: PathBuf,
    /// Transport the helper forwards packets to.
    pub transport: NetworkTransport,
    /// vmnet interface id. `None` lets vmnet assign a new one.
    pub interface_id: Option<Uuid>,
    /// Network or operation mode.
    pub target: HelperTarget,
    /// Enable TSO and checksum offload.
    pub offload: bool,
    /// Verbose helper logging.
    pub verbose: bool,
    /// sudo policy.
    pub privilege: Privilege,
    /// File receiving the helper's stderr.
    pub log_path: PathBuf,
}

impl HelperConfig {
    /// Create a config with defaults for everything optional.
    pub fn new(
        vm_name: impl Into<String>,
        helper_path: impl Into<PathBuf>,
        transport: NetworkTransport,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            vm_name: vm_name.into(),
            helper_path: helper_path.into(),
            transport,
            interface_id: None,
            target: HelperTarget::default(),
            offload: false,
            verbose: false,
            privilege: Privilege::default(),
            log_path: log_path.into(),
        }
    }

    /// Single validation pass run before anything is spawned.
    pub fn validate(&self) -> Result<()> {
        if self.helper_path.as_os_str().is_empty() {
            return Err(Error::config("helper path must not be empty"));
        }
        if let NetworkTransport::Fd(fd) = self.transport {
            if fd < 0 {
                return Err(Error::config(format!("invalid fd: {}", fd)));
            }
        }
        self.target.validate()
    }
}
