//! vmnet-launch - run virtual machines on a vmnet network.
//!
//! Every VM needs two cooperating processes: vmnet-helper, which owns the
//! vmnet interface, and a hypervisor (vfkit, krunkit or qemu) running the
//! guest. Both share one datagram transport. This crate starts them in
//! order, reads the helper's interface handshake, and discovers the guest
//! address by following its serial console.
//!
//! # Example
//!
//! ```no_run
//! use vmnet_launch::{DiskImage, Driver, LaunchOptions, LauncherConfig, Orchestrator, VmId};
//!
//! let config = LauncherConfig::load()?;
//! let options = LaunchOptions::new(
//!     VmId::new("ubuntu")?,
//!     Driver::Vfkit,
//!     DiskImage::new("/path/to/disk.img"),
//!     "/path/to/cidata.iso",
//!     &config,
//! );
//!
//! let mut session = Orchestrator::new(config).launch(options)?;
//! println!("address: {:?}", session.address());
//! session.shutdown()?;
//! # Ok::<(), vmnet_launch::Error>(())
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod console;
pub mod error;
pub mod helper;
pub mod identity;
pub mod orchestrator;
pub mod process;
pub mod ssh;
pub mod store;
pub mod transport;
pub mod vm;

#[cfg(test)]
mod testing;

pub use config::LauncherConfig;
pub use console::{ConsoleFollower, Follow, FollowEvent};
pub use error::{Error, Result};
pub use helper::{
    HelperConfig, HelperProcess, HelperTarget, InterfaceInfo, ModeConfig, OperationMode, Privilege,
};
pub use identity::MacAddress;
pub use orchestrator::{LaunchOptions, Orchestrator, Session};
pub use process::ExitReason;
pub use store::VmStore;
pub use transport::{NetworkTransport, TransportChannel};
pub use vm::{DiskImage, Driver, VirtualMachine, VmConfig, VmId, VmState};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
