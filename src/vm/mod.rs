//! Hypervisor supervision.
//!
//! - [`VmConfig`]: validated configuration for one VM
//! - [`backend`]: per-driver command construction (vfkit, krunkit, qemu)
//! - [`VirtualMachine`]: start / address discovery / stop state machine

pub mod backend;
pub mod config;
pub mod machine;
pub mod state;

pub use config::{
    ClientWrapper, DiskImage, Driver, VmConfig, VmConfigBuilder, VmId, CLIENT_COMMAND_FD,
};
pub use machine::VirtualMachine;
pub use state::VmState;
