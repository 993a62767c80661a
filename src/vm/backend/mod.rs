//! Hypervisor command construction.
//!
//! Each backend turns a [`VmConfig`] into the argument vector of its
//! hypervisor. Dispatch is an exhaustive match on [`Driver`], so adding a
//! backend means adding a variant.

pub mod krunkit;
pub mod qemu;
pub mod vfkit;

use crate::error::Result;
use crate::store::{VmStore, EFI_VARIABLE_STORE, SERIAL_LOG};
use crate::vm::{Driver, VmConfig};
use std::path::PathBuf;

pub use qemu::{find_firmware, QemuArch};

/// Per-VM files referenced on the hypervisor command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmPaths {
    /// Serial console log.
    pub serial_log: PathBuf,
    /// EFI variable store (vfkit).
    pub efi_variable_store: PathBuf,
}

impl VmPaths {
    /// Paths inside the VM's store directory.
    pub fn new(store: &VmStore, name: &str) -> Self {
        Self {
            serial_log: store.path(name, SERIAL_LOG),
            efi_variable_store: store.path(name, EFI_VARIABLE_STORE),
        }
    }
}

/// Build the hypervisor command line for `config`.
///
/// Pure: nothing is created or spawned, so a failure here leaves no trace.
pub fn command(config: &VmConfig, paths: &VmPaths) -> Result<Vec<String>> {
    match config.driver {
        Driver::Vfkit => Ok(vfkit::command(config, paths)),
        Driver::Krunkit => Ok(krunkit::command(config, paths)),
        Driver::Qemu => qemu::command(config, paths),
    }
}

/// Executable to run: the configured override or the driver default.
fn executable(config: &VmConfig, default: &str) -> String {
    config
        .driver_command
        .clone()
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::identity::MacAddress;
    use crate::transport::NetworkTransport;
    use crate::vm::{DiskImage, VmId};

    pub(crate) fn test_config(driver: Driver, transport: NetworkTransport) -> VmConfig {
        VmConfig::builder(
            VmId::new("test").unwrap(),
            driver,
            MacAddress::new([0x92, 0xc4, 0x1d, 0x2a, 0x77, 0x10]),
        )
        .cpus(2)
        .memory(2048)
        .disk(DiskImage::new("/vms/test/disk.img"))
        .cidata("/vms/test/cidata.iso")
        .transport(transport)
        .build()
    }

    pub(crate) fn test_paths() -> VmPaths {
        VmPaths::new(&VmStore::new("/store"), "test")
    }

    #[test]
    fn test_vm_paths() {
        let paths = test_paths();
        assert_eq!(paths.serial_log, PathBuf::from("/store/vms/test/serial.log"));
        assert_eq!(
            paths.efi_variable_store,
            PathBuf::from("/store/vms/test/efi-variable-store")
        );
    }

    #[test]
    fn test_dispatch_by_driver() {
        let paths = test_paths();
        for (driver, exe) in [(Driver::Vfkit, "vfkit"), (Driver::Krunkit, "krunkit")] {
            let cmd = command(&test_config(driver, NetworkTransport::Fd(4)), &paths).unwrap();
            assert_eq!(cmd[0], exe);
        }
    }

    #[test]
    fn test_driver_command_override() {
        let mut config = test_config(Driver::Vfkit, NetworkTransport::Fd(4));
        config.driver_command = Some("/opt/vfkit/bin/vfkit".into());
        let cmd = command(&config, &test_paths()).unwrap();
        assert_eq!(cmd[0], "/opt/vfkit/bin/vfkit");
    }
}
