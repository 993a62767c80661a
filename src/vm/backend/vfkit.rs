//! vfkit (Virtualization.framework) command line.

use super::{executable, VmPaths};
use crate::transport::NetworkTransport;
use crate::vm::VmConfig;

/// Build the vfkit command line.
///
/// Boots through EFI with a per-VM variable store; cidata is attached as
/// read-only USB mass storage.
pub fn command(config: &VmConfig, paths: &VmPaths) -> Vec<String> {
    let mut cmd = vec![
        executable(config, "vfkit"),
        format!("--memory={}", config.memory_mib),
        format!("--cpus={}", config.cpus),
        format!(
            "--bootloader=efi,variable-store={},create",
            paths.efi_variable_store.display()
        ),
        format!(
            "--device=usb-mass-storage,path={},readonly",
            config.cidata.display()
        ),
        format!("--device=virtio-blk,path={}", config.disk.image.display()),
        format!(
            "--device=virtio-serial,logFilePath={}",
            paths.serial_log.display()
        ),
        "--log-level=debug".to_string(),
    ];

    let net = match &config.transport {
        NetworkTransport::Fd(fd) => format!("--device=virtio-net,fd={},mac={}", fd, config.mac),
        NetworkTransport::Socket(path) => format!(
            "--device=virtio-net,unixSocketPath={},mac={}",
            path.display(),
            config.mac
        ),
    };
    cmd.push(net);
    cmd
}
