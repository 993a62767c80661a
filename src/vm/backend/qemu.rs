//! qemu command line.

use super::{executable, VmPaths};
use crate::error::{Error, Result};
use crate::transport::NetworkTransport;
use crate::vm::VmConfig;
use std::path::{Path, PathBuf};

/// Hardware accelerator for the host OS.
#[cfg(target_os = "macos")]
pub const ACCELERATOR: &str = "hvf";

/// Hardware accelerator for the host OS.
#[cfg(not(target_os = "macos"))]
pub const ACCELERATOR: &str = "kvm";

/// Guest architecture, always the host architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QemuArch {
    /// arm64 hosts.
    Aarch64,
    /// Intel hosts.
    X86_64,
}

impl QemuArch {
    /// Architecture of this host.
    pub fn host() -> Result<Self> {
        Self::from_machine(std::env::consts::ARCH)
    }

    /// Map a machine name (`uname -m` or Rust's `ARCH`) to an architecture.
    pub fn from_machine(machine: &str) -> Result<Self> {
        match machine {
            "aarch64" | "arm64" => Ok(QemuArch::Aarch64),
            "x86_64" => Ok(QemuArch::X86_64),
            other => Err(Error::config(format!(
                "qemu driver is not supported on {}",
                other
            ))),
        }
    }

    /// qemu architecture name.
    pub fn as_str(&self) -> &'static str {
        match self {
            QemuArch::Aarch64 => "aarch64",
            QemuArch::X86_64 => "x86_64",
        }
    }

    /// Machine type.
    pub fn machine(&self) -> &'static str {
        match self {
            QemuArch::Aarch64 => "virt",
            QemuArch::X86_64 => "q35",
        }
    }

    /// UEFI firmware file name.
    pub fn firmware_name(&self) -> String {
        format!("edk2-{}-code.fd", self.as_str())
    }

    /// Default emulator executable.
    pub fn default_command(&self) -> String {
        format!("qemu-system-{}", self.as_str())
    }
}

/// Find the UEFI firmware for `arch`; the first existing candidate wins.
pub fn find_firmware(arch: QemuArch, dirs: &[PathBuf]) -> Result<PathBuf> {
    let name = arch.firmware_name();
    let candidates: Vec<PathBuf> = dirs.iter().map(|dir| dir.join(&name)).collect();
    match candidates.iter().find(|path| path.exists()) {
        Some(path) => Ok(path.clone()),
        None => Err(Error::FirmwareNotFound { candidates }),
    }
}

/// Build the qemu command line for the host architecture.
pub fn command(config: &VmConfig, paths: &VmPaths) -> Result<Vec<String>> {
    command_for_arch(config, paths, QemuArch::host()?)
}

/// Build the qemu command line for `arch`.
///
/// Only descriptor transports work: qemu's dgram netdev needs both a local
/// and a remote unix address and cannot share the helper's single socket.
pub fn command_for_arch(config: &VmConfig, paths: &VmPaths, arch: QemuArch) -> Result<Vec<String>> {
    let netdev = match &config.transport {
        NetworkTransport::Fd(fd) => format!("dgram,id=net1,local.type=fd,local.str={}", fd),
        NetworkTransport::Socket(_) => {
            return Err(Error::config(
                "socket transport is not supported for qemu driver",
            ))
        }
    };
    let firmware = find_firmware(arch, &config.firmware_dirs)?;

    let mut cmd = vec![
        executable(config, &arch.default_command()),
        "-name".to_string(),
        config.name.to_string(),
        "-m".to_string(),
        config.memory_mib.to_string(),
        "-cpu".to_string(),
        "host".to_string(),
        "-machine".to_string(),
        format!("{},accel={}", arch.machine(), ACCELERATOR),
        "-smp".to_string(),
        format!(
            "{},sockets=1,cores={},threads=1",
            config.cpus, config.cpus
        ),
        "-drive".to_string(),
        format!("if=pflash,format=raw,readonly=on,file={}", firmware.display()),
        "-drive".to_string(),
        format!(
            "file={},if=virtio,format=raw,discard=on",
            config.disk.image.display()
        ),
        "-drive".to_string(),
        format!(
            "file={},id=cdrom0,if=none,format=raw,readonly=on",
            config.cidata.display()
        ),
        "-device".to_string(),
        "virtio-scsi-pci,id=scsi0".to_string(),
        "-device".to_string(),
        "scsi-cd,bus=scsi0.0,drive=cdrom0".to_string(),
        "-netdev".to_string(),
        netdev,
        "-device".to_string(),
        format!("virtio-net-pci,netdev=net1,mac={}", config.mac),
        "-monitor".to_string(),
        "none".to_string(),
        "-serial".to_string(),
        format!("file:{}", paths.serial_log.display()),
        "-nographic".to_string(),
        "-nodefaults".to_string(),
    ];

    if let Some(kernel) = &config.disk.kernel {
        cmd.push("-kernel".to_string());
        cmd.push(path_arg(kernel));
    }
    if !config.disk.kernel_parameters.is_empty() {
        cmd.push("-append".to_string());
        cmd.push(config.disk.kernel_parameters.join(" "));
    }
    if let Some(initrd) = &config.disk.initrd {
        cmd.push("-initrd".to_string());
        cmd.push(path_arg(initrd));
    }

    Ok(cmd)
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
