//! VM configuration types.

use crate::error::{Error, Result};
use crate::helper::ModeConfig;
use crate::identity::MacAddress;
use crate::transport::NetworkTransport;
use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Descriptor vmnet-client hands to the hypervisor it executes.
pub const CLIENT_COMMAND_FD: RawFd = 4;

/// Maximum VM name length.
const MAX_NAME_LEN: usize = 64;

/// VM name, used as the state directory name and in the guest's address
/// announcement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmId(String);

impl VmId {
    /// Validate a VM name.
    ///
    /// Only alphanumeric characters, dashes, underscores and dots are
    /// allowed, the name may not start with a dot, and is limited to 64
    /// characters.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(Error::config(format!(
                "vm name must be 1-{} characters: {:?}",
                MAX_NAME_LEN, name
            )));
        }
        if name.starts_with('.')
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(Error::config(format!("invalid vm name: {:?}", name)));
        }
        Ok(Self(name))
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for VmId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Hypervisor backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// vfkit (Virtualization.framework).
    Vfkit,
    /// krunkit (libkrun).
    Krunkit,
    /// qemu-system with hardware acceleration.
    Qemu,
}

impl Driver {
    /// All drivers, in display order.
    pub const ALL: [Driver; 3] = [Driver::Vfkit, Driver::Krunkit, Driver::Qemu];

    /// Driver identifier, also used to name its log and command files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Vfkit => "vfkit",
            Driver::Krunkit => "krunkit",
            Driver::Qemu => "qemu",
        }
    }

    /// `<driver>.log` file name.
    pub fn log_file(&self) -> String {
        format!("{}.log", self.as_str())
    }

    /// `<driver>.command` file name.
    pub fn command_file(&self) -> String {
        format!("{}.command", self.as_str())
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Driver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Driver::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| {
                Error::config(format!(
                    "invalid driver '{}' (expected vfkit, krunkit or qemu)",
                    s
                ))
            })
    }
}

/// Boot disk prepared by the disk collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskImage {
    /// Raw disk image.
    pub image: PathBuf,
    /// Kernel to boot directly (qemu only).
    pub kernel: Option<PathBuf>,
    /// Initial ramdisk (qemu only).
    pub initrd: Option<PathBuf>,
    /// Kernel command line parameters (qemu only).
    pub kernel_parameters: Vec<String>,
}

impl DiskImage {
    /// Disk booting through firmware.
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }
}

/// vmnet-client settings.
///
/// vmnet-client starts vmnet-helper itself and executes the hypervisor with
/// the transport on [`CLIENT_COMMAND_FD`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWrapper {
    /// vmnet-client executable.
    pub path: PathBuf,
    /// Interface settings mirrored to the helper the client starts.
    pub mode: ModeConfig,
    /// vmnet interface id.
    pub interface_id: Option<Uuid>,
    /// Pass `--privileged` to the client.
    pub privileged: bool,
    /// Pass `--verbose` to the client.
    pub verbose: bool,
}

impl ClientWrapper {
    /// Client with default settings for `mode`.
    pub fn new(path: impl Into<PathBuf>, mode: ModeConfig) -> Self {
        Self {
            path: path.into(),
            mode,
            interface_id: None,
            privileged: false,
            verbose: false,
        }
    }

    /// Wrap a hypervisor command line.
    pub fn wrap(&self, vm_command: Vec<String>) -> Vec<String> {
        let mut cmd = vec![
            self.path.display().to_string(),
            format!("--operation-mode={}", self.mode.mode),
        ];
        if let Some(id) = self.interface_id {
            cmd.push(format!("--interface-id={}", id));
        }
        if let (Some(start), Some(end), Some(mask)) = (
            self.mode.start_address,
            self.mode.end_address,
            self.mode.subnet_mask,
        ) {
            cmd.push(format!("--start-address={}", start));
            cmd.push(format!("--end-address={}", end));
            cmd.push(format!("--subnet-mask={}", mask));
        }
        if let Some(iface) = &self.mode.shared_interface {
            cmd.push(format!("--shared-interface={}", iface));
        }
        if self.mode.enable_isolation {
            cmd.push("--enable-isolation".to_string());
        }
        if self.privileged {
            cmd.push("--privileged".to_string());
        }
        if self.verbose {
            cmd.push("--verbose".to_string());
        }
        cmd.push("--".to_string());
        cmd.extend(vm_command);
        cmd
    }
}

/// Complete VM configuration.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// VM name.
    pub name: VmId,
    /// Hypervisor backend.
    pub driver: Driver,
    /// Hypervisor executable, overriding the driver default.
    pub driver_command: Option<String>,
    /// Number of vCPUs.
    pub cpus: u8,
    /// Memory in MiB.
    pub memory_mib: u32,
    /// Boot disk.
    pub disk: DiskImage,
    /// cloud-init ISO.
    pub cidata: PathBuf,
    /// Guest MAC address.
    pub mac: MacAddress,
    /// Network transport consumed by the hypervisor.
    pub transport: NetworkTransport,
    /// Run the hypervisor through vmnet-client.
    pub client: Option<ClientWrapper>,
    /// Enable virtio-net offloading (krunkit).
    pub offload: bool,
    /// Directories searched for qemu firmware.
    pub firmware_dirs: Vec<PathBuf>,
    /// Guest user written to the SSH config.
    pub user: String,
}

impl VmConfig {
    /// Create a builder for VmConfig.
    pub fn builder(name: VmId, driver: Driver, mac: MacAddress) -> VmConfigBuilder {
        VmConfigBuilder::new(name, driver, mac)
    }

    /// Reject contradictory settings before anything is created.
    pub fn validate(&self) -> Result<()> {
        if self.cpus == 0 {
            return Err(Error::config("cpus must be at least 1"));
        }
        if self.memory_mib == 0 {
            return Err(Error::config("memory must be at least 1 MiB"));
        }
        if self.disk.image.as_os_str().is_empty() {
            return Err(Error::config("disk image is required"));
        }
        if self.cidata.as_os_str().is_empty() {
            return Err(Error::config("cidata image is required"));
        }
        if self.driver == Driver::Qemu && matches!(self.transport, NetworkTransport::Socket(_)) {
            return Err(Error::config("socket transport is not supported for qemu driver"));
        }
        if let Some(client) = &self.client {
            if self.transport != NetworkTransport::Fd(CLIENT_COMMAND_FD) {
                return Err(Error::config(format!(
                    "vmnet-client passes the transport on fd {}",
                    CLIENT_COMMAND_FD
                )));
            }
            client.mode.validate()?;
        }
        Ok(())
    }
}

/// Builder for VmConfig.
#[derive(Debug)]
pub struct VmConfigBuilder {
    config: VmConfig,
}

impl VmConfigBuilder {
    /// Create a new builder with defaults for everything optional.
    pub fn new(name: VmId, driver: Driver, mac: MacAddress) -> Self {
        Self {
            config: VmConfig {
                name,
                driver,
                driver_command: None,
                cpus: 1,
                memory_mib: 1024,
                disk: DiskImage::default(),
                cidata: PathBuf::new(),
                mac,
                transport: NetworkTransport::Fd(CLIENT_COMMAND_FD),
                client: None,
                offload: false,
                firmware_dirs: Vec::new(),
                user: String::from("ubuntu"),
            },
        }
    }

    /// Set the hypervisor executable.
    pub fn driver_command(mut self, command: impl Into<String>) -> Self {
        self.config.driver_command = Some(command.into());
        self
    }

    /// Set the number of CPUs.
    pub fn cpus(mut self, cpus: u8) -> Self {
        self.config.cpus = cpus;
        self
    }

    /// Set the memory in MiB.
    pub fn memory(mut self, mib: u32) -> Self {
        self.config.memory_mib = mib;
        self
    }

    /// Set the boot disk.
    pub fn disk(mut self, disk: DiskImage) -> Self {
        self.config.disk = disk;
        self
    }

    /// Set the cloud-init ISO.
    pub fn cidata(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cidata = path.into();
        self
    }

    /// Set the network transport.
    pub fn transport(mut self, transport: NetworkTransport) -> Self {
        self.config.transport = transport;
        self
    }

    /// Run through vmnet-client, which provides the transport itself.
    pub fn client(mut self, client: ClientWrapper) -> Self {
        self.config.client = Some(client);
        self.config.transport = NetworkTransport::Fd(CLIENT_COMMAND_FD);
        self
    }

    /// Enable virtio-net offloading.
    pub fn offload(mut self, enabled: bool) -> Self {
        self.config.offload = enabled;
        self
    }

    /// Set the qemu firmware search path.
    pub fn firmware_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.config.firmware_dirs = dirs;
        self
    }

    /// Set the guest user.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    /// Build the VmConfig.
    pub fn build(self) -> VmConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::OperationMode;
    use crate::identity::mac_from_name;

    fn builder(driver: Driver) -> VmConfigBuilder {
        VmConfig::builder(VmId::new("test").unwrap(), driver, mac_from_name("test"))
            .disk(DiskImage::new("/vms/test/disk.img"))
            .cidata("/vms/test/cidata.iso")
    }

    #[test]
    fn test_vm_id_validation() {
        assert_eq!(VmId::new("my-test_vm1.2").unwrap().as_str(), "my-test_vm1.2");

        // Names end up in paths; anything that could escape is rejected.
        for bad in ["", "../etc", "vm/name", ".hidden", "vm name", "vmé"] {
            assert!(VmId::new(bad).is_err(), "{:?}", bad);
        }
        assert!(VmId::new("a".repeat(64)).is_ok());
        assert!(VmId::new("a".repeat(65)).is_err());
    }

    #[test]
    fn test_driver_parse() {
        for driver in Driver::ALL {
            assert_eq!(driver.as_str().parse::<Driver>().unwrap(), driver);
        }
        assert!(matches!("hyperkit".parse::<Driver>(), Err(Error::Config(_))));
        assert_eq!(Driver::Qemu.log_file(), "qemu.log");
        assert_eq!(Driver::Vfkit.command_file(), "vfkit.command");
    }

    #[test]
    fn test_vm_config_builder() {
        let config = builder(Driver::Krunkit)
            .cpus(2)
            .memory(2048)
            .transport(NetworkTransport::Fd(5))
            .offload(true)
            .user("fedora")
            .build();

        assert_eq!(config.name.as_str(), "test");
        assert_eq!(config.cpus, 2);
        assert_eq!(config.memory_mib, 2048);
        assert_eq!(config.transport, NetworkTransport::Fd(5));
        assert!(config.offload);
        assert_eq!(config.user, "fedora");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_socket_with_qemu() {
        let config = builder(Driver::Qemu)
            .transport(NetworkTransport::Socket("/var/run/vmnet.sock".into()))
            .build();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = builder(Driver::Vfkit)
            .transport(NetworkTransport::Socket("/var/run/vmnet.sock".into()))
            .build();
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_requires_images() {
        let config = VmConfig::builder(VmId::new("test").unwrap(), Driver::Vfkit, mac_from_name("test"))
            .transport(NetworkTransport::Fd(5))
            .build();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_client_uses_command_fd() {
        let client = ClientWrapper::new("/opt/vmnet-helper/bin/vmnet-client", ModeConfig::default());
        let config = builder(Driver::Vfkit)
            .transport(NetworkTransport::Fd(7))
            .client(client)
            .build();
        assert_eq!(config.transport, NetworkTransport::Fd(CLIENT_COMMAND_FD));
        config.validate().unwrap();
    }

    #[test]
    fn test_client_wrap() {
        let mut client = ClientWrapper::new(
            "/opt/vmnet-helper/bin/vmnet-client",
            ModeConfig {
                shared_interface: Some("en0".into()),
                ..ModeConfig::new(OperationMode::Bridged)
            },
        );
        client.verbose = true;

        let cmd = client.wrap(vec!["vfkit".into(), "--cpus=1".into()]);
        assert_eq!(
            cmd,
            vec![
                "/opt/vmnet-helper/bin/vmnet-client",
                "--operation-mode=bridged",
                "--shared-interface=en0",
                "--verbose",
                "--",
                "vfkit",
                "--cpus=1",
            ]
        );

        let mut client = ClientWrapper::new(
            "vmnet-client",
            ModeConfig {
                enable_isolation: true,
                ..ModeConfig::new(OperationMode::Host)
            },
        );
        client.privileged = true;
        let cmd = client.wrap(vec!["qemu-system-aarch64".into()]);
        assert_eq!(
            cmd,
            vec![
                "vmnet-client",
                "--operation-mode=host",
                "--enable-isolation",
                "--privileged",
                "--",
                "qemu-system-aarch64",
            ]
        );
    }
}
