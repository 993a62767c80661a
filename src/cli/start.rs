//! Start command implementation.

use crate::cli::parsers::{
    parse_driver, parse_duration, parse_operation_mode, parse_privilege, parse_vm_id,
};
use clap::Args;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vmnet_launch::helper::{HelperTarget, ModeConfig, OperationMode, Privilege};
use vmnet_launch::vm::{DiskImage, Driver, VmId};
use vmnet_launch::{Error, LaunchOptions, LauncherConfig, Orchestrator};

/// Start a VM connected to a vmnet interface and supervise it until it
/// exits or the launcher is interrupted.
#[derive(Args, Debug)]
pub struct StartCmd {
    /// VM name.
    #[arg(value_parser = parse_vm_id)]
    pub name: VmId,

    /// Hypervisor (vfkit, krunkit, qemu).
    #[arg(long, default_value = "vfkit", value_parser = parse_driver)]
    pub driver: Driver,

    /// Hypervisor executable, overriding the driver default.
    #[arg(long, value_name = "PATH")]
    pub driver_command: Option<String>,

    /// Boot disk image.
    #[arg(long, value_name = "PATH")]
    pub disk: PathBuf,

    /// cloud-init ISO.
    #[arg(long, value_name = "PATH")]
    pub cidata: PathBuf,

    /// Kernel to boot directly (qemu).
    #[arg(long, value_name = "PATH")]
    pub kernel: Option<PathBuf>,

    /// Initial ramdisk (qemu).
    #[arg(long, value_name = "PATH", requires = "kernel")]
    pub initrd: Option<PathBuf>,

    /// Kernel command line parameter (qemu, repeatable).
    #[arg(long = "kernel-param", value_name = "PARAM", requires = "kernel")]
    pub kernel_params: Vec<String>,

    /// vmnet operation mode (shared, bridged, host).
    #[arg(long, default_value = "shared", value_parser = parse_operation_mode)]
    pub operation_mode: OperationMode,

    /// First DHCP address (shared mode).
    #[arg(long, requires_all = ["end_address", "subnet_mask"])]
    pub start_address: Option<Ipv4Addr>,

    /// Last DHCP address (shared mode).
    #[arg(long, requires_all = ["start_address", "subnet_mask"])]
    pub end_address: Option<Ipv4Addr>,

    /// Subnet mask (shared mode).
    #[arg(long, requires_all = ["start_address", "end_address"])]
    pub subnet_mask: Option<Ipv4Addr>,

    /// Host interface to bridge onto (bridged mode).
    #[arg(long, value_name = "NAME")]
    pub shared_interface: Option<String>,

    /// Isolate guests from each other (host mode).
    #[arg(long)]
    pub enable_isolation: bool,

    /// Join a shared network managed by vmnet-broker.
    #[arg(
        long,
        value_name = "NAME",
        conflicts_with_all = [
            "start_address",
            "end_address",
            "subnet_mask",
            "shared_interface",
            "enable_isolation",
            "client",
        ]
    )]
    pub network: Option<String>,

    /// Use a named datagram socket instead of a socketpair.
    #[arg(long, value_name = "PATH", conflicts_with = "client")]
    pub socket: Option<PathBuf>,

    /// Run the hypervisor through vmnet-client.
    #[arg(long)]
    pub client: bool,

    /// Enable TSO and checksum offload.
    #[arg(long)]
    pub offload: bool,

    /// Number of vCPUs.
    #[arg(long)]
    pub cpus: Option<u8>,

    /// Memory in MiB.
    #[arg(long)]
    pub memory: Option<u32>,

    /// How long to wait for the guest address (e.g., "60s", "2m").
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Fail if the guest address is not found in time.
    #[arg(long)]
    pub require_address: bool,

    /// Run vmnet-helper through sudo (auto, always, never).
    #[arg(long, default_value = "auto", value_parser = parse_privilege)]
    pub privilege: Privilege,

    /// Guest user for the generated SSH config.
    #[arg(long, default_value = "ubuntu")]
    pub user: String,

    /// Verbose vmnet-helper logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl StartCmd {
    /// Execute the start command.
    pub fn run(self, config: &LauncherConfig) -> vmnet_launch::Result<()> {
        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || {
            r.store(false, Ordering::SeqCst);
        })
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        let require_address = self.require_address;
        let options = self.launch_options(config);
        let name = options.name.to_string();
        let timeout = options.address_timeout;

        // Ctrl-C during the address lookup ends it early.
        let mut session = Orchestrator::new(config.clone()).launch_while(options, &running)?;

        if let Some(interface) = session.interface() {
            tracing::debug!(vm = %name, interface = %interface, "vmnet interface");
        }
        match session.address() {
            Some(address) => println!("{} address: {}", name, address),
            None if !running.load(Ordering::SeqCst) => {}
            None if require_address => {
                session.shutdown()?;
                return Err(Error::DiscoveryTimeout { name, timeout });
            }
            None => tracing::warn!(vm = %name, "guest address unknown"),
        }

        let exit = session.wait(&running);
        let shutdown = session.shutdown();
        match exit? {
            Some(reason) => tracing::info!(vm = %name, exit = %reason, "vm exited"),
            None => tracing::info!(vm = %name, "interrupted, vm stopped"),
        }
        shutdown
    }

    /// Network selection from the command line flags.
    fn target(&self) -> HelperTarget {
        if let Some(name) = &self.network {
            return HelperTarget::Network { name: name.clone() };
        }
        HelperTarget::Mode(ModeConfig {
            mode: self.operation_mode,
            start_address: self.start_address,
            end_address: self.end_address,
            subnet_mask: self.subnet_mask,
            shared_interface: self.shared_interface.clone(),
            enable_isolation: self.enable_isolation,
        })
    }

    fn launch_options(self, config: &LauncherConfig) -> LaunchOptions {
        let target = self.target();
        let disk = DiskImage {
            kernel: self.kernel,
            initrd: self.initrd,
            kernel_parameters: self.kernel_params,
            ..DiskImage::new(self.disk)
        };
        let defaults = LaunchOptions::new(self.name, self.driver, disk, self.cidata, config);

        LaunchOptions {
            driver_command: self.driver_command,
            cpus: self.cpus.unwrap_or(defaults.cpus),
            memory_mib: self.memory.unwrap_or(defaults.memory_mib),
            target,
            socket: self.socket,
            client: self.client,
            offload: self.offload,
            verbose: self.verbose,
            privilege: self.privilege,
            address_timeout: self.timeout.unwrap_or(defaults.address_timeout),
            user: self.user,
            ..defaults
        }
    }
}
