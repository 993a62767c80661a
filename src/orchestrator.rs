//! Launch a VM with a vmnet interface.
//!
//! [`Orchestrator::launch`] wires the pieces in the only order that works:
//!
//! 1. derive the interface id from the VM name
//! 2. open the transport (socketpair or named socket)
//! 3. start vmnet-helper and read its handshake
//! 4. start the hypervisor on the other end of the transport
//! 5. follow the serial console for the guest address
//!
//! With vmnet-client the client starts vmnet-helper itself, so steps 2 and 3
//! are skipped and the hypervisor receives the transport on descriptor 4.
//!
//! Any failure tears down what was already started.

use crate::config::LauncherConfig;
use crate::error::{Error, Result};
use crate::helper::{HelperConfig, HelperProcess, HelperTarget, InterfaceInfo, Privilege};
use crate::identity;
use crate::process::ExitReason;
use crate::store::{VmStore, HELPER_LOG};
use crate::transport::TransportChannel;
use crate::vm::{ClientWrapper, DiskImage, Driver, VirtualMachine, VmConfig, VmId};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How often [`Session::wait`] checks the processes and the run flag.
const WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Everything needed to launch one VM.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
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
    /// Network or operation mode.
    pub target: HelperTarget,
    /// Use a named socket instead of a socketpair.
    pub socket: Option<PathBuf>,
    /// Run the hypervisor through vmnet-client.
    pub client: bool,
    /// Enable offloading in vmnet-helper and the hypervisor.
    pub offload: bool,
    /// Verbose vmnet-helper / vmnet-client logging.
    pub verbose: bool,
    /// sudo policy for vmnet-helper.
    pub privilege: Privilege,
    /// How long to wait for the guest address.
    pub address_timeout: Duration,
    /// Guest user written to the SSH config.
    pub user: String,
}

impl LaunchOptions {
    /// Options with defaults taken from `config`.
    pub fn new(
        name: VmId,
        driver: Driver,
        disk: DiskImage,
        cidata: impl Into<PathBuf>,
        config: &LauncherConfig,
    ) -> Self {
        Self {
            name,
            driver,
            driver_command: None,
            cpus: config.default_cpus,
            memory_mib: config.default_memory_mib,
            disk,
            cidata: cidata.into(),
            target: HelperTarget::default(),
            socket: None,
            client: false,
            offload: false,
            verbose: false,
            privilege: Privilege::default(),
            address_timeout: config.address_timeout,
            user: String::from("ubuntu"),
        }
    }
}

/// Launches VMs using the install locations in a [`LauncherConfig`].
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: LauncherConfig,
}

impl Orchestrator {
    /// Create an orchestrator. Configuration is passed in, never global.
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    /// Launcher configuration.
    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Per-VM state store.
    pub fn store(&self) -> VmStore {
        self.config.store()
    }

    /// Start vmnet-helper and the VM, then wait for the guest address.
    ///
    /// Not finding the address within the timeout is not an error; the
    /// session is returned without one.
    pub fn launch(&self, options: LaunchOptions) -> Result<Session> {
        self.launch_while(options, &AtomicBool::new(true))
    }

    /// Like [`launch`](Self::launch), but the address lookup ends early
    /// once `running` is cleared. Both processes are still running when the
    /// session is returned.
    pub fn launch_while(&self, options: LaunchOptions, running: &AtomicBool) -> Result<Session> {
        let name = options.name.as_str();
        let store = self.store();
        store.ensure_vm_dir(name)?;

        let interface_id = identity::interface_id(name);
        tracing::info!(vm = %name, interface_id = %interface_id, "launching vm");

        let builder = VmConfig::builder(options.name.clone(), options.driver, identity::random_mac())
            .cpus(options.cpus)
            .memory(options.memory_mib)
            .disk(options.disk.clone())
            .cidata(options.cidata.clone())
            .offload(options.offload)
            .firmware_dirs(self.config.firmware_dirs.clone())
            .user(options.user.clone());
        let builder = match &options.driver_command {
            Some(command) => builder.driver_command(command.clone()),
            None => builder,
        };

        let (vm_config, helper) = if options.client {
            let HelperTarget::Mode(mode) = &options.target else {
                return Err(Error::config("vmnet-client does not support shared networks"));
            };
            if options.socket.is_some() {
                return Err(Error::config("vmnet-client provides its own transport"));
            }
            let client = ClientWrapper {
                interface_id: Some(interface_id),
                privileged: options.privilege == Privilege::Always,
                verbose: options.verbose,
                ..ClientWrapper::new(&self.config.client_path, mode.clone())
            };
            // The client's handshake is not visible to us; any local unicast
            // MAC works.
            (builder.client(client).build(), None)
        } else {
            let mut channel = match &options.socket {
                Some(path) => TransportChannel::socket(path)?,
                None => TransportChannel::socketpair()?,
            };

            let helper_config = HelperConfig {
                interface_id: match options.target {
                    HelperTarget::Mode(_) => Some(interface_id),
                    HelperTarget::Network { .. } => None,
                },
                target: options.target.clone(),
                offload: options.offload,
                verbose: options.verbose,
                privilege: options.privilege,
                ..HelperConfig::new(
                    name,
                    &self.config.helper_path,
                    channel.helper_transport(),
                    store.path(name, HELPER_LOG),
                )
            };
            let mut helper = HelperProcess::new(helper_config)?;
            let mac = helper
                .start()?
                .mac_address()
                .unwrap_or_else(|| identity::mac_from_name(name));
            channel.close_helper_end();

            let mut config = builder.transport(channel.vm_transport()).build();
            config.mac = mac;
            // The parent's vm end stays open until the hypervisor inherited it.
            (config, Some((helper, channel)))
        };

        let mut vm = VirtualMachine::new(vm_config, store);
        let helper = match helper {
            Some((helper, mut channel)) => {
                let started = vm.start();
                channel.close_vm_end();
                // On failure the helper is stopped when dropped.
                started?;
                Some(helper)
            }
            None => {
                vm.start()?;
                None
            }
        };

        let mut session = Session { vm, helper };
        // Dropping the session on error stops both processes.
        session
            .vm
            .wait_for_address_while(options.address_timeout, running)?;
        Ok(session)
    }
}

/// A running VM and its vmnet-helper.
///
/// Dropping the session stops both processes.
#[derive(Debug)]
pub struct Session {
    vm: VirtualMachine,
    helper: Option<HelperProcess>,
}

impl Session {
    /// VM name.
    pub fn name(&self) -> &str {
        self.vm.name()
    }

    /// The supervised VM.
    pub fn vm(&self) -> &VirtualMachine {
        &self.vm
    }

    /// The supervised VM, mutably.
    pub fn vm_mut(&mut self) -> &mut VirtualMachine {
        &mut self.vm
    }

    /// The supervised helper; `None` when vmnet-client started it.
    pub fn helper(&self) -> Option<&HelperProcess> {
        self.helper.as_ref()
    }

    /// Interface reported by vmnet-helper.
    pub fn interface(&self) -> Option<&InterfaceInfo> {
        self.helper.as_ref().and_then(HelperProcess::interface)
    }

    /// Guest address, if it was discovered.
    pub fn address(&self) -> Option<&str> {
        self.vm.address()
    }

    /// Block until the VM exits or `running` is cleared.
    ///
    /// Returns the VM's exit reason, or `None` when asked to stop. A
    /// helper that exits under a running VM is a [`Error::ProcessCrash`].
    pub fn wait(&mut self, running: &AtomicBool) -> Result<Option<ExitReason>> {
        while running.load(Ordering::SeqCst) {
            if let Some(reason) = self.vm.try_exit()? {
                tracing::info!(vm = %self.name(), exit = %reason, "virtual machine exited");
                return Ok(Some(reason));
            }
            if let Some(helper) = self.helper.as_mut() {
                helper.check_running()?;
            }
            std::thread::sleep(WAIT_INTERVAL);
        }
        Ok(None)
    }

    /// Stop the VM, then the helper.
    ///
    /// Both are always attempted; the first error is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        let vm = self.vm.stop();
        let helper = match self.helper.as_mut() {
            Some(helper) => helper.stop(),
            None => Ok(()),
        };
        vm.and(helper)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Best-effort cleanup
        if let Err(e) = self.shutdown() {
            tracing::warn!(vm = %self.name(), error = %e, "failed to shut down");
        }
    }
}
