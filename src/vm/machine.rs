//! Hypervisor process supervision.

use crate::console::{ConsoleFollower, FollowEvent};
use crate::error::{Error, Result};
use crate::process::{ExitReason, ProcessHandle};
use crate::ssh;
use crate::store::{self, VmStore};
use crate::transport;
use std::fs::File;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::backend::{self, VmPaths};
use super::{VmConfig, VmState};

/// Process name used in logs and crash errors.
const PROCESS_NAME: &str = "virtual machine";

/// Longest time a crashed hypervisor goes unnoticed while the console is
/// quiet.
const LIVENESS_INTERVAL: Duration = Duration::from_millis(500);

/// A supervised hypervisor process.
#[derive(Debug)]
pub struct VirtualMachine {
    config: VmConfig,
    store: VmStore,
    paths: VmPaths,
    state: VmState,
    process: Option<ProcessHandle>,
    address: Option<String>,
}

impl VirtualMachine {
    /// Create a VM in the `Created` state. Nothing is touched until
    /// [`start`](Self::start).
    pub fn new(config: VmConfig, store: VmStore) -> Self {
        let paths = VmPaths::new(&store, config.name.as_str());
        Self {
            config,
            store,
            paths,
            state: VmState::Created,
            process: None,
            address: None,
        }
    }

    /// VM name.
    pub fn name(&self) -> &str {
        self.config.name.as_str()
    }

    /// VM configuration.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> VmState {
        self.state
    }

    /// Files referenced on the hypervisor command line.
    pub fn paths(&self) -> &VmPaths {
        &self.paths
    }

    /// Hypervisor process ID while it exists.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ProcessHandle::pid)
    }

    /// Guest address, once announced on the console.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Build the command line and spawn the hypervisor.
    ///
    /// The command is built before any file is created, so configuration
    /// errors (unsupported transport, missing firmware) leave no trace.
    pub fn start(&mut self) -> Result<()> {
        if !self.state.can_start() {
            return Err(Error::InvalidState {
                expected: VmState::Created.to_string(),
                actual: self.state.to_string(),
            });
        }

        self.state = VmState::Preparing;
        let argv = match self.prepare() {
            Ok(argv) => argv,
            Err(e) => {
                self.state = VmState::Failed;
                return Err(e);
            }
        };

        self.state = VmState::Starting;
        match self.spawn(&argv) {
            Ok(()) => {
                self.state = VmState::Running;
                Ok(())
            }
            Err(e) => {
                self.state = VmState::Failed;
                Err(e)
            }
        }
    }

    fn prepare(&self) -> Result<Vec<String>> {
        self.config.validate()?;
        let argv = backend::command(&self.config, &self.paths)?;
        Ok(match &self.config.client {
            Some(client) => client.wrap(argv),
            None => argv,
        })
    }

    fn spawn(&mut self, argv: &[String]) -> Result<()> {
        let name = self.config.name.as_str();
        let driver = self.config.driver;

        self.store.ensure_vm_dir(name)?;
        store::silent_remove(&self.paths.serial_log)?;
        self.write_command(argv)?;

        let log = File::create(self.store.path(name, &driver.log_file()))?;

        tracing::info!(
            vm = %name,
            driver = %driver,
            mac = %self.config.mac,
            transport = %self.config.transport,
            "starting virtual machine"
        );

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stderr(log.try_clone()?);

        let child = if self.config.client.is_some() {
            // vmnet-client starts vmnet-helper in its own process group, so
            // stopping the group stops both.
            command.stdout(log).process_group(0);
            let child = command
                .spawn()
                .map_err(|e| Error::command_failed(argv.join(" "), e.to_string()))?;
            ProcessHandle::group_leader(PROCESS_NAME, child)
        } else {
            transport::pass_to_child(&mut command, &self.config.transport);
            let child = command
                .spawn()
                .map_err(|e| Error::command_failed(argv.join(" "), e.to_string()))?;
            ProcessHandle::new(PROCESS_NAME, child)
        };

        tracing::debug!(vm = %name, pid = child.pid(), "virtual machine started");
        self.process = Some(child);
        Ok(())
    }

    /// Dump the command line for debugging and bug reports.
    fn write_command(&self, argv: &[String]) -> Result<()> {
        let path = self
            .store
            .path(self.name(), &self.config.driver.command_file());
        std::fs::write(&path, format!("{}\n", argv.join(" \\\n    ")))?;
        Ok(())
    }

    /// Fail with [`Error::ProcessCrash`] if the hypervisor has exited.
    pub fn check_running(&mut self) -> Result<()> {
        match self.process.as_mut() {
            Some(process) => process.check_running(),
            None => Err(Error::InvalidState {
                expected: VmState::Running.to_string(),
                actual: self.state.to_string(),
            }),
        }
    }

    /// Non-blocking check for hypervisor exit.
    pub fn try_exit(&mut self) -> Result<Option<ExitReason>> {
        match self.process.as_mut() {
            Some(process) => process.try_exit(),
            None => Ok(None),
        }
    }

    /// Wait for the guest to print `<name> address: <ip>` on its console.
    ///
    /// On success the address is persisted to `ip-address` and an SSH config
    /// is written. If the hypervisor exits first this fails with
    /// [`Error::ProcessCrash`]. Reaching the timeout is not an error: a
    /// warning is logged and `None` returned.
    pub fn wait_for_address(&mut self, timeout: Duration) -> Result<Option<String>> {
        self.wait_for_address_while(timeout, &AtomicBool::new(true))
    }

    /// Like [`wait_for_address`](Self::wait_for_address), but gives up
    /// with `None` as soon as `running` is cleared.
    pub fn wait_for_address_while(
        &mut self,
        timeout: Duration,
        running: &AtomicBool,
    ) -> Result<Option<String>> {
        if let Some(address) = &self.address {
            return Ok(Some(address.clone()));
        }

        let prefix = format!("{} address: ", self.name());
        let mut follow = ConsoleFollower::new(&self.paths.serial_log).follow(Instant::now() + timeout)?;
        tracing::debug!(vm = %self.name(), timeout = %humantime::format_duration(timeout), "waiting for ip address");

        loop {
            let event = follow.poll_line(LIVENESS_INTERVAL)?;
            // Console content is only trusted while the hypervisor runs.
            self.check_running()?;
            if !running.load(Ordering::SeqCst) {
                tracing::info!(vm = %self.name(), "ip address lookup interrupted");
                return Ok(None);
            }
            match event {
                FollowEvent::Line(line) => {
                    if let Some(address) = line.strip_prefix(&prefix) {
                        let address = address.trim();
                        if !address.is_empty() {
                            return self.set_address(address).map(Some);
                        }
                    }
                }
                FollowEvent::Idle => {}
                FollowEvent::Closed | FollowEvent::Expired => break,
            }
        }

        tracing::warn!(
            vm = %self.name(),
            timeout = %humantime::format_duration(timeout),
            "timeout looking up ip address"
        );
        Ok(None)
    }

    /// Like [`wait_for_address`](Self::wait_for_address), but a timeout is
    /// an [`Error::DiscoveryTimeout`].
    pub fn require_address(&mut self, timeout: Duration) -> Result<String> {
        self.wait_for_address(timeout)?
            .ok_or_else(|| Error::DiscoveryTimeout {
                name: self.name().to_string(),
                timeout,
            })
    }

    fn set_address(&mut self, address: &str) -> Result<String> {
        let name = self.config.name.as_str();
        self.store.write_ip_address(name, address)?;
        ssh::create_config(&self.store, name, &self.config.user, address)?;
        tracing::info!(vm = %name, address, "virtual machine ip address");
        Ok(self.address.insert(address.to_string()).clone())
    }

    /// Remove transient state, terminate the hypervisor and wait for it.
    ///
    /// Stopping a VM that never started does nothing.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        let name = self.config.name.as_str();
        tracing::info!(vm = %name, pid = process.pid(), "stopping virtual machine");

        if let Err(e) = self.store.delete_ip_address(name) {
            tracing::warn!(vm = %name, error = %e, "failed to remove ip address");
        }
        if let Err(e) = ssh::delete_config(&self.store, name) {
            tracing::warn!(vm = %name, error = %e, "failed to remove ssh config");
        }

        let reason = process.terminate();
        self.state = VmState::Stopped;
        let reason = reason?;
        tracing::debug!(vm = %name, exit = %reason, "virtual machine stopped");
        Ok(())
    }
}

impl Drop for VirtualMachine {
    fn drop(&mut self) {
        if !self.state.can_stop() {
            return;
        }
        // Best-effort cleanup
        if let Err(e) = self.stop() {
            tracing::warn!(vm = %self.name(), error = %e, "failed to stop virtual machine");
        }
    }
}
