//! vmnet-helper process lifecycle.
//!
//! [`HelperProcess`] spawns vmnet-helper, reads its one-line handshake and
//! keeps the process until it is stopped. The helper exits when its stdout
//! pipe closes, so the read end is held for the lifetime of the process.

use crate::error::{Error, Result};
use crate::process::ProcessHandle;
use crate::transport;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::process::{ChildStdout, Command, Stdio};

use super::launcher::helper_command;
use super::{HelperConfig, HelperState, InterfaceInfo};

/// Process name used in logs and crash errors.
const PROCESS_NAME: &str = "vmnet-helper";

/// A supervised vmnet-helper process.
#[derive(Debug)]
pub struct HelperProcess {
    config: HelperConfig,
    state: HelperState,
    process: Option<ProcessHandle>,
    stdout: Option<BufReader<ChildStdout>>,
    interface: Option<InterfaceInfo>,
}

impl HelperProcess {
    /// Validate `config` and create a helper in the `Created` state.
    pub fn new(config: HelperConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: HelperState::Created,
            process: None,
            stdout: None,
            interface: None,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HelperState {
        self.state
    }

    /// Configuration this helper was created with.
    pub fn config(&self) -> &HelperConfig {
        &self.config
    }

    /// Interface reported by the handshake. Set only once running.
    pub fn interface(&self) -> Option<&InterfaceInfo> {
        self.interface.as_ref()
    }

    /// Process ID while the process exists.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ProcessHandle::pid)
    }

    /// Start the helper and wait for its handshake.
    ///
    /// Blocks until the helper writes its first line or closes stdout. On
    /// any failure the helper is terminated before the error is returned.
    pub fn start(&mut self) -> Result<&InterfaceInfo> {
        if self.state != HelperState::Created {
            return Err(Error::InvalidState {
                expected: HelperState::Created.to_string(),
                actual: self.state.to_string(),
            });
        }
        self.state = HelperState::Starting;

        match self.spawn_and_handshake() {
            Ok(info) => {
                tracing::info!(
                    vm = %self.config.vm_name,
                    pid = self.pid().unwrap_or_default(),
                    interface = %info,
                    "vmnet-helper is running"
                );
                self.state = HelperState::Running;
                Ok(self.interface.insert(info))
            }
            Err(e) => {
                tracing::warn!(vm = %self.config.vm_name, error = %e, "vmnet-helper failed to start");
                self.stop_process();
                self.state = HelperState::Failed;
                Err(e)
            }
        }
    }

    fn spawn_and_handshake(&mut self) -> Result<InterfaceInfo> {
        let escalate = self.config.privilege.escalate();
        let argv = helper_command(&self.config, escalate);
        let log = open_log(&self.config)?;

        tracing::debug!(vm = %self.config.vm_name, command = ?argv, "starting vmnet-helper");

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(log);
        transport::pass_to_child(&mut command, &self.config.transport);

        let mut child = command
            .spawn()
            .map_err(|e| Error::command_failed(argv.join(" "), e.to_string()))?;

        let stdout = child.stdout.take();
        let process = self.process.insert(ProcessHandle::new(PROCESS_NAME, child));
        let stdout = stdout.ok_or_else(|| Error::handshake("helper stdout is not piped"))?;
        tracing::debug!(pid = process.pid(), "waiting for vmnet-helper handshake");

        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| Error::handshake(format!("unreadable reply: {}", e)))?;
        if read == 0 {
            return Err(Error::handshake("no response from helper"));
        }
        self.stdout = Some(reader);

        let info = InterfaceInfo::parse(&line)?;
        info.ensure_complete(self.config.target.interface_shape())?;
        Ok(info)
    }

    /// Fail with [`Error::ProcessCrash`] if the helper has exited.
    pub fn check_running(&mut self) -> Result<()> {
        match self.process.as_mut() {
            Some(process) => process.check_running(),
            None => Err(Error::InvalidState {
                expected: HelperState::Running.to_string(),
                actual: self.state.to_string(),
            }),
        }
    }

    /// Terminate the helper and wait for it to exit.
    ///
    /// Stopping a helper that never started or already stopped does nothing.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        tracing::info!(vm = %self.config.vm_name, pid = process.pid(), "stopping vmnet-helper");
        let result = process.terminate();
        self.stdout = None;
        if self.state == HelperState::Running {
            self.state = HelperState::Stopped;
        }
        result.map(|reason| {
            tracing::debug!(vm = %self.config.vm_name, exit = %reason, "vmnet-helper stopped");
        })
    }

    fn stop_process(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(vm = %self.config.vm_name, error = %e, "failed to stop vmnet-helper");
        }
    }
}

impl Drop for HelperProcess {
    fn drop(&mut self) {
        self.stop_process();
    }
}

fn open_log(config: &HelperConfig) -> Result<File> {
    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?)
}
