//! Per-VM state directory.
//!
//! Every VM gets a directory under the store root holding its runtime
//! files:
//!
//! ```text
//! <root>/vms/<name>/
//! ├── serial.log            # Raw serial console
//! ├── vmnet-helper.log      # Helper stderr
//! ├── <driver>.log          # Hypervisor stderr
//! ├── <driver>.command      # Dumped argument vector
//! ├── efi-variable-store    # vfkit EFI variables
//! ├── ip-address            # Guest address once discovered
//! └── ssh.config            # SSH client config
//! ```

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Serial console log.
pub const SERIAL_LOG: &str = "serial.log";

/// Helper stderr log.
pub const HELPER_LOG: &str = "vmnet-helper.log";

/// Discovered guest address.
pub const IP_ADDRESS: &str = "ip-address";

/// SSH client config.
pub const SSH_CONFIG: &str = "ssh.config";

/// vfkit EFI variable store.
pub const EFI_VARIABLE_STORE: &str = "efi-variable-store";

/// Root of all per-VM state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmStore {
    root: PathBuf,
}

impl VmStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a VM's files.
    pub fn vm_dir(&self, name: &str) -> PathBuf {
        self.root.join("vms").join(name)
    }

    /// Path of a file inside a VM's directory.
    pub fn path(&self, name: &str, file: &str) -> PathBuf {
        self.vm_dir(name).join(file)
    }

    /// Create the VM directory if needed.
    pub fn ensure_vm_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.vm_dir(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Read the persisted guest address, if any.
    pub fn read_ip_address(&self, name: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path(name, IP_ADDRESS)) {
            Ok(address) => Ok(Some(address.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the guest address.
    pub fn write_ip_address(&self, name: &str, address: &str) -> Result<()> {
        std::fs::write(self.path(name, IP_ADDRESS), address)?;
        Ok(())
    }

    /// Remove the persisted guest address.
    pub fn delete_ip_address(&self, name: &str) -> Result<()> {
        silent_remove(self.path(name, IP_ADDRESS))
    }
}

/// Remove a file, treating "already absent" as success.
pub fn silent_remove(path: impl AsRef<Path>) -> Result<()> {
    match std::fs::remove_file(path.as_ref()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
