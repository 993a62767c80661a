//! SSH client config for discovered guests.

use crate::error::Result;
use crate::store::{self, VmStore, SSH_CONFIG};
use std::path::PathBuf;

/// Write `ssh.config` so `ssh -F <path> <name>` reaches the guest.
pub fn create_config(store: &VmStore, name: &str, user: &str, address: &str) -> Result<PathBuf> {
    let data = format!(
        "Host {name}\n  StrictHostKeyChecking no\n  UserKnownHostsFile /dev/null\n  User {user}\n  Hostname {address}\n"
    );
    let path = store.path(name, SSH_CONFIG);
    std::fs::write(&path, data)?;
    tracing::debug!(path = %path.display(), "wrote ssh config");
    Ok(path)
}

/// Remove `ssh.config`; absent is fine.
pub fn delete_config(store: &VmStore, name: &str) -> Result<()> {
    store::silent_remove(store.path(name, SSH_CONFIG))
}
