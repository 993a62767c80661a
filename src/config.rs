//! Global vmnet-launch configuration.
//!
//! This module handles the persistent configuration file holding install
//! locations and launch defaults. Everything here is passed explicitly into
//! the orchestrator; there is no process-wide state.

use crate::error::{Error, Result};
use crate::store::VmStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name for config file storage.
const APP_NAME: &str = "vmnet-launch";

/// Config file name inside the application config directory.
const CONFIG_FILE: &str = "config.toml";

/// Default vmnet-helper install location.
pub const DEFAULT_HELPER_PATH: &str = "/opt/vmnet-helper/bin/vmnet-helper";

/// Default vmnet-client install location.
pub const DEFAULT_CLIENT_PATH: &str = "/opt/vmnet-helper/bin/vmnet-client";

/// Default directories searched for qemu UEFI firmware.
pub const DEFAULT_FIRMWARE_DIRS: &[&str] = &[
    // Apple silicon
    "/opt/homebrew/share/qemu",
    // Intel
    "/usr/local/share/qemu",
];

/// Global vmnet-launch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Configuration format version.
    pub version: u8,

    /// Path to the vmnet-helper executable.
    pub helper_path: PathBuf,

    /// Path to the vmnet-client executable.
    pub client_path: PathBuf,

    /// Root directory for per-VM state.
    pub store_root: PathBuf,

    /// Default number of vCPUs for new VMs.
    pub default_cpus: u8,

    /// Default memory in MiB for new VMs.
    pub default_memory_mib: u32,

    /// How long to wait for the guest to announce its address.
    #[serde(with = "duration_secs")]
    pub address_timeout: Duration,

    /// Directories searched for qemu UEFI firmware, in order.
    pub firmware_dirs: Vec<PathBuf>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self {
            version: 1,
            helper_path: PathBuf::from(DEFAULT_HELPER_PATH),
            client_path: PathBuf::from(DEFAULT_CLIENT_PATH),
            store_root: home.join(".vmnet-launch"),
            default_cpus: 1,
            default_memory_mib: 1024,
            address_timeout: Duration::from_secs(60),
            firmware_dirs: DEFAULT_FIRMWARE_DIRS.iter().map(PathBuf::from).collect(),
        }
    }
}

impl LauncherConfig {
    /// Default config file location.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::ConfigLoad("could not determine config directory".into()))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load configuration from `path`, falling back to defaults if absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::ConfigLoad(format!("{}: {}", path.display(), e))),
        };
        toml::from_str(&data).map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?)
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::ConfigSave(e.to_string()))?;
        }
        let data = toml::to_string_pretty(self).map_err(|e| Error::ConfigSave(e.to_string()))?;
        std::fs::write(path, data).map_err(|e| Error::ConfigSave(format!("{}: {}", path.display(), e)))
    }

    /// Per-VM state store.
    pub fn store(&self) -> VmStore {
        VmStore::new(&self.store_root)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = LauncherConfig::load_from(&tmp.path().join("config.toml")).unwrap();
        assert_eq!(config, LauncherConfig::default());
        assert_eq!(config.helper_path, PathBuf::from(DEFAULT_HELPER_PATH));
        assert_eq!(config.address_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let config = LauncherConfig {
            default_cpus: 4,
            address_timeout: Duration::from_secs(120),
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = LauncherConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "helper_path = \"/usr/local/bin/vmnet-helper\"\naddress_timeout = 30\n",
        )
        .unwrap();

        let config = LauncherConfig::load_from(&path).unwrap();
        assert_eq!(config.helper_path, PathBuf::from("/usr/local/bin/vmnet-helper"));
        assert_eq!(config.address_timeout, Duration::from_secs(30));
        assert_eq!(config.default_cpus, 1);
        assert_eq!(config.client_path, PathBuf::from(DEFAULT_CLIENT_PATH));
    }

    #[test]
    fn test_invalid_file_is_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "default_cpus = \"many\"").unwrap();
        assert!(matches!(
            LauncherConfig::load_from(&path),
            Err(Error::ConfigLoad(_))
        ));
    }
}
