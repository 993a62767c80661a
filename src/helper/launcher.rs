//! vmnet-helper command construction.
//!
//! The argument vector is built deterministically from [`HelperConfig`];
//! nothing here spawns the helper itself.

use crate::error::{Error, Result};
use crate::transport::NetworkTransport;
use std::path::Path;
use std::process::{Command, Stdio};

use super::{HelperConfig, HelperTarget};

/// Build the full command line for vmnet-helper.
///
/// With `escalate`, the helper runs through `sudo --non-interactive`. For a
/// descriptor transport sudo closes every descriptor above it so nothing
/// else leaks into the privileged process.
pub fn helper_command(config: &HelperConfig, escalate: bool) -> Vec<String> {
    let mut cmd = Vec::new();

    if escalate {
        // Depends on a sudoers rule allowing vmnet-helper without a password.
        cmd.push("sudo".to_string());
        cmd.push("--non-interactive".to_string());
        if let NetworkTransport::Fd(fd) = config.transport {
            cmd.push(format!("--close-from={}", fd + 1));
        }
    }

    cmd.push(config.helper_path.display().to_string());

    match &config.transport {
        NetworkTransport::Fd(fd) => cmd.push(format!("--fd={}", fd)),
        NetworkTransport::Socket(path) => cmd.push(format!("--socket={}", path.display())),
    }

    if let Some(id) = config.interface_id {
        cmd.push(format!("--interface-id={}", id));
    }

    match &config.target {
        HelperTarget::Network { name } => cmd.push(format!("--network={}", name)),
        HelperTarget::Mode(mode) => {
            cmd.push(format!("--operation-mode={}", mode.mode));
            if let Some(addr) = mode.start_address {
                cmd.push(format!("--start-address={}", addr));
            }
            if let Some(addr) = mode.end_address {
                cmd.push(format!("--end-address={}", addr));
            }
            if let Some(mask) = mode.subnet_mask {
                cmd.push(format!("--subnet-mask={}", mask));
            }
            if let Some(iface) = &mode.shared_interface {
                cmd.push(format!("--shared-interface={}", iface));
            }
            if mode.enable_isolation {
                cmd.push("--enable-isolation".to_string());
            }
        }
    }

    if config.offload {
        cmd.push("--enable-tso".to_string());
        cmd.push("--enable-checksum-offload".to_string());
    }

    if config.verbose {
        cmd.push("--verbose".to_string());
    }

    cmd
}

/// Check whether vmnet-helper must run as root on this host.
///
/// vmnet requires root before macOS 26. If the version cannot be read we
/// assume escalation is needed.
pub fn requires_escalation() -> bool {
    #[cfg(target_os = "macos")]
    {
        match macos_major_version() {
            Some(major) => major < super::UNPRIVILEGED_MACOS_MAJOR,
            None => true,
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        true
    }
}

#[cfg(target_os = "macos")]
fn macos_major_version() -> Option<u32> {
    let output = Command::new("sw_vers").arg("-productVersion").output().ok()?;
    if !output.status.success() {
        return None;
    }
    parse_major_version(&String::from_utf8_lossy(&output.stdout))
}

/// Parse the major component of a dotted version ("15.4.1" -> 15).
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_major_version(version: &str) -> Option<u32> {
    version.trim().split('.').next()?.parse().ok()
}

/// List host interfaces usable with bridged mode.
pub fn list_shared_interfaces(helper_path: &Path) -> Result<Vec<String>> {
    let output = Command::new(helper_path)
        .arg("--list-shared-interfaces")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::command_failed(helper_path.display().to_string(), e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::command_failed(
            format!("{} --list-shared-interfaces", helper_path.display()),
            stderr.trim().to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::{ModeConfig, OperationMode};
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    const HELPER: &str = "/opt/vmnet-helper/bin/vmnet-helper";

    fn config(transport: NetworkTransport, target: HelperTarget) -> HelperConfig {
        HelperConfig {
            target,
            ..HelperConfig::new("test", HELPER, transport, "/tmp/vmnet-helper.log")
        }
    }

    #[test]
    fn test_fd_with_escalation() {
        let mut cfg = config(NetworkTransport::Fd(5), HelperTarget::default());
        cfg.interface_id = Some(crate::identity::interface_id("test"));
        let id = cfg.interface_id.unwrap();

        let cmd = helper_command(&cfg, true);
        assert_eq!(
            cmd,
            vec![
                "sudo".to_string(),
                "--non-interactive".to_string(),
                "--close-from=6".to_string(),
                HELPER.to_string(),
                "--fd=5".to_string(),
                format!("--interface-id={}", id),
                "--operation-mode=shared".to_string(),
            ]
        );
    }

    #[test]
    fn test_socket_with_escalation_has_no_close_from() {
        let cfg = config(
            NetworkTransport::Socket(PathBuf::from("/var/run/vmnet/test.sock")),
            HelperTarget::default(),
        );
        let cmd = helper_command(&cfg, true);
        assert_eq!(&cmd[..3], &["sudo", "--non-interactive", HELPER]);
        assert!(cmd.contains(&"--socket=/var/run/vmnet/test.sock".to_string()));
        assert!(!cmd.iter().any(|a| a.starts_with("--close-from")));
    }

    #[test]
    fn test_without_escalation_starts_with_helper() {
        let cfg = config(NetworkTransport::Fd(3), HelperTarget::default());
        let cmd = helper_command(&cfg, false);
        assert_eq!(cmd[0], HELPER);
        assert!(!cmd.contains(&"sudo".to_string()));
    }

    #[test]
    fn test_mode_specific_flags() {
        let addr = |s: &str| s.parse().unwrap();
        let shared = ModeConfig::new(OperationMode::Shared).subnet(
            addr("192.168.200.1"),
            addr("192.168.200.254"),
            addr("255.255.255.0"),
        );
        let cmd = helper_command(
            &config(NetworkTransport::Fd(3), HelperTarget::Mode(shared)),
            false,
        );
        assert!(cmd.ends_with(&[
            "--operation-mode=shared".to_string(),
            "--start-address=192.168.200.1".to_string(),
            "--end-address=192.168.200.254".to_string(),
            "--subnet-mask=255.255.255.0".to_string(),
        ]));

        let bridged = ModeConfig {
            shared_interface: Some("en0".into()),
            ..ModeConfig::new(OperationMode::Bridged)
        };
        let cmd = helper_command(
            &config(NetworkTransport::Fd(3), HelperTarget::Mode(bridged)),
            false,
        );
        assert!(cmd.ends_with(&[
            "--operation-mode=bridged".to_string(),
            "--shared-interface=en0".to_string(),
        ]));

        let host = ModeConfig {
            enable_isolation: true,
            ..ModeConfig::new(OperationMode::Host)
        };
        let cmd = helper_command(
            &config(NetworkTransport::Fd(3), HelperTarget::Mode(host)),
            false,
        );
        assert!(cmd.ends_with(&[
            "--operation-mode=host".to_string(),
            "--enable-isolation".to_string(),
        ]));
    }

    #[test]
    fn test_network_offload_verbose() {
        let mut cfg = config(
            NetworkTransport::Fd(3),
            HelperTarget::Network {
                name: "shared".into(),
            },
        );
        cfg.offload = true;
        cfg.verbose = true;

        let cmd = helper_command(&cfg, false);
        assert_eq!(
            cmd,
            vec![
                HELPER,
                "--fd=3",
                "--network=shared",
                "--enable-tso",
                "--enable-checksum-offload",
                "--verbose",
            ]
        );
        assert!(!cmd.iter().any(|a| a.starts_with("--operation-mode")));
    }

    #[test]
    fn test_parse_major_version() {
        assert_eq!(parse_major_version("15.4.1\n"), Some(15));
        assert_eq!(parse_major_version("26.0"), Some(26));
        assert_eq!(parse_major_version(""), None);
        assert_eq!(parse_major_version("beta"), None);
    }

    #[test]
    fn test_list_shared_interfaces() {
        let tmp = tempfile::tempdir().unwrap();
        let helper = tmp.path().join("vmnet-helper");
        std::fs::write(
            &helper,
            "#!/bin/sh\n[ \"$1\" = --list-shared-interfaces ] || exit 2\nprintf 'en0\\nen1\\n'\n",
        )
        .unwrap();
        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(list_shared_interfaces(&helper).unwrap(), vec!["en0", "en1"]);
    }

    #[test]
    fn test_list_shared_interfaces_missing_helper() {
        let err = list_shared_interfaces(Path::new("/nonexistent/vmnet-helper")).unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }
}
