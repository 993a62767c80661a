//! Fake vmnet-helper and hypervisor programs for unit tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// vmnet-helper stand-in: echoes the requested subnet back in the handshake
/// and keeps running like the real helper.
pub const FAKE_HELPER: &str = r#"start=192.168.105.1
end=192.168.105.254
mask=255.255.255.0
for arg in "$@"; do
    case "$arg" in
        --start-address=*) start="${arg#*=}" ;;
        --end-address=*) end="${arg#*=}" ;;
        --subnet-mask=*) mask="${arg#*=}" ;;
    esac
done
printf '{"vmnet_start_address":"%s","vmnet_end_address":"%s","vmnet_subnet_mask":"%s","vmnet_mac_address":"92:c4:1d:2a:77:10","vmnet_max_packet_size":1514}\n' "$start" "$end" "$mask"
exec sleep 30
"#;

/// Write an executable `/bin/sh` script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Write [`FAKE_HELPER`] into `dir`.
pub fn fake_helper(dir: &Path) -> PathBuf {
    write_script(dir, "vmnet-helper", FAKE_HELPER)
}
