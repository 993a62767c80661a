//! krunkit (libkrun) command line.

use super::{executable, VmPaths};
use crate::transport::NetworkTransport;
use crate::vm::VmConfig;

/// Build the krunkit command line.
///
/// The disk and cidata are both virtio-blk devices; the network device is a
/// unix datagram transport with offloading switched by `config.offload`.
pub fn command(config: &VmConfig, paths: &VmPaths) -> Vec<String> {
    let mut cmd = vec![
        executable(config, "krunkit"),
        format!("--memory={}", config.memory_mib),
        format!("--cpus={}", config.cpus),
        // No REST API
        "--restful-uri=none://".to_string(),
        format!("--device=virtio-blk,path={}", config.disk.image.display()),
        format!("--device=virtio-blk,path={}", config.cidata.display()),
        format!(
            "--device=virtio-serial,logFilePath={}",
            paths.serial_log.display()
        ),
        "--krun-log-level=3".to_string(),
    ];

    let offloading = if config.offload { "on" } else { "off" };
    let endpoint = match &config.transport {
        NetworkTransport::Fd(fd) => format!("fd={}", fd),
        NetworkTransport::Socket(path) => format!("path={}", path.display()),
    };
    cmd.push(format!(
        "--device=virtio-net,type=unixgram,{},mac={},offloading={}",
        endpoint, config.mac, offloading
    ));
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::backend::tests::{test_config, test_paths};
    use crate::vm::Driver;

    #[test]
    fn test_fd_transport() {
        let config = test_config(Driver::Krunkit, NetworkTransport::Fd(5));
        assert_eq!(
            command(&config, &test_paths()),
            vec![
                "krunkit",
                "--memory=2048",
                "--cpus=2",
                "--restful-uri=none://",
                "--device=virtio-blk,path=/vms/test/disk.img",
                "--device=virtio-blk,path=/vms/test/cidata.iso",
                "--device=virtio-serial,logFilePath=/store/vms/test/serial.log",
                "--krun-log-level=3",
                "--device=virtio-net,type=unixgram,fd=5,mac=92:c4:1d:2a:77:10,offloading=off",
            ]
        );
    }

    #[test]
    fn test_socket_transport_with_offload() {
        let mut config = test_config(
            Driver::Krunkit,
            NetworkTransport::Socket("/var/run/vmnet-helper/shared.sock".into()),
        );
        config.offload = true;
        let cmd = command(&config, &test_paths());
        assert_eq!(
            cmd.last().unwrap(),
            "--device=virtio-net,type=unixgram,path=/var/run/vmnet-helper/shared.sock,mac=92:c4:1d:2a:77:10,offloading=on"
        );
    }
}
