//! Packet transport between vmnet-helper and the hypervisor.
//!
//! The transport is either a connected pair of unix datagram sockets, one end
//! inherited by each child, or the path of a unix socket owned by a
//! long-lived process (vmnet-helper listening on `--socket`).

use crate::error::{Error, Result};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Send buffer size for each endpoint.
///
/// For datagram sockets the send buffer only limits the maximum packet
/// size. Must be larger than a TSO packet (65550 bytes).
pub const SEND_BUFSIZE: usize = 65 * 1024;

/// Receive buffer size for each endpoint.
///
/// Determines how many packets the peer can queue before getting ENOBUFS.
pub const RECV_BUFSIZE: usize = 4 * 1024 * 1024;

/// Longest path that fits in `sockaddr_un.sun_path` on macOS.
pub const MAX_SOCKET_PATH: usize = 103;

/// Reference to a transport handed to a child process.
///
/// The enum makes "both" and "neither" unrepresentable; children only ever
/// receive the descriptor number or the path, never ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkTransport {
    /// Inherited file descriptor.
    Fd(RawFd),
    /// Unix socket path.
    Socket(PathBuf),
}

impl NetworkTransport {
    /// Build a transport from loosely typed inputs (e.g. command line flags).
    pub fn from_parts(fd: Option<RawFd>, socket: Option<PathBuf>) -> Result<Self> {
        match (fd, socket) {
            (Some(_), Some(_)) => Err(Error::config("fd and socket are mutually exclusive")),
            (None, None) => Err(Error::config("fd or socket required")),
            (Some(fd), None) if fd < 0 => Err(Error::config(format!("invalid fd: {}", fd))),
            (Some(fd), None) => Ok(Self::Fd(fd)),
            (None, Some(path)) => {
                validate_socket_path(&path)?;
                Ok(Self::Socket(path))
            }
        }
    }

    /// Descriptor number, if this is a descriptor transport.
    pub fn fd(&self) -> Option<RawFd> {
        match self {
            Self::Fd(fd) => Some(*fd),
            Self::Socket(_) => None,
        }
    }

    /// Socket path, if this is a socket transport.
    pub fn socket(&self) -> Option<&Path> {
        match self {
            Self::Fd(_) => None,
            Self::Socket(path) => Some(path),
        }
    }
}

impl std::fmt::Display for NetworkTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fd(fd) => write!(f, "fd {}", fd),
            Self::Socket(path) => write!(f, "socket {}", path.display()),
        }
    }
}

/// Transport owned by the orchestrator.
#[derive(Debug)]
pub enum TransportChannel {
    /// Connected datagram socket pair.
    Pair {
        /// End inherited by vmnet-helper. `None` once closed in the parent.
        helper: Option<OwnedFd>,
        /// End inherited by the hypervisor. `None` once closed in the parent.
        vm: Option<OwnedFd>,
        helper_fd: RawFd,
        vm_fd: RawFd,
    },
    /// Socket created and owned by a long-lived process.
    Named(PathBuf),
}

impl TransportChannel {
    /// Create a connected pair of unix datagram sockets.
    ///
    /// Both descriptors are tuned for large packets and stay close-on-exec;
    /// each child receives its own end through [`pass_to_child`].
    pub fn socketpair() -> Result<Self> {
        let (a, b) = UnixDatagram::pair()?;
        let helper = OwnedFd::from(a);
        let vm = OwnedFd::from(b);

        for fd in [helper.as_raw_fd(), vm.as_raw_fd()] {
            set_buffer_size(fd, libc::SO_SNDBUF, SEND_BUFSIZE)?;
            set_buffer_size(fd, libc::SO_RCVBUF, RECV_BUFSIZE)?;
        }

        let helper_fd = helper.as_raw_fd();
        let vm_fd = vm.as_raw_fd();
        tracing::debug!(helper_fd, vm_fd, "created socketpair");

        Ok(Self::Pair {
            helper: Some(helper),
            vm: Some(vm),
            helper_fd,
            vm_fd,
        })
    }

    /// Name a socket owned by another process. Nothing is created.
    pub fn socket(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        validate_socket_path(&path)?;
        Ok(Self::Named(path))
    }

    /// Transport reference for vmnet-helper.
    pub fn helper_transport(&self) -> NetworkTransport {
        match self {
            Self::Pair { helper_fd, .. } => NetworkTransport::Fd(*helper_fd),
            Self::Named(path) => NetworkTransport::Socket(path.clone()),
        }
    }

    /// Transport reference for the hypervisor.
    pub fn vm_transport(&self) -> NetworkTransport {
        match self {
            Self::Pair { vm_fd, .. } => NetworkTransport::Fd(*vm_fd),
            Self::Named(path) => NetworkTransport::Socket(path.clone()),
        }
    }

    /// Close the parent's copy of the helper end after vmnet-helper was
    /// spawned.
    pub fn close_helper_end(&mut self) {
        if let Self::Pair { helper, .. } = self {
            helper.take();
        }
    }

    /// Close the parent's copy of the vm end after the hypervisor was
    /// spawned.
    pub fn close_vm_end(&mut self) {
        if let Self::Pair { vm, .. } = self {
            vm.take();
        }
    }
}

fn validate_socket_path(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(Error::config(format!(
            "socket path must be absolute: {}",
            path.display()
        )));
    }
    let len = path.as_os_str().len();
    if len > MAX_SOCKET_PATH {
        return Err(Error::config(format!(
            "socket \"{}\" too long ({} > {})",
            path.display(),
            len,
            MAX_SOCKET_PATH
        )));
    }
    Ok(())
}

fn set_buffer_size(fd: RawFd, option: libc::c_int, size: usize) -> Result<()> {
    let value = size as libc::c_int;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Make the descriptor of `transport` survive exec in the child spawned by
/// `command`, and only in that child.
///
/// The flag is cleared after fork, so children spawned concurrently never
/// see the descriptor. Socket transports need nothing.
pub fn pass_to_child(command: &mut Command, transport: &NetworkTransport) {
    if let NetworkTransport::Fd(fd) = *transport {
        // SAFETY: the closure only calls fcntl, which is async-signal-safe.
        unsafe {
            command.pre_exec(move || clear_cloexec(fd));
        }
    }
}

fn clear_cloexec(fd: RawFd) -> std::io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_sockopt(fd: RawFd, option: libc::c_int) -> libc::c_int {
        let mut value: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                option,
                &mut value as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        };
        assert_eq!(ret, 0);
        value
    }

    #[test]
    fn test_from_parts_requires_exactly_one() {
        assert!(matches!(
            NetworkTransport::from_parts(None, None),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            NetworkTransport::from_parts(Some(3), Some(PathBuf::from("/tmp/s"))),
            Err(Error::Config(_))
        ));
        assert_eq!(
            NetworkTransport::from_parts(Some(3), None).unwrap(),
            NetworkTransport::Fd(3)
        );
        let t = NetworkTransport::from_parts(None, Some(PathBuf::from("/tmp/s"))).unwrap();
        assert_eq!(t.socket(), Some(Path::new("/tmp/s")));
        assert_eq!(t.fd(), None);
    }

    #[test]
    fn test_socket_path_validation() {
        assert!(TransportChannel::socket("relative.sock").is_err());
        let long = format!("/{}", "a".repeat(MAX_SOCKET_PATH));
        assert!(TransportChannel::socket(long).is_err());
        assert!(TransportChannel::socket("/var/run/vmnet-helper/shared.sock").is_ok());
    }

    #[test]
    fn test_socketpair_is_close_on_exec_and_tuned() {
        let channel = TransportChannel::socketpair().unwrap();
        let helper = channel.helper_transport().fd().unwrap();
        let vm = channel.vm_transport().fd().unwrap();
        assert_ne!(helper, vm);

        for fd in [helper, vm] {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
            assert_ne!(flags & libc::FD_CLOEXEC, 0, "fd {} leaks into children", fd);
            // The kernel may round or clamp, but never below what a TSO
            // packet needs.
            assert!(get_sockopt(fd, libc::SO_SNDBUF) as usize >= SEND_BUFSIZE);
        }
    }

    #[test]
    fn test_socketpair_carries_datagrams() {
        let channel = TransportChannel::socketpair().unwrap();
        let helper = channel.helper_transport().fd().unwrap();
        let vm = channel.vm_transport().fd().unwrap();

        let frame = vec![0xabu8; 9000];
        let sent = unsafe { libc::send(helper, frame.as_ptr() as *const libc::c_void, frame.len(), 0) };
        assert_eq!(sent as usize, frame.len());

        let mut buf = vec![0u8; 65536];
        let received = unsafe { libc::recv(vm, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        assert_eq!(received as usize, frame.len());
        assert_eq!(&buf[..frame.len()], &frame[..]);
    }

    /// Report which of `fds` are open in a child spawned with `transport`.
    fn open_in_child(transport: &NetworkTransport, fds: [RawFd; 2]) -> String {
        let script = format!(
            "for fd in {} {}; do if [ -e /dev/fd/$fd ]; then echo open; else echo closed; fi; done",
            fds[0], fds[1]
        );
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script);
        pass_to_child(&mut command, transport);
        let output = command.output().unwrap();
        assert!(output.status.success());
        String::from_utf8(output.stdout).unwrap()
    }

    #[test]
    fn test_child_inherits_only_its_own_end() {
        let channel = TransportChannel::socketpair().unwrap();
        let helper = channel.helper_transport().fd().unwrap();
        let vm = channel.vm_transport().fd().unwrap();

        assert_eq!(
            open_in_child(&channel.helper_transport(), [helper, vm]),
            "open\nclosed\n"
        );
        assert_eq!(
            open_in_child(&channel.vm_transport(), [helper, vm]),
            "closed\nopen\n"
        );
        // Descriptors stay close-on-exec in this process.
        let flags = unsafe { libc::fcntl(helper, libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }

    #[test]
    fn test_socket_transport_passes_nothing() {
        let channel = TransportChannel::socketpair().unwrap();
        let helper = channel.helper_transport().fd().unwrap();
        let vm = channel.vm_transport().fd().unwrap();
        let socket = NetworkTransport::Socket(PathBuf::from("/var/run/vmnet-helper/shared.sock"));
        assert_eq!(open_in_child(&socket, [helper, vm]), "closed\nclosed\n");
    }

    #[test]
    fn test_close_ends() {
        let mut channel = TransportChannel::socketpair().unwrap();
        let vm = channel.vm_transport().fd().unwrap();
        channel.close_vm_end();
        if let TransportChannel::Pair { vm: end, .. } = &channel {
            assert!(end.is_none(), "vm end should be closed");
        }
        // References stay stable after closing.
        assert_eq!(channel.vm_transport(), NetworkTransport::Fd(vm));
        channel.close_helper_end();
        if let TransportChannel::Pair { helper, .. } = &channel {
            assert!(helper.is_none(), "helper end should be closed");
        }
    }
}
