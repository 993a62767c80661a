//! Serial console following.
//!
//! A guest announces itself by printing a line on its serial console. The
//! hypervisor appends console output to a log file in arbitrary chunks, so
//! the follower reassembles complete lines across reads.
//!
//! The file is followed through `tail -F -n 0`: it starts at the current end
//! of the file, waits for a file that does not exist yet and survives
//! truncation. Waiting for new data uses `poll(2)` on tail's stdout, bounded
//! by the time left until the deadline.

use crate::error::{Error, Result};
use crate::process::ProcessHandle;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::{ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

/// Bytes read per wakeup.
pub const CHUNK_SIZE: usize = 1024;

/// Follows a console log file.
#[derive(Debug, Clone)]
pub struct ConsoleFollower {
    path: PathBuf,
}

impl ConsoleFollower {
    /// Follower for the log at `path`. The file does not need to exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Followed file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start following from the current end of the file until `deadline`.
    ///
    /// Every call starts a new, independent follow.
    pub fn follow(&self, deadline: Instant) -> Result<Follow> {
        let mut child = Command::new("tail")
            .arg("-F")
            .arg("-n")
            .arg("0")
            .arg(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::command_failed("tail", e.to_string()))?;

        let stdout = child.stdout.take();
        let tail = ProcessHandle::new("tail", child);
        let stdout = stdout.ok_or_else(|| Error::command_failed("tail", "stdout is not piped"))?;
        tracing::debug!(path = %self.path.display(), pid = tail.pid(), "following console");

        Ok(Follow {
            tail,
            stdout,
            deadline,
            buffer: LineBuffer::new(),
            closed: false,
        })
    }
}

/// Result of one [`Follow::poll_line`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowEvent {
    /// A complete line, trailing whitespace removed.
    Line(String),
    /// Nothing arrived within the requested wait; the deadline is still ahead.
    Idle,
    /// The stream ended and every buffered line was returned.
    Closed,
    /// The deadline passed.
    Expired,
}

/// An active follow of a console log.
///
/// Dropping it stops and reaps the underlying `tail`.
#[derive(Debug)]
pub struct Follow {
    // Declared before `tail` so the pipe closes first.
    stdout: ChildStdout,
    tail: ProcessHandle,
    deadline: Instant,
    buffer: LineBuffer,
    closed: bool,
}

impl Follow {
    /// When this follow gives up.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until the deadline, `None` once it passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.checked_duration_since(Instant::now())
    }

    /// Return the next line, waiting at most `max_wait` (and never past the
    /// deadline) for more data.
    ///
    /// Supervisors call this with a short `max_wait` so they get control
    /// back regularly even when the console is quiet.
    pub fn poll_line(&mut self, max_wait: Duration) -> Result<FollowEvent> {
        loop {
            if let Some(line) = self.buffer.pop_line() {
                return Ok(FollowEvent::Line(line));
            }

            if self.closed {
                return Ok(match self.buffer.take_partial() {
                    Some(line) => FollowEvent::Line(line),
                    None => FollowEvent::Closed,
                });
            }

            let Some(remaining) = self.remaining() else {
                return Ok(FollowEvent::Expired);
            };

            let wait = remaining.min(max_wait);
            if !wait_readable(self.stdout.as_raw_fd(), wait)? {
                if wait < remaining {
                    return Ok(FollowEvent::Idle);
                }
                // Timed out at the deadline; the next pass reports it.
                continue;
            }

            let mut chunk = [0u8; CHUNK_SIZE];
            match self.stdout.read(&mut chunk) {
                Ok(0) => {
                    tracing::debug!(pid = self.tail.pid(), "console stream closed");
                    self.closed = true;
                }
                Ok(n) => self.buffer.push(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Iterator for Follow {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.poll_line(Duration::MAX) {
                Ok(FollowEvent::Line(line)) => return Some(Ok(line)),
                Ok(FollowEvent::Idle) => continue,
                Ok(FollowEvent::Closed | FollowEvent::Expired) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Wait until `fd` is readable or `timeout` elapses.
///
/// Returns `false` on timeout. Hangup counts as readable so the caller
/// sees end of stream. EINTR is reported as a timeout; callers recompute
/// the remaining time and wait again.
fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut fds = [libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }];

    // Round up so a sub-millisecond remainder does not spin.
    let millis = timeout.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32;
    let result = unsafe { libc::poll(fds.as_mut_ptr(), 1, millis) };

    if result < 0 {
        let err = io::Error::last_os_error();
        // EINTR is not an error - just means we got a signal
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }

    Ok(result > 0 && fds[0].revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
}

/// Reassembles lines from arbitrarily split chunks.
///
/// Bytes after the last newline are carried over and prefixed to the next
/// chunk, so a line split across writes is yielded once, complete.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
    lines: VecDeque<String>,
}

impl LineBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk.
    pub fn push(&mut self, data: &[u8]) {
        let mut rest = data;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            let line = decode_line(&self.partial);
            self.partial.clear();
            self.lines.push_back(line);
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);
    }

    /// Next complete line.
    pub fn pop_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    /// Bytes received after the last newline.
    pub fn partial(&self) -> &[u8] {
        &self.partial
    }

    /// Take the unterminated remainder as a final line, if non-empty.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = decode_line(&self.partial);
        self.partial.clear();
        Some(line)
    }
}

/// Serial consoles emit CRLF and the occasional invalid byte.
fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::thread;

    fn append(path: &Path, data: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(data.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    #[test]
    fn test_line_buffer_carries_partial_lines() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"host addr");
        assert_eq!(buffer.pop_line(), None);
        assert_eq!(buffer.partial(), b"host addr");

        buffer.push(b"ess: 10.0.2.2");
        assert_eq!(buffer.pop_line(), None);

        buffer.push(b"\n");
        assert_eq!(buffer.pop_line().as_deref(), Some("host address: 10.0.2.2"));
        assert_eq!(buffer.pop_line(), None);
        assert_eq!(buffer.take_partial(), None);
    }

    #[test]
    fn test_line_buffer_multiple_lines_per_chunk() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"one\r\ntwo\n\nthr");
        assert_eq!(buffer.pop_line().as_deref(), Some("one"));
        assert_eq!(buffer.pop_line().as_deref(), Some("two"));
        assert_eq!(buffer.pop_line().as_deref(), Some(""));
        assert_eq!(buffer.pop_line(), None);
        assert_eq!(buffer.take_partial().as_deref(), Some("thr"));
        assert!(buffer.partial().is_empty());
    }

    #[test]
    fn test_line_split_across_writes_is_yielded_once() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("serial.log");
        append(&path, "boot message\n");

        let follow = ConsoleFollower::new(&path)
            .follow(Instant::now() + Duration::from_secs(3))
            .unwrap();

        let writer = {
            let path = path.clone();
            thread::spawn(move || {
                for part in ["host addr", "ess: 10.0.2.2", "\n"] {
                    thread::sleep(Duration::from_millis(300));
                    append(&path, part);
                }
            })
        };

        let lines: Vec<String> = follow.map(|l| l.unwrap()).collect();
        writer.join().unwrap();

        // Existing content is skipped; the split line arrives exactly once.
        assert_eq!(lines, vec!["host address: 10.0.2.2"]);
    }

    #[test]
    fn test_follow_respects_deadline() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("serial.log");
        append(&path, "");

        let timeout = Duration::from_millis(500);
        let start = Instant::now();
        let follow = ConsoleFollower::new(&path).follow(start + timeout).unwrap();
        let count = follow.count();

        assert_eq!(count, 0);
        let elapsed = start.elapsed();
        assert!(elapsed >= timeout, "returned early: {:?}", elapsed);
        assert!(elapsed < timeout + Duration::from_secs(1), "overran: {:?}", elapsed);
    }

    #[test]
    fn test_follow_waits_for_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("serial.log");

        let mut follow = ConsoleFollower::new(&path)
            .follow(Instant::now() + Duration::from_secs(5))
            .unwrap();

        let writer = {
            let path = path.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(300));
                append(&path, "test address: 192.168.105.2\n");
            })
        };

        let line = follow.next().unwrap().unwrap();
        writer.join().unwrap();
        assert_eq!(line, "test address: 192.168.105.2");
    }

    #[test]
    fn test_poll_line_returns_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("serial.log");
        append(&path, "");

        let mut follow = ConsoleFollower::new(&path)
            .follow(Instant::now() + Duration::from_secs(10))
            .unwrap();

        let start = Instant::now();
        let event = follow.poll_line(Duration::from_millis(100)).unwrap();
        assert_eq!(event, FollowEvent::Idle);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(follow.remaining().is_some());
    }

    #[test]
    fn test_poll_line_after_deadline_is_expired() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("serial.log");

        let mut follow = ConsoleFollower::new(&path).follow(Instant::now()).unwrap();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(
            follow.poll_line(Duration::from_secs(1)).unwrap(),
            FollowEvent::Expired
        );
        assert!(follow.remaining().is_none());
    }
}
