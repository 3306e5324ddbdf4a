//! Poll scheduler
//!
//! Single-threaded event loop over every active port. Each iteration waits
//! for readiness with a short timeout, reads ready ports one byte at a time
//! into their buffers, and hands the registry to the writer once so every
//! port with a complete block is flushed in the same pass.

use crate::error::MonitorError;
use crate::serial::buffer::LineBuffer;
use crate::serial::console::{Command, ConsoleInput};
use crate::serial::port::{ByteRead, TtyPort};
use crate::serial::registry::{Device, Registry};
use crate::serial::writer::FanOut;
use std::io::{self, Write};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Upper bound on one readiness wait; keeps shutdown latency low
pub const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Bounded retry for reads that fail with "try again"
///
/// Another process attached to the same port can make it momentarily
/// unreadable even after `select()` reported data.
///
/// The budget is per port: every ready port that runs dry waits up to
/// `max_attempts * backoff` before the iteration moves on, so one iteration
/// can take that long times the number of ready ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive transient failures tolerated before giving up on a port
    /// for the current iteration
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_millis(1),
        }
    }
}

/// What one iteration did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Iteration {
    /// Devices flushed in this iteration
    pub flushed: usize,
    /// The console asked to stop
    pub quit: bool,
}

/// Descriptors reported readable by `select()`
struct ReadySet(libc::fd_set);

impl ReadySet {
    fn contains(&self, fd: RawFd) -> bool {
        // SAFETY: `fd` is below FD_SETSIZE, checked when the device was opened.
        unsafe { libc::FD_ISSET(fd, &self.0) }
    }
}

/// Wait until one of `fds` is readable or `timeout` passes
///
/// An interrupted wait (a signal arrived) reports nothing ready so the caller
/// gets a chance to look at its shutdown flag.
fn wait_readable(fds: &[RawFd], max_fd: RawFd, timeout: Duration) -> io::Result<ReadySet> {
    // SAFETY: fd_set is plain data; FD_ZERO initialises it.
    let mut set: libc::fd_set = unsafe { std::mem::zeroed() };
    unsafe { libc::FD_ZERO(&mut set) };
    for &fd in fds {
        unsafe { libc::FD_SET(fd, &mut set) };
    }

    let mut tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    // SAFETY: `set` and `tv` outlive the call; unused sets are null.
    let rc = unsafe {
        libc::select(
            max_fd + 1,
            &mut set,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &mut tv,
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            unsafe { libc::FD_ZERO(&mut set) };
            return Ok(ReadySet(set));
        }
        return Err(err);
    }
    Ok(ReadySet(set))
}

/// Drives reads and flushes until shutdown
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[cfg(test)]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Poll until `shutdown` is set, the console quits, or every port faults
    pub fn run<W: Write>(
        &self,
        registry: &mut Registry,
        writer: &mut FanOut<W>,
        mut console: Option<&mut ConsoleInput>,
        shutdown: &AtomicBool,
    ) -> Result<(), MonitorError> {
        while !shutdown.load(Ordering::SeqCst) {
            let iteration = self.poll_once(registry, writer, console.as_deref_mut())?;
            if iteration.flushed > 0 {
                log::trace!("flushed {} ports", iteration.flushed);
            }
            if iteration.quit {
                log::info!("quit requested from console");
                break;
            }
        }
        Ok(())
    }

    /// One wait/read/flush round
    pub fn poll_once<W: Write>(
        &self,
        registry: &mut Registry,
        writer: &mut FanOut<W>,
        console: Option<&mut ConsoleInput>,
    ) -> Result<Iteration, MonitorError> {
        if registry.active_count() == 0 {
            return Err(MonitorError::AllPortsFaulted);
        }

        let mut watched: Vec<RawFd> = registry
            .devices()
            .iter()
            .filter(|d| d.is_active())
            .filter_map(Device::fd)
            .collect();
        let mut max_fd = registry.max_fd();
        if let Some(console) = console.as_ref() {
            watched.push(console.fd());
            max_fd = max_fd.max(console.fd());
        }

        let ready = wait_readable(&watched, max_fd, self.timeout.unwrap_or(POLL_TIMEOUT))
            .map_err(MonitorError::Poll)?;

        let mut iteration = Iteration::default();
        if let Some(console) = console {
            if ready.contains(console.fd()) {
                match console.read_command() {
                    Some(Command::Quit) => iteration.quit = true,
                    Some(Command::Send(byte)) => send_command(registry, byte),
                    None => {}
                }
            }
        }

        for device in registry.devices_mut() {
            if !device.is_active() {
                continue;
            }
            match device.fd() {
                Some(fd) if ready.contains(fd) => {}
                _ => continue,
            }
            let (path, baud) = (device.path().to_string(), device.baud());
            let Some((port, buffer)) = device.io_parts() else {
                continue;
            };
            if let Err(e) = self.read_port(port, buffer) {
                log::warn!(
                    "{} @ {}: TTY error or disconnected ({}), no longer polled",
                    path,
                    baud,
                    e
                );
                device.retire();
            }
        }

        iteration.flushed = writer.flush(registry.devices_mut(), false);

        if registry.active_count() == 0 {
            return Err(MonitorError::AllPortsFaulted);
        }
        Ok(iteration)
    }

    /// Read bytes until a line completes, the buffer fills, or the port runs
    /// dry; returns how many bytes were read
    fn read_port(&self, port: &mut TtyPort, buffer: &mut LineBuffer) -> io::Result<usize> {
        let mut read = 0;
        let mut attempts = 0;
        while !buffer.holds_complete_block() {
            match port.read_byte()? {
                ByteRead::Byte(byte) => {
                    attempts = 0;
                    read += 1;
                    buffer.push(byte);
                }
                ByteRead::WouldBlock => {
                    attempts += 1;
                    if attempts >= self.retry.max_attempts {
                        if read == 0 {
                            log::warn!(
                                "{}: ready but unreadable after {} attempts, skipping",
                                port.path(),
                                attempts
                            );
                        } else {
                            log::debug!(
                                "{}: drained {} bytes, {} buffered",
                                port.path(),
                                read,
                                buffer.len()
                            );
                        }
                        break;
                    }
                    thread::sleep(self.retry.backoff);
                }
                ByteRead::Closed => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "device hung up"));
                }
            }
        }
        Ok(read)
    }
}

/// Write a console command byte to every active port
fn send_command(registry: &mut Registry, byte: u8) {
    for device in registry.devices_mut() {
        if !device.is_active() {
            continue;
        }
        let path = device.path().to_string();
        if let Some((port, _)) = device.io_parts() {
            if let Err(e) = port.write_byte(byte) {
                log::warn!("{}: can't send command byte: {}", path, e);
            }
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::config::DeviceSpec;
    use crate::serial::pty::Pty;
    use crate::serial::registry::LogPolicy;
    use crate::serial::writer::TimestampStyle;
    use std::fs;

    fn open(ptys: &[&Pty], dir: &tempfile::TempDir, capacity: usize) -> Registry {
        let specs: Vec<DeviceSpec> = ptys
            .iter()
            .map(|p| DeviceSpec {
                path: p.slave_path().to_string(),
                baud: 9600,
                speed: libc::B9600,
            })
            .collect();
        let policy = LogPolicy {
            dir: dir.path().to_path_buf(),
            rewrite: false,
        };
        Registry::open(&specs, &policy, capacity).unwrap()
    }

    fn writer(char_mode: bool) -> FanOut<Vec<u8>> {
        FanOut::new(Vec::new(), None, TimestampStyle::Elapsed, char_mode)
    }

    /// Poll until `done` holds, giving up after a couple of seconds
    fn poll_until<F>(registry: &mut Registry, out: &mut FanOut<Vec<u8>>, mut done: F) -> bool
    where
        F: FnMut(&Registry) -> bool,
    {
        let scheduler = Scheduler::new();
        for _ in 0..200 {
            scheduler.poll_once(registry, out, None).unwrap();
            if done(registry) {
                return true;
            }
        }
        false
    }

    fn log_of(registry: &Registry, index: usize) -> Vec<u8> {
        fs::read(registry.devices()[index].log_path()).unwrap()
    }

    /// Payload lines of a log, timestamp lines dropped
    fn logged_lines(content: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(content)
            .lines()
            .skip(1)
            .step_by(2)
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_two_ports_line_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Pty::open().unwrap();
        let mut b = Pty::open().unwrap();
        let mut registry = open(&[&a, &b], &dir, 1024);
        let mut out = writer(false);

        a.send(b"ok\n");
        b.send(b"1234");
        assert!(poll_until(&mut registry, &mut out, |r| {
            !log_of(r, 0).is_empty() && r.devices()[1].buffer().len() == 4
        }));
        // give B's partial line a few more rounds to prove it stays put
        for _ in 0..5 {
            Scheduler::new().poll_once(&mut registry, &mut out, None).unwrap();
        }
        assert_eq!(logged_lines(&log_of(&registry, 0)), vec!["ok"]);
        assert!(log_of(&registry, 0).ends_with(b"\nok\n"));
        assert!(log_of(&registry, 1).is_empty());

        b.send(b"5\n");
        assert!(poll_until(&mut registry, &mut out, |r| !log_of(r, 1).is_empty()));
        assert_eq!(logged_lines(&log_of(&registry, 1)), vec!["12345"]);
        assert!(log_of(&registry, 1).ends_with(b"\n12345\n"));
        assert_eq!(logged_lines(&log_of(&registry, 0)), vec!["ok"]);
    }

    #[test]
    fn test_capacity_triggers_flush() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Pty::open().unwrap();
        let mut registry = open(&[&a], &dir, 8);
        let mut out = writer(false);

        a.send(b"abcdefghij");
        assert!(poll_until(&mut registry, &mut out, |r| {
            !log_of(r, 0).is_empty() && r.devices()[0].buffer().len() == 2
        }));

        let content = log_of(&registry, 0);
        assert!(content.ends_with(b"\nabcdefgh"));
        assert_eq!(content.iter().filter(|&&b| b == b'\n').count(), 1);
        assert_eq!(registry.devices()[0].buffer().contents(), b"ij");
    }

    #[test]
    fn test_char_mode_flushes_every_iteration_with_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Pty::open().unwrap();
        let mut registry = open(&[&a], &dir, 1024);
        let mut out = writer(true);

        a.send(b"ab");
        assert!(poll_until(&mut registry, &mut out, |r| !log_of(r, 0).is_empty()));
        assert!(log_of(&registry, 0).ends_with(b"b\n"));
        assert!(registry.devices()[0].buffer().is_empty());
    }

    #[test]
    fn test_retry_counter_resets_after_each_byte() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Pty::open().unwrap();
        let mut registry = open(&[&a], &dir, 1024);
        let mut out = writer(false);
        // 20 ms of patience per gap; the whole trickle needs far more than that
        let scheduler = Scheduler::new()
            .with_timeout(Duration::from_secs(2))
            .with_retry(RetryPolicy {
                max_attempts: 10,
                backoff: Duration::from_millis(2),
            });

        let sender = thread::spawn(move || {
            for &byte in b"abcdefghijk\n" {
                a.send(&[byte]);
                thread::sleep(Duration::from_millis(5));
            }
            a
        });
        let iteration = scheduler.poll_once(&mut registry, &mut out, None).unwrap();
        let _a = sender.join().unwrap();

        assert_eq!(iteration.flushed, 1);
        assert_eq!(logged_lines(&log_of(&registry, 0)), vec!["abcdefghijk"]);
        assert!(registry.devices()[0].buffer().is_empty());
    }

    #[test]
    fn test_reading_gives_up_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Pty::open().unwrap();
        let mut registry = open(&[&a], &dir, 1024);
        let mut out = writer(false);
        let scheduler = Scheduler::new().with_retry(RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        });

        a.send(b"ab");
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            a.send(b"c\n");
            a
        });

        let first = scheduler.poll_once(&mut registry, &mut out, None).unwrap();
        assert_eq!(first.flushed, 0);
        assert_eq!(registry.devices()[0].buffer().contents(), b"ab");
        assert!(log_of(&registry, 0).is_empty());

        assert!(poll_until(&mut registry, &mut out, |r| !log_of(r, 0).is_empty()));
        let _a = sender.join().unwrap();
        assert_eq!(logged_lines(&log_of(&registry, 0)), vec!["abc"]);
    }

    #[test]
    fn test_hung_up_port_is_retired() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Pty::open().unwrap();
        let mut b = Pty::open().unwrap();
        let mut registry = open(&[&a, &b], &dir, 1024);
        let mut out = writer(false);

        a.hang_up();
        assert!(poll_until(&mut registry, &mut out, |r| r.devices()[0].is_retired()));
        assert_eq!(registry.active_count(), 1);

        // the survivor keeps working
        b.send(b"still here\n");
        assert!(poll_until(&mut registry, &mut out, |r| !log_of(r, 1).is_empty()));
        assert_eq!(logged_lines(&log_of(&registry, 1)), vec!["still here"]);

        b.hang_up();
        let scheduler = Scheduler::new();
        let mut result = Ok(Iteration::default());
        for _ in 0..200 {
            result = scheduler.poll_once(&mut registry, &mut out, None);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(MonitorError::AllPortsFaulted)));
    }

    #[test]
    fn test_run_stops_on_shutdown_flag() {
        let dir = tempfile::tempdir().unwrap();
        let a = Pty::open().unwrap();
        let mut registry = open(&[&a], &dir, 1024);
        let mut out = writer(false);

        let shutdown = AtomicBool::new(true);
        Scheduler::new()
            .run(&mut registry, &mut out, None, &shutdown)
            .unwrap();
    }

    #[test]
    fn test_idle_iteration_returns_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let a = Pty::open().unwrap();
        let mut registry = open(&[&a], &dir, 1024);
        let mut out = writer(false);

        let started = std::time::Instant::now();
        let iteration = Scheduler::new()
            .with_timeout(Duration::from_millis(20))
            .poll_once(&mut registry, &mut out, None)
            .unwrap();
        assert_eq!(iteration.flushed, 0);
        assert!(started.elapsed() >= Duration::from_millis(15));
    }
}
