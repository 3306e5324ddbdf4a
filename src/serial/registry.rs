//! Device registry
//!
//! Owns every monitored port together with its private log file and
//! accumulation buffer. Opening is all-or-nothing: if one port or log file
//! cannot be opened, the ports opened before it are restored and closed
//! before the error is returned.

use crate::config::DeviceSpec;
use crate::error::{ConfigError, MonitorError};
use crate::serial::buffer::LineBuffer;
use crate::serial::port::TtyPort;
use std::fs::{File, OpenOptions};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

/// Default accumulation capacity per port
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Highest descriptor `select()` can watch
const SELECT_FD_LIMIT: RawFd = libc::FD_SETSIZE as RawFd;

/// Name of the private log file for a port path (`log_<basename>.txt`)
pub fn log_file_name(port_path: &str) -> Option<String> {
    let base = Path::new(port_path).file_name()?.to_str()?;
    Some(format!("log_{}.txt", base))
}

/// Where private log files go and how existing ones are treated
#[derive(Debug, Clone)]
pub struct LogPolicy {
    pub dir: PathBuf,
    /// Truncate an existing log instead of refusing to start
    pub rewrite: bool,
}

impl LogPolicy {
    fn open(&self, port_path: &str) -> Result<(File, PathBuf), MonitorError> {
        let name = log_file_name(port_path)
            .ok_or_else(|| ConfigError::BadPortPath(port_path.to_string()))?;
        let log_path = self.dir.join(name);

        let mut options = OpenOptions::new();
        options.write(true);
        if self.rewrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let file = options
            .open(&log_path)
            .map_err(|source| MonitorError::LogCreate {
                path: port_path.to_string(),
                log: log_path.clone(),
                source,
            })?;
        Ok((file, log_path))
    }
}

/// One monitored serial line
#[derive(Debug)]
pub struct Device {
    path: String,
    baud: u32,
    port: Option<TtyPort>,
    log: Option<File>,
    log_path: PathBuf,
    buffer: LineBuffer,
    retired: bool,
}

impl Device {
    fn open(spec: &DeviceSpec, policy: &LogPolicy, capacity: usize) -> Result<Self, MonitorError> {
        let port = TtyPort::open(&spec.path, spec.speed)?;
        let fd = port.fd();
        if fd >= SELECT_FD_LIMIT {
            return Err(MonitorError::DescriptorLimit {
                path: spec.path.clone(),
                fd,
            });
        }
        // dropping `port` on error restores its settings
        let (log, log_path) = policy.open(&spec.path)?;

        log::info!(
            "opened {} at {} baud, logging to {}",
            spec.path,
            spec.baud,
            log_path.display()
        );

        Ok(Self {
            path: spec.path.clone(),
            baud: spec.baud,
            port: Some(port),
            log: Some(log),
            log_path,
            buffer: LineBuffer::new(capacity),
            retired: false,
        })
    }

    /// A device with a log file but no port, for exercising the writer
    #[cfg(test)]
    pub(crate) fn detached(path: &str, log: File, log_path: PathBuf, capacity: usize) -> Self {
        Self {
            path: path.to_string(),
            baud: 0,
            port: None,
            log: Some(log),
            log_path,
            buffer: LineBuffer::new(capacity),
            retired: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn buffer(&self) -> &LineBuffer {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut LineBuffer {
        &mut self.buffer
    }

    /// Open and not retired: takes part in readiness waits
    pub fn is_active(&self) -> bool {
        !self.retired && self.port.is_some()
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// The open port together with the buffer it reads into
    pub(crate) fn io_parts(&mut self) -> Option<(&mut TtyPort, &mut LineBuffer)> {
        let port = self.port.as_mut()?;
        Some((port, &mut self.buffer))
    }

    pub(crate) fn fd(&self) -> Option<RawFd> {
        self.port.as_ref().map(TtyPort::fd)
    }

    pub(crate) fn log_mut(&mut self) -> Option<&mut File> {
        self.log.as_mut()
    }

    /// Stop polling this device; its handles stay open until teardown
    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }

    /// Restore settings and close both handles; later calls do nothing
    pub(crate) fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.restore() {
                log::warn!("can't restore settings of {}: {}", self.path, e);
            }
            log::debug!("closed {}", self.path);
        }
        if let Some(log) = self.log.take() {
            if let Err(e) = log.sync_all() {
                log::warn!("can't sync {}: {}", self.log_path.display(), e);
            }
        }
    }
}

/// Every monitored device, in the order they were requested
#[derive(Debug, Default)]
pub struct Registry {
    devices: Vec<Device>,
}

impl Registry {
    /// Open every device in `specs`
    ///
    /// Either all devices end up open with their log files created, or none
    /// are left open and the first error is returned.
    pub fn open(
        specs: &[DeviceSpec],
        policy: &LogPolicy,
        capacity: usize,
    ) -> Result<Self, MonitorError> {
        let mut registry = Self {
            devices: Vec::with_capacity(specs.len()),
        };
        for spec in specs {
            match Device::open(spec, policy, capacity) {
                Ok(device) => registry.devices.push(device),
                Err(e) => {
                    registry.close_all();
                    return Err(e);
                }
            }
        }
        Ok(registry)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub(crate) fn devices_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn active_count(&self) -> usize {
        self.devices.iter().filter(|d| d.is_active()).count()
    }

    /// Largest descriptor among active devices, or -1 when none are active
    pub fn max_fd(&self) -> RawFd {
        self.devices
            .iter()
            .filter(|d| d.is_active())
            .filter_map(Device::fd)
            .max()
            .unwrap_or(-1)
    }

    /// Restore and close every device; safe to call repeatedly
    pub fn close_all(&mut self) {
        for device in &mut self.devices {
            device.close();
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.close_all();
    }
}
