//! Raw TTY access
//!
//! Opens a serial device for non-blocking reads, snapshots its termios
//! settings, switches it to raw mode at the requested speed and puts the
//! original settings back when closed.

use crate::error::MonitorError;
use crate::serial::baud::Speed;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};

/// Read timeout in deciseconds applied in raw mode
const RAW_VTIME: libc::cc_t = 5;

/// Read the current terminal settings of `fd`
pub fn get_settings(fd: RawFd) -> io::Result<libc::termios> {
    let mut settings: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: `settings` is a valid, writable termios for the duration of the call.
    if unsafe { libc::tcgetattr(fd, &mut settings) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(settings)
}

/// Apply terminal settings to `fd` immediately
pub fn set_settings(fd: RawFd, settings: &libc::termios) -> io::Result<()> {
    // SAFETY: `settings` points to an initialised termios.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, settings) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Derive raw, non-canonical settings at `speed` from `original`
pub fn raw_settings(original: &libc::termios, speed: Speed) -> io::Result<libc::termios> {
    let mut raw = *original;
    // SAFETY: `raw` is a valid termios owned by this frame.
    unsafe {
        libc::cfmakeraw(&mut raw);
        if libc::cfsetispeed(&mut raw, speed) < 0 || libc::cfsetospeed(&mut raw, speed) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    raw.c_cflag |= libc::CREAD | libc::CLOCAL;
    raw.c_cc[libc::VMIN] = 0;
    raw.c_cc[libc::VTIME] = RAW_VTIME;
    Ok(raw)
}

/// Outcome of a single-byte read
#[derive(Debug)]
pub enum ByteRead {
    Byte(u8),
    /// Nothing available right now
    WouldBlock,
    /// The device reported end of file (hangup)
    Closed,
}

/// An open serial device in raw mode
#[derive(Debug)]
pub struct TtyPort {
    path: String,
    file: File,
    original: libc::termios,
    restored: bool,
}

impl TtyPort {
    /// Open `path` non-blocking and switch it to raw mode at `speed`
    ///
    /// On any failure after the device was opened, the handle is dropped and
    /// whatever settings were already captured are put back.
    pub fn open(path: &str, speed: Speed) -> Result<Self, MonitorError> {
        log::debug!("opening {}", path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| MonitorError::Open {
                path: path.to_string(),
                source,
            })?;

        let original = get_settings(file.as_raw_fd()).map_err(|source| MonitorError::GetSettings {
            path: path.to_string(),
            source,
        })?;

        let active = raw_settings(&original, speed).map_err(|source| MonitorError::SetSettings {
            path: path.to_string(),
            source,
        })?;

        if let Err(source) = set_settings(file.as_raw_fd(), &active) {
            // tcsetattr may have applied part of the request
            let _ = set_settings(file.as_raw_fd(), &original);
            return Err(MonitorError::SetSettings {
                path: path.to_string(),
                source,
            });
        }

        Ok(Self {
            path: path.to_string(),
            file,
            original,
            restored: false,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Settings captured before raw mode was applied
    #[cfg(test)]
    pub fn original_settings(&self) -> &libc::termios {
        &self.original
    }

    /// Read at most one byte
    ///
    /// `EAGAIN` and `EINTR` come back as [`ByteRead::WouldBlock`]; any other
    /// error is returned as is.
    pub fn read_byte(&mut self) -> io::Result<ByteRead> {
        let mut byte = [0u8; 1];
        match self.file.read(&mut byte) {
            Ok(0) => Ok(ByteRead::Closed),
            Ok(_) => Ok(ByteRead::Byte(byte[0])),
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(ByteRead::WouldBlock)
            }
            Err(e) => Err(e),
        }
    }

    /// Send a single command byte to the device
    pub fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.file.write_all(&[byte])
    }

    /// Put the original line settings back; later calls do nothing
    pub fn restore(&mut self) -> io::Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        set_settings(self.fd(), &self.original)
    }
}

impl Drop for TtyPort {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            log::warn!("failed to restore settings of {}: {}", self.path, e);
        }
    }
}
