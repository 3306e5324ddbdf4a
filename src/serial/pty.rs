//! Pseudo-terminal pairs standing in for serial devices in tests

use portable_pty::{native_pty_system, MasterPty, PtySize, SlavePty};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};

/// A master/slave pair; the slave path is what the logger opens
pub struct Pty {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    _slave: Box<dyn SlavePty + Send>,
    /// Our own handle on the slave, for inspecting its line settings
    slave: File,
    slave_path: String,
}

impl Pty {
    pub fn open() -> anyhow::Result<Self> {
        let pair = native_pty_system().openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })?;
        let slave_path = pair
            .master
            .tty_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "pty has no slave name"))?
            .to_string_lossy()
            .into_owned();
        let writer = pair.master.take_writer()?;

        let slave = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&slave_path)?;

        Ok(Self {
            master: Some(pair.master),
            writer: Some(writer),
            _slave: pair.slave,
            slave,
            slave_path,
        })
    }

    pub fn slave_path(&self) -> &str {
        &self.slave_path
    }

    pub fn slave_fd(&self) -> RawFd {
        self.slave.as_raw_fd()
    }

    /// Feed bytes to the device side as if they came down the wire
    pub fn send(&mut self, bytes: &[u8]) {
        let writer = self.writer.as_mut().expect("pty already hung up");
        writer.write_all(bytes).unwrap();
        writer.flush().unwrap();
    }

    /// Close the master side, which looks like a cable pull to the reader
    pub fn hang_up(&mut self) {
        self.writer = None;
        self.master = None;
    }
}
