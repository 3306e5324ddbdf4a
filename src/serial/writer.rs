//! Log fan-out
//!
//! Writes each flushed block to the port's private log, to the console and,
//! when one was opened, to the shared log. Every destination gets the block in
//! a single write; a missing trailing newline is added as a separate write
//! for forced and character-mode flushes. Write failures are logged and
//! never stop acquisition.

use crate::serial::buffer::TERMINATOR;
use crate::serial::registry::Device;
use chrono::Local;
use colored::Colorize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;

/// How the timestamp line of a block is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampStyle {
    /// Seconds since the first flush, e.g. `12.345`
    Elapsed,
    /// Local time, e.g. `2024-05-01 13:37:00.123`
    WallClock,
}

/// Open the shared log for appending
///
/// A shared log is a convenience; failing to open it only costs a warning.
pub fn open_shared_log(path: &Path) -> Option<File> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            log::info!("copying all ports to {}", path.display());
            Some(file)
        }
        Err(e) => {
            log::warn!("can't open common log {}: {}", path.display(), e);
            None
        }
    }
}

/// Fans flushed blocks out to every log destination
#[derive(Debug)]
pub struct FanOut<W: Write> {
    console: W,
    shared: Option<File>,
    style: TimestampStyle,
    char_mode: bool,
    color: bool,
    epoch: Option<Instant>,
}

impl<W: Write> FanOut<W> {
    pub fn new(console: W, shared: Option<File>, style: TimestampStyle, char_mode: bool) -> Self {
        Self {
            console,
            shared,
            style,
            char_mode,
            color: false,
            epoch: None,
        }
    }

    /// Colour the port path on the console
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    #[cfg(test)]
    pub fn console(&self) -> &W {
        &self.console
    }

    pub fn attach_shared(&mut self, shared: Option<File>) {
        self.shared = shared;
    }

    #[cfg(test)]
    pub fn has_shared_log(&self) -> bool {
        self.shared.is_some()
    }

    /// Flush every eligible device, in registry order
    ///
    /// `force` emits partial data too; it is used once, at shutdown.
    /// Returns how many devices were flushed.
    pub fn flush(&mut self, devices: &mut [Device], force: bool) -> usize {
        let eager = force || self.char_mode;
        let mut flushed = 0;
        for device in devices.iter_mut() {
            if !device.buffer().flush_due(eager) {
                continue;
            }
            self.flush_device(device, eager);
            flushed += 1;
        }
        flushed
    }

    fn flush_device(&mut self, device: &mut Device, eager: bool) {
        let stamp = self.timestamp();
        let payload = device.buffer().contents();
        let add_newline = eager && device.buffer().needs_terminator();

        let mut block = Vec::with_capacity(stamp.len() + 1 + payload.len());
        block.extend_from_slice(stamp.as_bytes());
        block.push(TERMINATOR);
        block.extend_from_slice(payload);

        let path = device.path().to_string();
        let log_path = device.log_path().to_path_buf();
        if let Some(log) = device.log_mut() {
            if let Err(e) = write_block(log, &block, add_newline) {
                log::warn!("can't write to {}: {}", log_path.display(), e);
            }
        }

        let prefix = if self.color {
            path.cyan().bold().to_string()
        } else {
            path.clone()
        };
        let mut console_block = Vec::with_capacity(prefix.len() + 1 + block.len());
        console_block.extend_from_slice(prefix.as_bytes());
        console_block.push(b' ');
        console_block.extend_from_slice(&block);
        if let Err(e) = write_block(&mut self.console, &console_block, add_newline) {
            log::warn!("can't write {} to console: {}", path, e);
        }

        if let Some(shared) = self.shared.as_mut() {
            if let Err(e) = write_block(shared, &block, add_newline) {
                log::warn!("can't write {} to common log: {}", path, e);
            }
        }

        device.buffer_mut().clear();
    }

    fn timestamp(&mut self) -> String {
        match self.style {
            TimestampStyle::Elapsed => {
                let epoch = *self.epoch.get_or_insert_with(Instant::now);
                format!("{:.3}", epoch.elapsed().as_secs_f64())
            }
            TimestampStyle::WallClock => Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        }
    }

    /// Close the shared log; later calls do nothing
    pub fn close_shared(&mut self) {
        if let Some(shared) = self.shared.take() {
            if let Err(e) = shared.sync_all() {
                log::warn!("can't sync common log: {}", e);
            }
        }
    }
}

fn write_block<D: Write + ?Sized>(dest: &mut D, block: &[u8], add_newline: bool) -> io::Result<()> {
    dest.write_all(block)?;
    if add_newline {
        dest.write_all(&[TERMINATOR])?;
    }
    dest.flush()
}
