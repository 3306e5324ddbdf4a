//! Keyboard command byte
//!
//! In interactive mode stdin is switched to non-canonical, no-echo input so
//! single key presses reach the monitor: `q` stops it, any other byte is sent
//! to the ports.

use crate::serial::port::{get_settings, set_settings};
use std::io::{self, IsTerminal};
use std::os::unix::io::RawFd;

/// Key that requests shutdown
pub const QUIT_KEY: u8 = b'q';

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    Send(u8),
}

impl Command {
    pub fn from_byte(byte: u8) -> Self {
        if byte == QUIT_KEY {
            Command::Quit
        } else {
            Command::Send(byte)
        }
    }
}

/// Stdin in single-key mode; original settings come back on restore or drop
#[derive(Debug)]
pub struct ConsoleInput {
    fd: RawFd,
    original: libc::termios,
    restored: bool,
}

impl ConsoleInput {
    /// Take over stdin, or `None` when stdin is not a terminal
    pub fn enable() -> io::Result<Option<Self>> {
        if !io::stdin().is_terminal() {
            log::warn!("stdin is not a terminal, interactive mode disabled");
            return Ok(None);
        }
        let fd = libc::STDIN_FILENO;
        let original = get_settings(fd)?;
        let mut single_key = original;
        single_key.c_lflag &= !(libc::ICANON | libc::ECHO);
        single_key.c_cc[libc::VMIN] = 0;
        single_key.c_cc[libc::VTIME] = 0;
        set_settings(fd, &single_key)?;
        log::info!("press '{}' to quit", QUIT_KEY as char);
        Ok(Some(Self {
            fd,
            original,
            restored: false,
        }))
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Read one pending key, if any
    pub fn read_command(&mut self) -> Option<Command> {
        let mut byte = 0u8;
        // SAFETY: reading a single byte into a stack variable.
        let n = unsafe { libc::read(self.fd, (&mut byte as *mut u8).cast(), 1) };
        (n == 1).then(|| Command::from_byte(byte))
    }

    pub fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        if let Err(e) = set_settings(self.fd, &self.original) {
            log::warn!("can't restore console settings: {}", e);
        }
    }
}

impl Drop for ConsoleInput {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_from_byte() {
        assert_eq!(Command::from_byte(b'q'), Command::Quit);
        assert_eq!(Command::from_byte(b'r'), Command::Send(b'r'));
        assert_eq!(Command::from_byte(b'Q'), Command::Send(b'Q'));
    }
}
