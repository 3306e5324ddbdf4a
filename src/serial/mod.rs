//! Multiplexed serial port logging
//!
//! This module provides functionality for:
//! - Resolving baud rates to termios speed tokens
//! - Opening ports in raw mode and restoring them afterwards
//! - Polling every port from one thread and buffering lines per port
//! - Fanning flushed lines out to per-port logs, a shared log and the console

pub mod baud;
pub mod buffer;
pub mod console;
pub mod lifecycle;
pub mod port;
#[cfg(feature = "serial")]
pub mod ports;
pub mod registry;
pub mod scheduler;
pub mod writer;

#[cfg(all(test, target_os = "linux"))]
mod pty;

pub use lifecycle::execute;
