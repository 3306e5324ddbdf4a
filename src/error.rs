//! Error taxonomy for the logger
//!
//! Configuration problems are detected before any device is touched and live in
//! [`ConfigError`]. Everything that can go wrong once ports are being opened or
//! polled is a [`MonitorError`]; each variant maps to a process exit status.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Exit status for configuration errors
pub const EXIT_CONFIG: i32 = 2;
/// Exit status when a port or its log file could not be opened
pub const EXIT_OPEN: i32 = 3;
/// Exit status when polling failed or every port faulted
pub const EXIT_FAULT: i32 = 4;

/// Problems with the requested run configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no serial ports given")]
    NoPorts,

    #[error("wrong speed value: {0}")]
    UnsupportedBaud(u32),

    #[error("amount of ports given, {ports}, not equal to amount of speeds given, {bauds}")]
    BaudCountMismatch { ports: usize, bauds: usize },

    #[error("port {0} given more than once")]
    DuplicatePort(String),

    #[error("cannot derive a log file name from port path {0:?}")]
    BadPortPath(String),

    #[error("ports {first} and {second} would both log to {log}")]
    LogNameClash {
        first: String,
        second: String,
        log: String,
    },

    #[error("buffer size must be at least 1 byte")]
    ZeroBufferSize,

    #[error("failed to read config file {}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {}", path.display())]
    ParseFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Failures while opening, polling or tearing down the monitored ports
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("can't use port {path}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("can't get old TTY settings of {path}")]
    GetSettings {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("can't apply new TTY settings to {path}")]
    SetSettings {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("descriptor {fd} of port {path} is beyond the select() limit")]
    DescriptorLimit { path: String, fd: i32 },

    #[error("can't create log file {} for port {path}", log.display())]
    LogCreate {
        path: String,
        log: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("waiting for port readiness failed")]
    Poll(#[source] io::Error),

    #[error("every port has faulted, nothing left to monitor")]
    AllPortsFaulted,
}

impl MonitorError {
    /// Process exit status reported for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            MonitorError::Config(_) => EXIT_CONFIG,
            MonitorError::Open { .. }
            | MonitorError::GetSettings { .. }
            | MonitorError::SetSettings { .. }
            | MonitorError::DescriptorLimit { .. }
            | MonitorError::LogCreate { .. } => EXIT_OPEN,
            MonitorError::Poll(_) | MonitorError::AllPortsFaulted => EXIT_FAULT,
        }
    }
}
