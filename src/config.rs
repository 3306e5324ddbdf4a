//! Run configuration
//!
//! Collects the port list, baud rates and log options from the command line
//! and an optional TOML file, validates them, and resolves them into the
//! immutable [`MonitorSettings`] the monitor runs with. Every check here runs
//! before any device is opened.

use crate::error::ConfigError;
use crate::serial::baud::{self, Speed, DEFAULT_BAUD};
use crate::serial::registry::{log_file_name, LogPolicy, DEFAULT_BUFFER_CAPACITY};
use crate::serial::writer::TimestampStyle;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Contents of a `--config` TOML file
///
/// ```toml
/// ports = ["/dev/ttyUSB0", "/dev/ttyUSB1"]
/// bauds = [115200, 9600]
/// all_log = "all.txt"
/// rewrite = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub ports: Vec<String>,
    pub baud: Option<u32>,
    pub bauds: Vec<u32>,
    pub all_log: Option<PathBuf>,
    pub char_mode: bool,
    pub rewrite: bool,
    pub log_dir: Option<PathBuf>,
    pub buffer_size: Option<usize>,
    pub wall_clock: bool,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Unvalidated run configuration as requested by the user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunConfig {
    pub ports: Vec<String>,
    /// Shared baud rate; [`DEFAULT_BAUD`] when unset
    pub baud: Option<u32>,
    /// Per-port baud rates, parallel to `ports`
    pub bauds: Vec<u32>,
    pub shared_log: Option<PathBuf>,
    pub char_mode: bool,
    pub rewrite: bool,
    pub log_dir: Option<PathBuf>,
    pub buffer_size: Option<usize>,
    pub wall_clock: bool,
    pub interactive: bool,
    pub color: bool,
}

impl RunConfig {
    /// Fill in whatever the command line left unset from a config file
    pub fn merge_file(&mut self, file: FileConfig) {
        if self.ports.is_empty() {
            self.ports = file.ports;
        }
        // any rate given on the command line beats rates from the file
        if self.bauds.is_empty() && self.baud.is_none() {
            self.bauds = file.bauds;
        }
        self.baud = self.baud.or(file.baud);
        self.shared_log = self.shared_log.take().or(file.all_log);
        self.log_dir = self.log_dir.take().or(file.log_dir);
        self.buffer_size = self.buffer_size.or(file.buffer_size);
        self.char_mode |= file.char_mode;
        self.rewrite |= file.rewrite;
        self.wall_clock |= file.wall_clock;
    }

    /// Validate the request and resolve every baud rate
    pub fn resolve(&self) -> Result<MonitorSettings, ConfigError> {
        if self.ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_CAPACITY);
        if buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }

        let bauds: Vec<u32> = if self.bauds.is_empty() {
            vec![self.baud.unwrap_or(DEFAULT_BAUD); self.ports.len()]
        } else {
            if self.bauds.len() != self.ports.len() {
                return Err(ConfigError::BaudCountMismatch {
                    ports: self.ports.len(),
                    bauds: self.bauds.len(),
                });
            }
            if let Some(shared) = self.baud {
                log::warn!("per-port baud rates given, ignoring shared rate {}", shared);
            }
            self.bauds.clone()
        };

        let mut seen_logs: HashMap<String, &str> = HashMap::new();
        let mut devices = Vec::with_capacity(self.ports.len());
        for (path, &rate) in self.ports.iter().zip(&bauds) {
            if devices.iter().any(|d: &DeviceSpec| &d.path == path) {
                return Err(ConfigError::DuplicatePort(path.clone()));
            }
            let log = log_file_name(path).ok_or_else(|| ConfigError::BadPortPath(path.clone()))?;
            if let Some(first) = seen_logs.get(&log) {
                return Err(ConfigError::LogNameClash {
                    first: first.to_string(),
                    second: path.clone(),
                    log,
                });
            }
            seen_logs.insert(log, path);

            devices.push(DeviceSpec {
                path: path.clone(),
                baud: rate,
                speed: baud::resolve(rate)?,
            });
        }

        Ok(MonitorSettings {
            devices,
            shared_log: self.shared_log.clone(),
            char_mode: self.char_mode,
            logs: LogPolicy {
                dir: self.log_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
                rewrite: self.rewrite,
            },
            buffer_size,
            timestamps: if self.wall_clock {
                TimestampStyle::WallClock
            } else {
                TimestampStyle::Elapsed
            },
            interactive: self.interactive,
            color: self.color,
        })
    }
}

/// A port to open and the speed to open it at
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSpec {
    pub path: String,
    pub baud: u32,
    pub speed: Speed,
}

/// Validated, immutable settings for one run
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub devices: Vec<DeviceSpec>,
    pub shared_log: Option<PathBuf>,
    pub char_mode: bool,
    pub logs: LogPolicy,
    pub buffer_size: usize,
    pub timestamps: TimestampStyle,
    pub interactive: bool,
    pub color: bool,
}
