//! Serial Multilog
//!
//! Watches several serial ports at once from a single thread and records
//! their output line by line, with timestamps.
//!
//! # Features
//!
//! - **Per-port logs**: every port gets `log_<name>.txt` in the log directory
//! - **Shared log**: optionally interleave every port into one file
//! - **Console echo**: every flushed block is echoed, prefixed with its port
//! - **Character mode**: flush every byte as soon as it arrives
//! - **Clean teardown**: terminal settings are restored on every exit path
//!
//! # Usage
//!
//! ```bash
//! # Two ports at the default 57600 baud
//! serial-multilog /dev/ttyUSB0 /dev/ttyUSB1
//!
//! # Per-port baud rates plus a shared log, overwriting old logs
//! serial-multilog /dev/ttyUSB0 /dev/ttyACM0 -b 115200 -b 9600 -o all.txt -r
//!
//! # Settings from a file
//! serial-multilog --config rig.toml
//!
//! # List available serial ports (requires serial feature)
//! serial-multilog --list
//! ```

mod config;
mod error;
mod serial;

use anyhow::Result;
use clap::Parser;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use config::{FileConfig, RunConfig};
use error::{ConfigError, EXIT_CONFIG};

/// Serial Multilog
///
/// Log several serial ports at once
#[derive(Parser)]
#[command(name = "serial-multilog")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Monitor and log several serial ports at once")]
struct Cli {
    /// Serial port paths (e.g., /dev/ttyUSB0 /dev/ttyUSB1)
    ports: Vec<String>,

    /// Additional serial port path
    #[arg(short, long = "port", value_name = "PORT")]
    port: Vec<String>,

    /// Baud rate shared by every port [default: 57600]
    #[arg(short = 't', long = "totalrate", value_name = "BAUD")]
    total_rate: Option<u32>,

    /// Per-port baud rate, once per port in order
    #[arg(short = 'b', long = "baudrate", value_name = "BAUD")]
    baud_rates: Vec<u32>,

    /// Also write every port to this shared log
    #[arg(short = 'o', long = "all-log", value_name = "FILE")]
    all_log: Option<PathBuf>,

    /// Overwrite existing per-port log files
    #[arg(short, long)]
    rewrite: bool,

    /// Flush every byte as soon as it arrives
    #[arg(short, long)]
    char_mode: bool,

    /// Directory for per-port log files [default: .]
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Per-port line buffer size in bytes [default: 1024]
    #[arg(long, value_name = "BYTES")]
    buffer_size: Option<usize>,

    /// Stamp blocks with wall-clock time instead of elapsed seconds
    #[arg(long)]
    wall_clock: bool,

    /// Read keys from the terminal: 'q' quits, anything else is sent to every port
    #[arg(short, long)]
    interactive: bool,

    /// Disable colored console output
    #[arg(long)]
    no_color: bool,

    /// Read settings from a TOML file (command-line options win)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// List available serial ports and exit (requires --features serial)
    #[arg(long)]
    list: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        let mut ports = self.ports.clone();
        ports.extend(self.port.iter().cloned());
        RunConfig {
            ports,
            baud: self.total_rate,
            bauds: self.baud_rates.clone(),
            shared_log: self.all_log.clone(),
            char_mode: self.char_mode,
            rewrite: self.rewrite,
            log_dir: self.log_dir.clone(),
            buffer_size: self.buffer_size,
            wall_clock: self.wall_clock,
            interactive: self.interactive,
            color: !self.no_color && io::stdout().is_terminal(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if cli.no_color || !io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    if cli.list {
        return list_ports();
    }

    let mut request = cli.run_config();
    if let Some(path) = &cli.config {
        match FileConfig::load(path) {
            Ok(file) => request.merge_file(file),
            Err(e) => {
                log::error!("{:#}", anyhow::Error::new(e));
                std::process::exit(EXIT_CONFIG);
            }
        }
    }

    let settings = match request.resolve() {
        Ok(settings) => settings,
        Err(e) => {
            let bad_rate = matches!(e, ConfigError::UnsupportedBaud(_));
            log::error!("{:#}", anyhow::Error::new(e));
            if bad_rate {
                log::info!("supported baud rates: {}", serial::baud::supported_list());
            }
            std::process::exit(EXIT_CONFIG);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    register_signals(&shutdown)?;

    let code = serial::execute(settings, io::stdout(), &shutdown);
    std::process::exit(code);
}

/// Route termination signals into `shutdown` and ignore terminal stop
fn register_signals(shutdown: &Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::flag;

    for signal in [SIGINT, SIGTERM, SIGHUP, SIGQUIT] {
        flag::register(signal, Arc::clone(shutdown))?;
    }

    // SAFETY: SIG_IGN installs no handler code
    unsafe {
        libc::signal(libc::SIGTSTP, libc::SIG_IGN);
    }
    Ok(())
}

#[cfg(feature = "serial")]
fn list_ports() -> Result<()> {
    serial::ports::print_ports()
}

#[cfg(not(feature = "serial"))]
fn list_ports() -> Result<()> {
    anyhow::bail!("port listing requires building with --features serial")
}
