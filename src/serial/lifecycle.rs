//! Lifecycle controller
//!
//! Wraps the scheduler in an `Idle -> Opening -> Running -> ShuttingDown ->
//! Terminated` state machine. Whatever ends the run (a shutdown request, a
//! fatal fault, or a failed open), teardown happens exactly once: a forced
//! final flush, then every port is restored and closed, then the shared log.

use crate::config::MonitorSettings;
use crate::error::MonitorError;
use crate::serial::console::ConsoleInput;
use crate::serial::registry::Registry;
use crate::serial::scheduler::Scheduler;
use crate::serial::writer::{open_shared_log, FanOut};
use std::io::Write;
use std::sync::atomic::AtomicBool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Opening,
    Running,
    ShuttingDown,
    Terminated,
}

/// Owns the registry and writer for one run
#[derive(Debug)]
pub struct Lifecycle<W: Write> {
    phase: Phase,
    settings: MonitorSettings,
    scheduler: Scheduler,
    registry: Option<Registry>,
    writer: FanOut<W>,
    console: Option<ConsoleInput>,
    failure: Option<MonitorError>,
}

impl<W: Write> Lifecycle<W> {
    /// Prepare a run writing console output to `console`
    pub fn new(settings: MonitorSettings, console: W) -> Self {
        let writer = FanOut::new(console, None, settings.timestamps, settings.char_mode)
            .with_color(settings.color);
        Self {
            phase: Phase::Idle,
            settings,
            scheduler: Scheduler::new(),
            registry: None,
            writer,
            console: None,
            failure: None,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub fn registry(&self) -> Option<&Registry> {
        self.registry.as_ref()
    }

    #[cfg(test)]
    pub fn writer(&self) -> &FanOut<W> {
        &self.writer
    }

    /// The error that ended the run, if any
    pub fn failure(&self) -> Option<&MonitorError> {
        self.failure.as_ref()
    }

    /// Exit status for the process: 0 unless a failure was recorded
    pub fn exit_code(&self) -> i32 {
        self.failure().map_or(0, MonitorError::exit_code)
    }

    /// Open every port and log file
    ///
    /// On failure nothing stays open, the error is recorded, and the
    /// controller moves straight to teardown.
    pub fn open(&mut self) -> bool {
        if self.phase != Phase::Idle {
            return self.phase == Phase::Running;
        }
        self.phase = Phase::Opening;
        log::debug!("opening {} ports", self.settings.devices.len());

        match Registry::open(
            &self.settings.devices,
            &self.settings.logs,
            self.settings.buffer_size,
        ) {
            Ok(registry) => self.registry = Some(registry),
            Err(e) => {
                self.fail(e);
                self.shutdown();
                return false;
            }
        }

        if let Some(path) = &self.settings.shared_log {
            self.writer.attach_shared(open_shared_log(path));
        }

        if self.settings.interactive {
            match ConsoleInput::enable() {
                Ok(console) => self.console = console,
                Err(e) => log::warn!("can't set up console input: {}", e),
            }
        }

        self.phase = Phase::Running;
        true
    }

    /// Poll until `shutdown` is set or a fatal fault occurs, then tear down
    pub fn run(&mut self, shutdown: &AtomicBool) {
        if self.phase != Phase::Running {
            return;
        }
        if let Some(registry) = self.registry.as_mut() {
            log::info!("monitoring {} ports", registry.len());
            let console = self.console.as_mut();
            if let Err(e) = self.scheduler.run(registry, &mut self.writer, console, shutdown) {
                self.fail(e);
            }
        }
        self.shutdown();
    }

    /// Final flush, restore and close everything; later calls do nothing
    pub fn shutdown(&mut self) {
        if matches!(self.phase, Phase::ShuttingDown | Phase::Terminated) {
            return;
        }
        self.phase = Phase::ShuttingDown;

        if let Some(registry) = self.registry.as_mut() {
            self.writer.flush(registry.devices_mut(), true);
            let faulted = registry.devices().iter().filter(|d| d.is_retired()).count();
            if faulted > 0 {
                log::warn!("{} of {} ports faulted during the run", faulted, registry.len());
            }
            registry.close_all();
        }
        self.writer.close_shared();
        if let Some(console) = self.console.as_mut() {
            console.restore();
        }

        self.phase = Phase::Terminated;
        log::info!("exit ({})", self.exit_code());
    }

    fn fail(&mut self, e: MonitorError) {
        match std::error::Error::source(&e) {
            Some(cause) => log::error!("{}: {}", e, cause),
            None => log::error!("{}", e),
        }
        if self.failure.is_none() {
            self.failure = Some(e);
        }
    }
}

/// Run the whole state machine and return the process exit status
pub fn execute<W: Write>(settings: MonitorSettings, console: W, shutdown: &AtomicBool) -> i32 {
    let mut lifecycle = Lifecycle::new(settings, console);
    if lifecycle.open() {
        lifecycle.run(shutdown);
    }
    lifecycle.shutdown();
    lifecycle.exit_code()
}
