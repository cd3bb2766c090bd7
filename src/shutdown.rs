use anyhow::{Context, Result as AnyResult};
use log::{debug, error, info, warn};
use std::path::Path;
use std::process::Command;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::bus::RegisterBus;
use crate::error::{Error, Result};
use crate::registers::{REBOOT, SHUTDOWN_COMMAND};
use crate::snapshot::TelemetrySnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// External power is present; nothing was written.
    Refused,
    /// The power-off command was written to the controller.
    Commanded,
}

/// Guards the power-off command: never written while the device is on external power.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownGate {
    device: u16,
}

impl ShutdownGate {
    pub fn new(device: u16) -> Self {
        ShutdownGate { device }
    }

    pub fn shutdown<B: RegisterBus + ?Sized>(
        &self,
        bus: &mut B,
        online: bool,
    ) -> Result<ShutdownOutcome> {
        if online {
            info!("Power-off refused: external power present");
            return Ok(ShutdownOutcome::Refused);
        }

        warn!(
            "Commanding power-off (0x{:02X} -> register 0x{:02X})",
            SHUTDOWN_COMMAND, REBOOT.address
        );
        bus.write_block(self.device, REBOOT.address, &[SHUTDOWN_COMMAND])
            .map_err(|source| Error::Transport {
                register: REBOOT.address,
                source,
            })?;
        Ok(ShutdownOutcome::Commanded)
    }
}

/// A delayed action owned by an event source, cancellable until it fires.
///
/// Dropping the handle without calling [`DeferredShutdown::join`] also cancels it.
pub struct DeferredShutdown {
    cancel: Sender<()>,
    worker: JoinHandle<bool>,
}

impl DeferredShutdown {
    pub fn schedule<F>(delay: Duration, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel, rx) = mpsc::channel();
        let worker = thread::spawn(move || match rx.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => {
                action();
                true
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                debug!("Deferred shutdown cancelled");
                false
            }
        });
        DeferredShutdown { cancel, worker }
    }

    pub fn cancel(&self) {
        let _ = self.cancel.send(());
    }

    /// Waits for the worker; true when the action ran.
    pub fn join(self) -> bool {
        let DeferredShutdown { cancel, worker } = self;
        let fired = worker.join().unwrap_or(false);
        drop(cancel);
        fired
    }
}

pub fn should_shutdown(snapshot: &TelemetrySnapshot, shutdown_threshold: u8) -> bool {
    let low_soc = snapshot.state_of_charge < f64::from(shutdown_threshold);
    low_soc && snapshot.is_on_battery()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LowBatteryAction {
    None,
    Armed,
    Counting { remaining_secs: u64 },
    Cancelled { power_restored: bool },
    Fire,
}

/// Low-battery countdown with hysteresis on cancellation.
#[derive(Debug, Clone)]
pub struct LowBatteryWatch {
    threshold: u8,
    cancel_margin: u8,
    delay: Duration,
    armed_at: Option<Instant>,
}

impl LowBatteryWatch {
    pub fn new(threshold: u8, cancel_margin: u8, delay: Duration) -> Self {
        LowBatteryWatch {
            threshold,
            cancel_margin,
            delay,
            armed_at: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    pub fn observe(&mut self, snapshot: &TelemetrySnapshot, now: Instant) -> LowBatteryAction {
        if should_shutdown(snapshot, self.threshold) {
            return match self.armed_at {
                None => {
                    self.armed_at = Some(now);
                    LowBatteryAction::Armed
                }
                Some(start) => {
                    let elapsed = now.saturating_duration_since(start);
                    if elapsed >= self.delay {
                        LowBatteryAction::Fire
                    } else {
                        LowBatteryAction::Counting {
                            remaining_secs: (self.delay - elapsed).as_secs(),
                        }
                    }
                }
            };
        }

        if self.armed_at.is_none() {
            return LowBatteryAction::None;
        }

        // only cancel on restored power or a real recovery, not a one-point wobble
        let cancel_threshold = self.threshold.saturating_add(self.cancel_margin);
        let power_restored = !snapshot.is_on_battery();
        let recovered = snapshot.state_of_charge >= f64::from(cancel_threshold);
        if power_restored || recovered {
            self.armed_at = None;
            LowBatteryAction::Cancelled { power_restored }
        } else {
            LowBatteryAction::None
        }
    }
}

pub fn execute_shutdown_script(script_path: &str) -> AnyResult<()> {
    info!("Executing shutdown script: {}", script_path);

    if !Path::new(script_path).exists() {
        error!("Shutdown script not found: {}", script_path);
        warn!("Falling back to direct shutdown command");
        Command::new("shutdown")
            .args(["-h", "now"])
            .spawn()
            .context("Failed to execute shutdown command")?;
        return Ok(());
    }

    Command::new("sh")
        .arg(script_path)
        .spawn()
        .with_context(|| format!("Failed to execute shutdown script: {}", script_path))?;

    Ok(())
}
