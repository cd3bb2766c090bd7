//! Refresh cycle: reads the register bank, smooths the noisy channels and publishes
//! an immutable [`TelemetrySnapshot`].

use log::{debug, trace, warn};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::bus::RegisterBus;
use crate::charge_state::{classify, ChargeStatus, ClassificationStrategy};
use crate::error::{Error, Result, UpdateFailed};
use crate::registers::{
    battery_offsets, charger_offsets, RawRegisterBlock, Register, BATTERY_METRICS,
    CELL_VOLTAGES, CHARGER_METRICS, STATUS,
};
use crate::shutdown::{ShutdownGate, ShutdownOutcome};
use crate::smoothing::ChannelBuffers;
use crate::snapshot::{millis_to_unit, round2, TelemetrySnapshot};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub device_address: u16,
    pub poll_interval: Duration,
    pub strategy: ClassificationStrategy,
}

struct Inner<B> {
    bus: B,
    buffers: ChannelBuffers,
    status: Option<ChargeStatus>,
}

pub struct UpsCoordinator<B> {
    config: CoordinatorConfig,
    gate: ShutdownGate,
    inner: Mutex<Inner<B>>,
    published: RwLock<Option<Arc<TelemetrySnapshot>>>,
}

impl<B: RegisterBus> UpsCoordinator<B> {
    pub fn new(bus: B, config: CoordinatorConfig) -> Self {
        UpsCoordinator {
            gate: ShutdownGate::new(config.device_address),
            config,
            inner: Mutex::new(Inner {
                bus,
                buffers: ChannelBuffers::default(),
                status: None,
            }),
            published: RwLock::new(None),
        }
    }

    pub fn device_address(&self) -> u16 {
        self.config.device_address
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// Last published snapshot; `None` until the first successful refresh.
    pub fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
        match self.published.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Runs one cycle. On failure nothing is published and [`latest`](Self::latest)
    /// keeps returning the previous snapshot.
    pub fn refresh(&self) -> std::result::Result<Arc<TelemetrySnapshot>, UpdateFailed> {
        let mut inner = self.lock_inner();
        let snapshot = Arc::new(inner.cycle(&self.config)?);
        debug!("Publishing snapshot: {:?}", snapshot);

        let mut published = match self.published.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *published = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Commands power-off unless the last known status reports external power.
    ///
    /// The status from the most recent successful STATUS read wins, even when the
    /// rest of that cycle aborted. With no status ever read the power source is
    /// unknown and the command is refused.
    pub fn shutdown(&self) -> Result<ShutdownOutcome> {
        let mut inner = self.lock_inner();
        let online = match inner.status.map(|s| s.online) {
            Some(online) => online,
            None => match self.latest() {
                Some(snapshot) => snapshot.online,
                None => {
                    warn!("Power-off requested before any status was read");
                    return Ok(ShutdownOutcome::Refused);
                }
            },
        };
        self.gate.shutdown(&mut inner.bus, online)
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner<B>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<B: RegisterBus> Inner<B> {
    fn read(&mut self, device: u16, register: Register) -> Result<RawRegisterBlock> {
        let bytes = self
            .bus
            .read_block(device, register.address, register.length)
            .map_err(|source| Error::Transport {
                register: register.address,
                source,
            })?;
        trace!("{} raw: {:02X?}", register.name, bytes);
        RawRegisterBlock::new(register, bytes)
    }

    /// Falls back to the previous status when the read fails; with no previous
    /// status the error aborts the cycle.
    fn read_status(&mut self, config: &CoordinatorConfig) -> Result<ChargeStatus> {
        let status = self
            .read(config.device_address, STATUS)
            .and_then(|block| block.u8_at(0));
        match (status, self.status) {
            (Ok(byte), _) => {
                let classified = classify(byte, config.strategy);
                debug!(
                    "Status 0x{:02X}: {} ({}), online={}",
                    byte,
                    classified.power_state().as_str(),
                    classified.phase.as_str(),
                    classified.online
                );
                self.status = Some(classified);
                Ok(classified)
            }
            // a glitch on the status read alone does not abort the cycle
            (Err(e), Some(previous)) => {
                warn!("Status read failed, reusing previous status: {}", e);
                Ok(previous)
            }
            (Err(e), None) => Err(e),
        }
    }

    fn cycle(&mut self, config: &CoordinatorConfig) -> Result<TelemetrySnapshot> {
        let device = config.device_address;
        let status = self.read_status(config)?;

        let charger = self.read(device, CHARGER_METRICS)?;
        let charger_voltage = charger.i16_at(charger_offsets::VOLTAGE)?;
        let charger_current = charger.i16_at(charger_offsets::CURRENT)?;
        let charger_power = charger.i16_at(charger_offsets::POWER)?;
        debug!("VBUS Voltage {:5} mV", charger_voltage);
        debug!("VBUS Current {:5} mA", charger_current);
        debug!("VBUS Power   {:5} mW", charger_power);

        let battery = self.read(device, BATTERY_METRICS)?;
        let battery_voltage = battery.i16_at(battery_offsets::VOLTAGE)?;
        let battery_current = battery.i16_at(battery_offsets::CURRENT)?;
        let soc = battery.i16_at(battery_offsets::STATE_OF_CHARGE)?;
        let remaining_capacity = battery.i16_at(battery_offsets::REMAINING_CAPACITY)?;
        let remaining_time = select_remaining_time(&battery, status.online, battery_current)?;
        debug!("Battery Voltage {} mV", battery_voltage);
        debug!("Battery Current {} mA", battery_current);
        debug!("Battery Percent {}%", soc);
        debug!("Remaining Capacity {} mAh", remaining_capacity);
        debug!("Remaining Time {} min", remaining_time);

        let cells = self.read(device, CELL_VOLTAGES)?;
        let mut cell_voltages = [0.0; 4];
        for (i, cell) in cell_voltages.iter_mut().enumerate() {
            let raw = cells.i16_at(i * 2)?;
            debug!("Cell Voltage{} {} mV", i + 1, raw);
            *cell = f64::from(raw) / 1000.0;
        }

        // every read succeeded; only now touch the buffers
        let buffers = &mut self.buffers;
        buffers.charger_voltage.push(charger_voltage);
        buffers.charger_current.push(charger_current);
        buffers.charger_power.push(charger_power);
        buffers.battery_voltage.push(battery_voltage);
        buffers.battery_current.push(battery_current);
        buffers.remaining_time.push(remaining_time);

        Ok(TelemetrySnapshot {
            captured_at: unix_now(),
            charger_voltage: millis_to_unit(buffers.charger_voltage.median()?),
            charger_current: f64::from(buffers.charger_current.median()?),
            charger_power: f64::from(buffers.charger_power.median()?),
            battery_voltage: millis_to_unit(buffers.battery_voltage.median()?),
            battery_current: f64::from(buffers.battery_current.median()?),
            state_of_charge: f64::from(soc),
            remaining_battery_capacity_wh: remaining_capacity_wh(remaining_capacity, battery_voltage),
            remaining_time_minutes: buffers.remaining_time.median()?,
            cell_voltages,
            online: status.online,
            charging: status.charging,
            fast_charging: status.fast_charging,
            state: status.power_state(),
            phase: status.phase,
        })
    }
}

/// Time-to-empty on battery, time-to-full while charging on external power, 0 when
/// on external power without charge current (the register then holds 0xFFFF).
pub fn select_remaining_time(
    battery: &RawRegisterBlock,
    online: bool,
    battery_current: i16,
) -> Result<i16> {
    if !online {
        battery.i16_at(battery_offsets::TIME_TO_EMPTY)
    } else if battery_current > 0 {
        battery.i16_at(battery_offsets::TIME_TO_FULL)
    } else {
        Ok(0)
    }
}

/// mAh x mV -> Wh, from the unsmoothed voltage of the current cycle.
pub fn remaining_capacity_wh(capacity_mah: i16, voltage_mv: i16) -> f64 {
    round2(f64::from(capacity_mah) * f64::from(voltage_mv) / 1000.0 / 1000.0)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
