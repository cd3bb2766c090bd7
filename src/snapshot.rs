//! The published telemetry record and its display helpers.

use serde::{Deserialize, Serialize};

use crate::charge_state::{ChargerPhase, PowerState};

/// One complete set of derived telemetry, published at the end of a refresh cycle.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub captured_at: u64, // unix seconds
    pub charger_voltage: f64, // V, smoothed
    pub charger_current: f64, // mA, smoothed
    pub charger_power: f64, // mW, smoothed
    pub battery_voltage: f64, // V, smoothed
    pub battery_current: f64, // mA, smoothed, negative when discharging
    pub state_of_charge: f64, // %
    pub remaining_battery_capacity_wh: f64,
    pub remaining_time_minutes: i16, // smoothed; to empty off-line, to full on-line
    pub cell_voltages: [f64; 4], // V
    pub online: bool,
    pub charging: bool,
    pub fast_charging: bool,
    pub state: PowerState,
    pub phase: ChargerPhase,
}

impl TelemetrySnapshot {
    pub fn is_on_battery(&self) -> bool {
        !self.online
    }

    pub fn charger_power_w(&self) -> f64 {
        round2(self.charger_power / 1000.0)
    }

    pub fn state_str(&self) -> &'static str {
        self.state.as_str()
    }

    pub fn remaining_time_str(&self) -> String {
        let minutes = self.remaining_time_minutes.max(0);
        let label = if self.online { "to full" } else { "to empty" };
        format!("{}h {:02}m {}", minutes / 60, minutes % 60, label)
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Millivolts to volts, rounded to two decimals.
pub(crate) fn millis_to_unit(raw: i16) -> f64 {
    round2(f64::from(raw) / 1000.0)
}
