//! Interpretation of the STATUS register byte.

use serde::{Deserialize, Serialize};

use crate::registers::status_bits;

/// How the charge flags of the status byte are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStrategy {
    /// Each flag reported verbatim; charging and fast charging may both be set.
    #[default]
    IndependentFlags,
    /// Older firmware behaviour: fast charging implies charging.
    PriorityState,
}

/// Collapsed single-label view: FastCharging > Charging > Discharging > Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    FastCharging,
    Charging,
    /// Online without a charge flag. The label is what the older firmware reported.
    Discharging,
    Idle,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::FastCharging => "Fast Charging",
            PowerState::Charging => "Charging",
            PowerState::Discharging => "Discharging",
            PowerState::Idle => "Idle",
        }
    }
}

/// Charger phase from the low three status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargerPhase {
    Standby,
    Trickle,
    ConstantCurrent,
    ConstantVoltage,
    Pending,
    Full,
    Timeout,
    Unknown,
}

impl ChargerPhase {
    pub fn from_bits(bits: u8) -> Self {
        match bits & status_bits::PHASE_MASK {
            0b000 => ChargerPhase::Standby,
            0b001 => ChargerPhase::Trickle,
            0b010 => ChargerPhase::ConstantCurrent,
            0b011 => ChargerPhase::ConstantVoltage,
            0b100 => ChargerPhase::Pending,
            0b101 => ChargerPhase::Full,
            0b110 => ChargerPhase::Timeout,
            _ => ChargerPhase::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargerPhase::Standby => "Standby",
            ChargerPhase::Trickle => "Trickle charge",
            ChargerPhase::ConstantCurrent => "Constant current",
            ChargerPhase::ConstantVoltage => "Constant voltage",
            ChargerPhase::Pending => "Charge pending",
            ChargerPhase::Full => "Full",
            ChargerPhase::Timeout => "Charge timeout",
            ChargerPhase::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeStatus {
    pub online: bool,
    pub charging: bool,
    pub fast_charging: bool,
    pub phase: ChargerPhase,
}

impl ChargeStatus {
    pub fn power_state(&self) -> PowerState {
        if self.fast_charging {
            PowerState::FastCharging
        } else if self.charging {
            PowerState::Charging
        } else if self.online {
            PowerState::Discharging
        } else {
            PowerState::Idle
        }
    }
}

pub fn classify(status: u8, strategy: ClassificationStrategy) -> ChargeStatus {
    let online = status & status_bits::ONLINE != 0;
    let charging = status & status_bits::CHARGING != 0;
    let fast_charging = status & status_bits::FAST_CHARGING != 0;
    let charging = match strategy {
        ClassificationStrategy::IndependentFlags => charging,
        ClassificationStrategy::PriorityState => charging || fast_charging,
    };

    ChargeStatus {
        online,
        charging,
        fast_charging,
        phase: ChargerPhase::from_bits(status),
    }
}
