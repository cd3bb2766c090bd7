//! Register map of the UPS HAT (E) battery controller and bit-exact decoding of the
//! blocks read from it.
//!
//! Nothing here applies unit conversion: values come out in raw device units
//! (mV, mA, mW, mAh, minutes, percent).

use crate::error::{Error, Result};

pub const DEFAULT_DEVICE_ADDRESS: u16 = 0x2D;
pub const DEFAULT_BUS_PATH: &str = "/dev/i2c-1";

/// Value written to [`REBOOT`] to make the controller cut power.
pub const SHUTDOWN_COMMAND: u8 = 0x55;

/// A fixed register address together with the block length the protocol defines for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub name: &'static str,
    pub address: u8,
    pub length: usize,
}

pub const REBOOT: Register = Register {
    name: "REBOOT",
    address: 0x01,
    length: 1,
};

// BIT7 charging, BIT6 fast charging, BIT5 VBUS powered, BIT4..3 fixed 00,
// BIT2..0 charger phase
pub const STATUS: Register = Register {
    name: "STATUS",
    address: 0x02,
    length: 1,
};

pub const CHARGER_METRICS: Register = Register {
    name: "CHARGER_METRICS",
    address: 0x10,
    length: 6,
};

pub const BATTERY_METRICS: Register = Register {
    name: "BATTERY_METRICS",
    address: 0x20,
    length: 12,
};

pub const CELL_VOLTAGES: Register = Register {
    name: "CELL_VOLTAGES",
    address: 0x30,
    length: 8,
};

pub mod status_bits {
    pub const CHARGING: u8 = 0x80;
    pub const FAST_CHARGING: u8 = 0x40;
    pub const ONLINE: u8 = 0x20;
    pub const PHASE_MASK: u8 = 0x07;
}

/// Byte offsets inside the [`CHARGER_METRICS`] block.
pub mod charger_offsets {
    pub const VOLTAGE: usize = 0;
    pub const CURRENT: usize = 2;
    pub const POWER: usize = 4;
}

/// Byte offsets inside the [`BATTERY_METRICS`] block.
pub mod battery_offsets {
    pub const VOLTAGE: usize = 0;
    pub const CURRENT: usize = 2;
    pub const STATE_OF_CHARGE: usize = 4;
    pub const REMAINING_CAPACITY: usize = 6;
    pub const TIME_TO_EMPTY: usize = 8;
    pub const TIME_TO_FULL: usize = 10;
}

/// Bytes returned by one bus read, tagged with the register they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRegisterBlock {
    register: Register,
    bytes: Vec<u8>,
}

impl RawRegisterBlock {
    /// Fails with `MalformedBlock` unless `bytes` is exactly the register's block length.
    pub fn new(register: Register, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != register.length {
            return Err(Error::MalformedBlock {
                register: register.address,
                expected: register.length,
                actual: bytes.len(),
            });
        }
        Ok(RawRegisterBlock { register, bytes })
    }

    pub fn register(&self) -> Register {
        self.register
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn i16_at(&self, offset: usize) -> Result<i16> {
        decode_i16le(self.register.address, &self.bytes, offset)
    }

    pub fn u8_at(&self, offset: usize) -> Result<u8> {
        decode_u8_flags(self.register.address, &self.bytes, offset)
    }
}

/// Two bytes at `offset`, little-endian, two's-complement.
pub fn decode_i16le(register: u8, block: &[u8], offset: usize) -> Result<i16> {
    match block.get(offset..offset.saturating_add(2)) {
        Some(&[lo, hi]) => Ok(i16::from_le_bytes([lo, hi])),
        _ => Err(Error::MalformedBlock {
            register,
            expected: offset.saturating_add(2),
            actual: block.len(),
        }),
    }
}

pub fn decode_u8_flags(register: u8, block: &[u8], offset: usize) -> Result<u8> {
    block.get(offset).copied().ok_or(Error::MalformedBlock {
        register,
        expected: offset + 1,
        actual: block.len(),
    })
}
