//! Fixed-window median smoothing of raw register samples.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::error::{Error, Result};

/// Number of samples each channel keeps.
pub const SAMPLES: usize = 3;

/// Measured channels that are smoothed before publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    ChargerVoltage,
    ChargerCurrent,
    ChargerPower,
    BatteryVoltage,
    BatteryCurrent,
    RemainingTime,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::ChargerVoltage,
        Channel::ChargerCurrent,
        Channel::ChargerPower,
        Channel::BatteryVoltage,
        Channel::BatteryCurrent,
        Channel::RemainingTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::ChargerVoltage => "charger voltage",
            Channel::ChargerCurrent => "charger current",
            Channel::ChargerPower => "charger power",
            Channel::BatteryVoltage => "battery voltage",
            Channel::BatteryCurrent => "battery current",
            Channel::RemainingTime => "remaining time",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling window over the last [`SAMPLES`] readings of one channel.
///
/// The median rejects the single-sample spikes that show up on bus reads, which a
/// mean would smear into the next few published values.
#[derive(Debug, Clone)]
pub struct SmoothingBuffer {
    channel: Channel,
    samples: VecDeque<i16>,
}

impl SmoothingBuffer {
    pub fn new(channel: Channel) -> Self {
        SmoothingBuffer {
            channel,
            samples: VecDeque::with_capacity(SAMPLES),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Appends a sample, evicting the oldest once the window is full.
    pub fn push(&mut self, sample: i16) {
        if self.samples.len() == SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Middle element of the sorted window; lower-middle while the window holds an
    /// even number of samples.
    pub fn median(&self) -> Result<i16> {
        if self.samples.is_empty() {
            return Err(Error::EmptyBuffer {
                channel: self.channel,
            });
        }
        let mut sorted: Vec<i16> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        Ok(sorted[(sorted.len() - 1) / 2])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Oldest first.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.samples.iter().copied()
    }
}

/// One buffer per smoothed channel, owned by the coordinator.
#[derive(Debug, Clone)]
pub struct ChannelBuffers {
    pub charger_voltage: SmoothingBuffer,
    pub charger_current: SmoothingBuffer,
    pub charger_power: SmoothingBuffer,
    pub battery_voltage: SmoothingBuffer,
    pub battery_current: SmoothingBuffer,
    pub remaining_time: SmoothingBuffer,
}

impl Default for ChannelBuffers {
    fn default() -> Self {
        ChannelBuffers {
            charger_voltage: SmoothingBuffer::new(Channel::ChargerVoltage),
            charger_current: SmoothingBuffer::new(Channel::ChargerCurrent),
            charger_power: SmoothingBuffer::new(Channel::ChargerPower),
            battery_voltage: SmoothingBuffer::new(Channel::BatteryVoltage),
            battery_current: SmoothingBuffer::new(Channel::BatteryCurrent),
            remaining_time: SmoothingBuffer::new(Channel::RemainingTime),
        }
    }
}

impl ChannelBuffers {
    pub fn get(&self, channel: Channel) -> &SmoothingBuffer {
        match channel {
            Channel::ChargerVoltage => &self.charger_voltage,
            Channel::ChargerCurrent => &self.charger_current,
            Channel::ChargerPower => &self.charger_power,
            Channel::BatteryVoltage => &self.battery_voltage,
            Channel::BatteryCurrent => &self.battery_current,
            Channel::RemainingTime => &self.remaining_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let mut buf = SmoothingBuffer::new(Channel::ChargerVoltage);
        for v in [10, 20, 30, 40] {
            buf.push(v);
        }
        assert_eq!(buf.samples().collect::<Vec<_>>(), vec![20, 30, 40]);
        assert_eq!(buf.median().unwrap(), 30);
    }

    #[test]
    fn single_sample_is_its_own_median() {
        let mut buf = SmoothingBuffer::new(Channel::BatteryCurrent);
        buf.push(-250);
        assert_eq!(buf.median().unwrap(), -250);
    }

    #[test]
    fn even_fill_uses_lower_middle() {
        let mut buf = SmoothingBuffer::new(Channel::BatteryVoltage);
        buf.push(12100);
        buf.push(11900);
        assert_eq!(buf.median().unwrap(), 11900);
    }

    #[test]
    fn median_rejects_spike() {
        let mut buf = SmoothingBuffer::new(Channel::ChargerPower);
        for v in [5000, -1, 5010] {
            buf.push(v);
        }
        assert_eq!(buf.median().unwrap(), 5000);
    }

    #[test]
    fn empty_buffer_has_no_median() {
        let buf = SmoothingBuffer::new(Channel::RemainingTime);
        assert!(matches!(
            buf.median(),
            Err(Error::EmptyBuffer {
                channel: Channel::RemainingTime
            })
        ));
    }

    #[test]
    fn buffers_index_by_channel() {
        let buffers = ChannelBuffers::default();
        for channel in Channel::ALL {
            assert_eq!(buffers.get(channel).channel(), channel);
            assert!(buffers.get(channel).is_empty());
        }
    }
}
