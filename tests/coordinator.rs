//! Refresh and power-off behaviour against an in-memory register bank.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ups_hat_e::charge_state::ClassificationStrategy;
use ups_hat_e::{
    CoordinatorConfig, Error, PowerState, RegisterBus, ShutdownOutcome, UpsCoordinator,
};

const DEVICE: u16 = 0x2D;

struct Bank {
    status: u8,
    charger: [i16; 3],
    // voltage, current, soc, capacity, time to empty, time to full
    battery: [i16; 6],
    cells: [i16; 4],
    failing: HashSet<u8>,
    truncated: HashSet<u8>,
    writes: Vec<(u16, u8, Vec<u8>)>,
}

impl Default for Bank {
    fn default() -> Self {
        Bank {
            status: 0x00,
            charger: [5100, 1200, 6120],
            battery: [12000, -850, 76, 2000, 135, 40],
            cells: [4050, 4050, 4040, 4060],
            failing: HashSet::new(),
            truncated: HashSet::new(),
            writes: Vec::new(),
        }
    }
}

fn words(values: &[i16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[derive(Clone, Default)]
struct FakeBus(Arc<Mutex<Bank>>);

impl FakeBus {
    fn with<R>(&self, f: impl FnOnce(&mut Bank) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }
}

impl RegisterBus for FakeBus {
    fn read_block(&mut self, device: u16, register: u8, length: usize) -> io::Result<Vec<u8>> {
        let bank = self.0.lock().unwrap();
        assert_eq!(device, DEVICE);
        if bank.failing.contains(&register) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no ack"));
        }
        let mut bytes = match register {
            0x02 => vec![bank.status],
            0x10 => words(&bank.charger),
            0x20 => words(&bank.battery),
            0x30 => words(&bank.cells),
            _ => return Err(io::Error::new(io::ErrorKind::InvalidInput, "unmapped")),
        };
        assert_eq!(bytes.len(), length);
        if bank.truncated.contains(&register) {
            bytes.pop();
        }
        Ok(bytes)
    }

    fn write_block(&mut self, device: u16, register: u8, data: &[u8]) -> io::Result<()> {
        let mut bank = self.0.lock().unwrap();
        if bank.failing.contains(&register) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no ack"));
        }
        bank.writes.push((device, register, data.to_vec()));
        Ok(())
    }
}

fn coordinator(bus: &FakeBus, strategy: ClassificationStrategy) -> UpsCoordinator<FakeBus> {
    UpsCoordinator::new(
        bus.clone(),
        CoordinatorConfig {
            device_address: DEVICE,
            poll_interval: Duration::from_secs(30),
            strategy,
        },
    )
}

#[test]
fn first_refresh_publishes_scaled_snapshot() {
    let bus = FakeBus::default();
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    assert!(ups.latest().is_none());

    let s = ups.refresh().unwrap();
    assert_eq!(s.charger_voltage, 5.1);
    assert_eq!(s.charger_current, 1200.0);
    assert_eq!(s.charger_power, 6120.0);
    assert_eq!(s.battery_voltage, 12.0);
    assert_eq!(s.battery_current, -850.0);
    assert_eq!(s.state_of_charge, 76.0);
    assert_eq!(s.remaining_battery_capacity_wh, 24.0);
    assert_eq!(s.remaining_time_minutes, 135);
    assert_eq!(s.cell_voltages, [4.05, 4.05, 4.04, 4.06]);
    assert!(!s.online && !s.charging && !s.fast_charging);
    assert_eq!(s.state, PowerState::Idle);
    assert!(Arc::ptr_eq(&s, &ups.latest().unwrap()));
}

#[test]
fn smoothed_channels_report_median_of_last_three() {
    let bus = FakeBus::default();
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    for voltage in [12000, 12100, 30000] {
        bus.with(|b| b.battery[0] = voltage);
        ups.refresh().unwrap();
    }
    let s = ups.latest().unwrap();
    assert_eq!(s.battery_voltage, 12.1);
    // capacity uses this cycle's raw voltage, not the median
    assert_eq!(s.remaining_battery_capacity_wh, 60.0);

    bus.with(|b| b.battery[0] = 12050);
    let s = ups.refresh().unwrap();
    // window is now [12100, 30000, 12050]
    assert_eq!(s.battery_voltage, 12.1);
}

#[test]
fn failed_charger_read_keeps_previous_snapshot() {
    let bus = FakeBus::default();
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    let before = ups.refresh().unwrap();

    bus.with(|b| {
        b.failing.insert(0x10);
        b.charger[0] = 9000;
    });
    let err = ups.refresh().unwrap_err();
    assert!(matches!(err.source, Error::Transport { register: 0x10, .. }));
    assert!(Arc::ptr_eq(&before, &ups.latest().unwrap()));
}

#[test]
fn truncated_battery_block_is_malformed() {
    let bus = FakeBus::default();
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    bus.with(|b| {
        b.truncated.insert(0x20);
    });
    let err = ups.refresh().unwrap_err();
    assert!(matches!(
        err.source,
        Error::MalformedBlock {
            register: 0x20,
            expected: 12,
            actual: 11
        }
    ));
    assert!(ups.latest().is_none());
}

#[test]
fn aborted_cycle_does_not_feed_buffers() {
    let bus = FakeBus::default();
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    ups.refresh().unwrap();

    bus.with(|b| {
        b.charger[0] = 9000;
        b.failing.insert(0x30);
    });
    assert!(ups.refresh().is_err());

    bus.with(|b| {
        b.charger[0] = 5100;
        b.failing.clear();
    });
    // a 9000 mV sample leaking into the window would drag the median up
    let s = ups.refresh().unwrap();
    assert_eq!(s.charger_voltage, 5.1);
}

#[test]
fn status_read_failure_reuses_previous_status() {
    let bus = FakeBus::default();
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    bus.with(|b| {
        b.status = 0xA0;
        b.battery[1] = 500;
    });
    assert!(ups.refresh().unwrap().online);

    bus.with(|b| {
        b.failing.insert(0x02);
    });
    let s = ups.refresh().unwrap();
    assert!(s.online);
    assert!(s.charging);
    assert_eq!(s.remaining_time_minutes, 40);
}

#[test]
fn remaining_time_follows_power_source() {
    let bus = FakeBus::default();
    bus.with(|b| b.battery[4] = 200);

    // each case on a fresh coordinator so the window holds one sample
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    assert_eq!(ups.refresh().unwrap().remaining_time_minutes, 200);

    bus.with(|b| {
        b.status = 0xA0;
        b.battery[1] = 5;
    });
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    assert_eq!(ups.refresh().unwrap().remaining_time_minutes, 40);

    bus.with(|b| {
        b.status = 0x20;
        b.battery[1] = -1;
        b.battery[5] = -1;
    });
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    assert_eq!(ups.refresh().unwrap().remaining_time_minutes, 0);
}

#[test]
fn flags_reported_per_strategy() {
    let bus = FakeBus::default();
    bus.with(|b| b.status = 0x40);

    let independent = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    let s = independent.refresh().unwrap();
    assert!(s.fast_charging && !s.charging && !s.online);
    assert_eq!(s.state, PowerState::FastCharging);

    let priority = coordinator(&bus, ClassificationStrategy::PriorityState);
    let s = priority.refresh().unwrap();
    assert!(s.fast_charging && s.charging);
    assert_eq!(s.state_str(), "Fast Charging");
}

#[test]
fn shutdown_refused_while_online() {
    let bus = FakeBus::default();
    bus.with(|b| b.status = 0x20);
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    ups.refresh().unwrap();

    assert_eq!(ups.shutdown().unwrap(), ShutdownOutcome::Refused);
    assert!(bus.with(|b| b.writes.is_empty()));
}

#[test]
fn shutdown_on_battery_writes_sentinel_once() {
    let bus = FakeBus::default();
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    ups.refresh().unwrap();

    assert_eq!(ups.shutdown().unwrap(), ShutdownOutcome::Commanded);
    assert_eq!(bus.with(|b| b.writes.clone()), vec![(DEVICE, 0x01, vec![0x55])]);
}

#[test]
fn shutdown_before_any_status_is_refused() {
    let bus = FakeBus::default();
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    assert_eq!(ups.shutdown().unwrap(), ShutdownOutcome::Refused);
    assert!(bus.with(|b| b.writes.is_empty()));
}

#[test]
fn shutdown_write_failure_propagates() {
    let bus = FakeBus::default();
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    ups.refresh().unwrap();
    bus.with(|b| {
        b.failing.insert(0x01);
    });
    assert!(matches!(
        ups.shutdown(),
        Err(Error::Transport { register: 0x01, .. })
    ));
}

#[test]
fn readers_never_see_a_torn_snapshot() {
    let bus = FakeBus::default();
    bus.with(|b| b.cells = [1000; 4]);
    let ups = Arc::new(coordinator(&bus, ClassificationStrategy::IndependentFlags));
    ups.refresh().unwrap();

    let reader = {
        let ups = Arc::clone(&ups);
        thread::spawn(move || {
            for _ in 0..500 {
                let s = ups.latest().unwrap();
                // all four cells are written together in this bank
                assert!(s.cell_voltages.iter().all(|c| *c == s.cell_voltages[0]));
            }
        })
    };

    for i in 1..50i16 {
        bus.with(|b| b.cells = [1000 + i; 4]);
        ups.refresh().unwrap();
    }
    reader.join().unwrap();
}

#[test]
fn first_status_failure_aborts_cycle_and_refuses_power_off() {
    let bus = FakeBus::default();
    bus.with(|b| {
        b.status = 0x20;
        b.failing.insert(0x02);
    });
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);

    let err = ups.refresh().unwrap_err();
    assert!(matches!(err.source, Error::Transport { register: 0x02, .. }));
    assert!(ups.latest().is_none());
    assert_eq!(ups.shutdown().unwrap(), ShutdownOutcome::Refused);
    assert!(bus.with(|b| b.writes.is_empty()));
}

#[test]
fn online_status_from_aborted_cycle_blocks_power_off() {
    let bus = FakeBus::default();
    let ups = coordinator(&bus, ClassificationStrategy::IndependentFlags);
    assert!(!ups.refresh().unwrap().online);

    // external power returns, but the rest of the cycle fails
    bus.with(|b| {
        b.status = 0x20;
        b.failing.insert(0x10);
    });
    assert!(ups.refresh().is_err());
    assert!(!ups.latest().unwrap().online);

    assert_eq!(ups.shutdown().unwrap(), ShutdownOutcome::Refused);
    assert!(bus.with(|b| b.writes.is_empty()));
}
