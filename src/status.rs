use crate::config::Config;
use crate::ipc::{connect_to_daemon, read_snapshot};
use crate::snapshot::TelemetrySnapshot;
use anyhow::Result;
use std::io::{self, Write};

pub fn run_status(config: &Config) -> Result<()> {
    let mut reader = connect_to_daemon(&config.ipc.socket_path)?;
    let snapshot = read_snapshot(&mut reader)?;
    print_status_report(&mut io::stdout(), &snapshot)?;
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

pub fn print_status_report(out: &mut impl Write, s: &TelemetrySnapshot) -> io::Result<()> {
    let power_source = if s.is_on_battery() { "Battery" } else { "External" };

    writeln!(out, "=== UPS HAT (E) Status ===")?;
    writeln!(out)?;
    writeln!(out, "Battery:")?;
    writeln!(out, "  State of Charge: {}%", s.state_of_charge)?;
    writeln!(out, "  Voltage:         {:.2} V", s.battery_voltage)?;
    writeln!(out, "  Current:         {} mA", s.battery_current)?;
    writeln!(out, "  Remaining:       {:.2} Wh", s.remaining_battery_capacity_wh)?;
    writeln!(out, "  Time:            {}", s.remaining_time_str())?;
    for (i, cell) in s.cell_voltages.iter().enumerate() {
        writeln!(out, "  Cell {}:          {:.3} V", i + 1, cell)?;
    }
    writeln!(out)?;
    writeln!(out, "Charger:")?;
    writeln!(out, "  Source:          {}", power_source)?;
    writeln!(out, "  Voltage:         {:.2} V", s.charger_voltage)?;
    writeln!(out, "  Current:         {} mA", s.charger_current)?;
    writeln!(out, "  Power:           {:.2} W", s.charger_power_w())?;
    writeln!(out, "  State:           {}", s.state_str())?;
    writeln!(out, "  Phase:           {}", s.phase.as_str())?;
    writeln!(out, "  Charging:        {}", yes_no(s.charging))?;
    writeln!(out, "  Fast Charging:   {}", yes_no(s.fast_charging))?;
    Ok(())
}
