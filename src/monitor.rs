use crate::config::Config;
use crate::ipc::{connect_to_daemon, read_snapshot};
use crate::snapshot::TelemetrySnapshot;
use anyhow::Result;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{self, ClearType},
};
use std::io::{self, stdout, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

pub fn run_monitor(config: &Config) -> Result<()> {
    let mut reader = connect_to_daemon(&config.ipc.socket_path)?;

    // Setup terminal
    terminal::enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, terminal::EnterAlternateScreen, cursor::Hide)?;

    let result = monitor_loop(&mut stdout, &mut reader);

    // Cleanup terminal (always, even on error)
    let _ = execute!(stdout, cursor::Show, terminal::LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();

    result
}

fn monitor_loop(
    stdout: &mut impl Write,
    reader: &mut BufReader<UnixStream>,
) -> Result<()> {
    loop {
        // Check for quit key (non-blocking)
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(KeyEvent { code, modifiers, .. }) = event::read()? {
                match code {
                    KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => break,
                    KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => break,
                    _ => {}
                }
            }
        }

        // Try to read data
        match read_snapshot(reader) {
            Ok(snapshot) => {
                render_monitor(stdout, &snapshot)?;
            }
            // no new snapshot inside the read timeout; keep the last frame
            Err(e) if is_timeout(&e) => {}
            Err(_) => {
                // Connection lost, try to show error
                execute!(
                    stdout,
                    cursor::MoveTo(0, 0),
                    terminal::Clear(ClearType::All)
                )?;
                writeln!(stdout, "\x1b[31mConnection to daemon lost.\x1b[0m")?;
                writeln!(stdout, "Press 'q' to exit.")?;
                stdout.flush()?;
            }
        }
    }

    Ok(())
}

fn is_timeout(e: &anyhow::Error) -> bool {
    e.root_cause()
        .downcast_ref::<io::Error>()
        .map_or(false, |io| {
            matches!(io.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        })
}

fn render_monitor(stdout: &mut impl Write, s: &TelemetrySnapshot) -> Result<()> {
    execute!(
        stdout,
        cursor::MoveTo(0, 0),
        terminal::Clear(ClearType::All)
    )?;

    let on_battery = s.is_on_battery();
    let power_icon = if on_battery { "BATTERY" } else { "EXTERNAL" };

    let charging_status = if s.fast_charging {
        " [FAST CHARGING]"
    } else if s.charging {
        " [CHARGING]"
    } else if s.battery_current < 0.0 {
        " [DISCHARGING]"
    } else {
        ""
    };

    // Header
    writeln!(stdout, "\x1b[1;36m=== UPS HAT (E) Monitor ===\x1b[0m")?;
    writeln!(stdout, "Press 'q' or ESC to exit")?;
    writeln!(stdout)?;

    // Battery bar
    let bar_width = 30;
    let soc = s.state_of_charge.clamp(0.0, 100.0);
    let filled = (soc as usize * bar_width) / 100;
    let bar_color = match soc as u8 {
        0..=20 => "\x1b[31m",  // Red
        21..=50 => "\x1b[33m", // Yellow
        _ => "\x1b[32m",       // Green
    };

    write!(stdout, "Battery: {}[", bar_color)?;
    write!(stdout, "{}", "=".repeat(filled))?;
    write!(stdout, "{}", " ".repeat(bar_width - filled))?;
    writeln!(stdout, "]\x1b[0m {}%{}", s.state_of_charge, charging_status)?;
    writeln!(stdout)?;

    let power_color = if on_battery { "\x1b[33m" } else { "\x1b[32m" };
    writeln!(stdout, "Power:   {}[{}]\x1b[0m", power_color, power_icon)?;
    writeln!(stdout)?;

    writeln!(stdout, "\x1b[1mDetails:\x1b[0m")?;
    writeln!(stdout, "  Battery Voltage:  {:.2} V", s.battery_voltage)?;
    writeln!(stdout, "  Battery Current:  {} mA", s.battery_current)?;
    writeln!(stdout, "  Remaining:        {:.2} Wh, {}", s.remaining_battery_capacity_wh, s.remaining_time_str())?;
    writeln!(stdout, "  Charger Voltage:  {:.2} V", s.charger_voltage)?;
    writeln!(stdout, "  Charger Power:    {:.2} W", s.charger_power_w())?;
    write!(stdout, "  Cells:           ")?;
    for cell in &s.cell_voltages {
        write!(stdout, " {:.3}", cell)?;
    }
    writeln!(stdout, " V")?;
    writeln!(stdout, "  Charger Phase:    {}", s.phase.as_str())?;

    stdout.flush()?;
    Ok(())
}
