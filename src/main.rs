use anyhow::{anyhow, Result};
use log::{error, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ups_hat_e::config::{load_config, load_config_silent, setup_logging, Config, DEFAULT_CONFIG_PATH};
use ups_hat_e::coordinator::UpsCoordinator;
use ups_hat_e::daemon::{open_bus, run_daemon};
use ups_hat_e::monitor::run_monitor;
use ups_hat_e::shutdown::ShutdownOutcome;
use ups_hat_e::status::run_status;

const VERSION: &str = env!("CARGO_PKG_VERSION");

enum Mode {
    Daemon,
    Status,
    Monitor,
    PowerOff,
}

fn print_help() {
    println!("ups-hat-e v{} - UPS HAT (E) Telemetry Service", VERSION);
    println!();
    println!("USAGE:");
    println!("    ups-hat-e [COMMAND] [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    daemon                 Poll the UPS and serve snapshots (default)");
    println!("    status                 Print the latest snapshot from the daemon");
    println!("    monitor                Live view of the daemon's snapshots");
    println!("    poweroff               Ask the UPS to cut power (refused on external power)");
    println!();
    println!("OPTIONS:");
    println!(
        "    -c, --config <PATH>    Path to config file (default: {})",
        DEFAULT_CONFIG_PATH
    );
    println!("    -v, --version          Print version information");
    println!("    -h, --help             Print this help message");
    println!();
    println!("SIGNALS:");
    println!("    SIGTERM, SIGINT - Graceful shutdown of the service");
}

/// One refresh so the gate sees the current power source, then the gated command.
fn run_poweroff(config: &Config) -> Result<()> {
    let bus = open_bus(&config.device)?;
    let coordinator = UpsCoordinator::new(bus, config.device.coordinator_config());
    if let Err(e) = coordinator.refresh() {
        warn!("{}", e);
    }
    match coordinator.shutdown()? {
        ShutdownOutcome::Commanded => println!("Power-off commanded."),
        ShutdownOutcome::Refused => {
            return Err(anyhow!("Power-off refused: external power present or status unknown"))
        }
    }
    Ok(())
}

fn run_service(config: &Config, config_path: &str) -> Result<()> {
    setup_logging(&config.logging)?;

    info!("ups-hat-e v{} starting", VERSION);
    info!("Config loaded from: {}", config_path);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("Received signal {:?}, shutting down...", sig);
            r.store(false, Ordering::SeqCst);
        }
    });

    loop {
        match run_daemon(config, running.clone()) {
            Ok(()) => break,
            Err(e) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                error!("Daemon error: {:#}. Retrying in 5 seconds...", e);
                thread::sleep(Duration::from_secs(5));
            }
        }
    }

    info!("ups-hat-e stopped");
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut mode = Mode::Daemon;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "-v" | "--version" => {
                println!("ups-hat-e v{}", VERSION);
                return Ok(());
            }
            "-c" | "--config" => {
                if i + 1 < args.len() {
                    config_path = args[i + 1].clone();
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "daemon" => mode = Mode::Daemon,
            "status" => mode = Mode::Status,
            "monitor" => mode = Mode::Monitor,
            "poweroff" => mode = Mode::PowerOff,
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                eprintln!("Use --help for usage information");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    match mode {
        Mode::Daemon => {
            let config = load_config(&config_path)?;
            run_service(&config, &config_path)
        }
        Mode::Status => run_status(&load_config_silent(&config_path)),
        Mode::Monitor => run_monitor(&load_config_silent(&config_path)),
        Mode::PowerOff => {
            let config = load_config(&config_path)?;
            setup_logging(&config.logging)?;
            run_poweroff(&config)
        }
    }
}
