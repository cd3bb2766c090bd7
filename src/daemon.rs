use crate::bus::RegisterBus;
use crate::config::{Config, DeviceConfig};
use crate::coordinator::UpsCoordinator;
use crate::ipc::IpcServer;
use crate::shutdown::{execute_shutdown_script, DeferredShutdown, LowBatteryAction, LowBatteryWatch};
use crate::snapshot::TelemetrySnapshot;
use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub type SharedBus = Box<dyn RegisterBus + Send>;

#[cfg(feature = "i2c-hardware")]
pub fn open_bus(device: &DeviceConfig) -> Result<SharedBus> {
    info!(
        "Using I2C bus {} (device 0x{:02X})",
        device.bus_path, device.address
    );
    Ok(Box::new(crate::bus::LinuxI2cBus::new(&device.bus_path)))
}

#[cfg(not(feature = "i2c-hardware"))]
pub fn open_bus(_device: &DeviceConfig) -> Result<SharedBus> {
    anyhow::bail!("Built without the i2c-hardware feature; no bus available")
}

pub fn run_daemon(config: &Config, running: Arc<AtomicBool>) -> Result<()> {
    let bus = open_bus(&config.device)?;
    let coordinator = Arc::new(UpsCoordinator::new(bus, config.device.coordinator_config()));

    info!("Starting IPC server on: {}", config.ipc.socket_path);
    let mut ipc = IpcServer::new(&config.ipc.socket_path)?;

    poll_loop(config, &coordinator, &mut ipc, &running)?;

    if config.shutdown.power_off_on_exit {
        power_off_after_exit(&coordinator, config.shutdown.power_off_delay_seconds);
    }
    Ok(())
}

fn poll_loop<B: RegisterBus>(
    config: &Config,
    coordinator: &UpsCoordinator<B>,
    ipc: &mut IpcServer,
    running: &AtomicBool,
) -> Result<()> {
    let mut watch = LowBatteryWatch::new(
        config.battery.shutdown_threshold,
        config.battery.shutdown_cancel_margin,
        Duration::from_secs(config.shutdown.delay_seconds),
    );
    let mut last_log_time: Option<Instant> = None;
    let log_interval = Duration::from_secs(60);

    info!(
        "Monitoring started. Polling every {}s, shutdown threshold: {}% SOC when on battery",
        coordinator.poll_interval().as_secs(),
        config.battery.shutdown_threshold
    );

    while running.load(Ordering::SeqCst) {
        let cycle_start = Instant::now();

        match coordinator.refresh() {
            Ok(snapshot) => {
                ipc.broadcast(&snapshot);

                if last_log_time.map_or(true, |t| t.elapsed() >= log_interval) {
                    info!("Status: {}, clients={}", summary(&snapshot), ipc.client_count());
                    last_log_time = Some(Instant::now());
                }
                debug!("UPS: {}", summary(&snapshot));

                match watch.observe(&snapshot, Instant::now()) {
                    LowBatteryAction::None => {}
                    LowBatteryAction::Armed => warn!(
                        "Low battery detected! SOC={}%, on battery power. \
                         Shutdown in {} seconds unless power restored.",
                        snapshot.state_of_charge, config.shutdown.delay_seconds
                    ),
                    LowBatteryAction::Counting { remaining_secs } => warn!(
                        "Low battery! SOC={}%, shutdown in {} seconds",
                        snapshot.state_of_charge, remaining_secs
                    ),
                    LowBatteryAction::Cancelled { power_restored } => info!(
                        "Shutdown cancelled: {}. SOC={}%",
                        if power_restored { "power restored" } else { "battery recovered" },
                        snapshot.state_of_charge
                    ),
                    LowBatteryAction::Fire => {
                        warn!(
                            "Shutdown delay elapsed. Initiating shutdown... (SOC={}%)",
                            snapshot.state_of_charge
                        );
                        execute_shutdown_script(&config.shutdown.script_path)?;
                        return Ok(());
                    }
                }
            }
            Err(e) => error!("{}", e),
        }

        // sleep in short steps so a signal or a new client is handled promptly
        while running.load(Ordering::SeqCst) && cycle_start.elapsed() < coordinator.poll_interval() {
            ipc.accept_clients(coordinator.latest().as_deref());
            thread::sleep(Duration::from_millis(200));
        }
    }

    info!("Monitoring stopped");
    Ok(())
}

/// Waits out the host's own shutdown before asking the HAT to cut power.
fn power_off_after_exit<B>(coordinator: &Arc<UpsCoordinator<B>>, delay_seconds: u64)
where
    B: RegisterBus + Send + 'static,
{
    info!("Power-off scheduled in {} seconds", delay_seconds);
    let coordinator = Arc::clone(coordinator);
    let task = DeferredShutdown::schedule(Duration::from_secs(delay_seconds), move || {
        // refresh first so the gate sees the current power source
        if let Err(e) = coordinator.refresh() {
            warn!("Refresh before power-off failed: {}", e);
        }
        match coordinator.shutdown() {
            Ok(outcome) => info!("Power-off: {:?}", outcome),
            Err(e) => error!("Power-off failed: {}", e),
        }
    });
    task.join();
}

fn summary(s: &TelemetrySnapshot) -> String {
    format!(
        "SOC={}%, BV={:.2}V, BA={}mA, VBUS={:.2}V, power={}, state={}, remaining={}",
        s.state_of_charge,
        s.battery_voltage,
        s.battery_current,
        s.charger_voltage,
        if s.is_on_battery() { "BATTERY" } else { "GRID" },
        s.state_str(),
        s.remaining_time_str()
    )
}
