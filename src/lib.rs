//! Telemetry and power control for the Waveshare UPS HAT (E).
//!
//! The HAT's battery controller sits on I2C. Each refresh cycle reads its status,
//! charger, battery and cell registers, decodes the little-endian words, smooths the
//! noisy channels with a rolling median and publishes an immutable
//! [`TelemetrySnapshot`]. Power-off is only ever commanded while the HAT reports no
//! external power.
//!
//! ```rust,ignore
//! let bus = ups_hat_e::bus::LinuxI2cBus::new("/dev/i2c-1");
//! let ups = UpsCoordinator::new(bus, config.device.coordinator_config());
//! let snapshot = ups.refresh()?;
//! println!("{}% {}", snapshot.state_of_charge, snapshot.state_str());
//! ```

pub mod bus;
pub mod charge_state;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod monitor;
pub mod registers;
pub mod shutdown;
pub mod smoothing;
pub mod snapshot;
pub mod status;

pub use bus::RegisterBus;
pub use charge_state::{ChargeStatus, ClassificationStrategy, PowerState};
pub use coordinator::{CoordinatorConfig, UpsCoordinator};
pub use error::{Error, UpdateFailed};
pub use shutdown::{ShutdownGate, ShutdownOutcome};
pub use snapshot::TelemetrySnapshot;
