use anyhow::{Context, Result};
use log::{warn, LevelFilter};
use serde::Deserialize;
use simplelog::{
    CombinedLogger, Config as LogConfig, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::fs::{self, File};
use std::path::Path;
use std::time::Duration;

use crate::charge_state::ClassificationStrategy;
use crate::coordinator::CoordinatorConfig;
use crate::registers::{DEFAULT_BUS_PATH, DEFAULT_DEVICE_ADDRESS};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ups-hat-e/config.toml";
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/ups-hat-e/ups.sock";

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
}

fn default_bus_path() -> String {
    DEFAULT_BUS_PATH.to_string()
}

fn default_address() -> u16 {
    DEFAULT_DEVICE_ADDRESS
}

fn default_poll_interval() -> u64 {
    30
}

#[derive(Deserialize, Debug, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_bus_path")]
    pub bus_path: String,
    #[serde(default = "default_address")]
    pub address: u16,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub strategy: ClassificationStrategy,
}

fn default_cancel_margin() -> u8 {
    5
}

#[derive(Deserialize, Debug, Clone)]
pub struct BatteryConfig {
    pub shutdown_threshold: u8,
    #[serde(default = "default_cancel_margin")]
    pub shutdown_cancel_margin: u8,
}

fn default_power_off_delay() -> u64 {
    15
}

#[derive(Deserialize, Debug, Clone)]
pub struct ShutdownConfig {
    pub script_path: String,
    pub delay_seconds: u64,
    /// Cut power through the HAT after the daemon is stopped by the host.
    #[serde(default)]
    pub power_off_on_exit: bool,
    #[serde(default = "default_power_off_delay")]
    pub power_off_delay_seconds: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct IpcConfig {
    pub socket_path: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            bus_path: default_bus_path(),
            address: default_address(),
            poll_interval_secs: default_poll_interval(),
            strategy: ClassificationStrategy::default(),
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        BatteryConfig {
            shutdown_threshold: 10,
            shutdown_cancel_margin: default_cancel_margin(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        ShutdownConfig {
            script_path: "/etc/ups-hat-e/shutdown.sh".to_string(),
            delay_seconds: 30,
            power_off_on_exit: false,
            power_off_delay_seconds: default_power_off_delay(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file_path: None,
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        IpcConfig {
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device: DeviceConfig::default(),
            battery: BatteryConfig::default(),
            shutdown: ShutdownConfig::default(),
            logging: LoggingConfig::default(),
            ipc: IpcConfig::default(),
        }
    }
}

impl DeviceConfig {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            device_address: self.address,
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            strategy: self.strategy,
        }
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {}", path))
    } else {
        warn!("Config file not found at {}, using defaults", path);
        Ok(Config::default())
    }
}

pub fn load_config_silent(path: &str) -> Config {
    if Path::new(path).exists() {
        if let Ok(content) = fs::read_to_string(path) {
            if let Ok(config) = toml::from_str(&content) {
                return config;
            }
        }
    }
    Config::default()
}

fn parse_log_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let level = parse_log_level(&config.level);
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![];

    // Terminal/journald logger
    loggers.push(TermLogger::new(
        level,
        LogConfig::default(),
        TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    ));

    if let Some(ref file_path) = config.file_path {
        if !file_path.is_empty() {
            if let Some(parent) = Path::new(file_path).parent() {
                fs::create_dir_all(parent)?;
            }
            let file = File::create(file_path)
                .with_context(|| format!("Failed to create log file: {}", file_path))?;
            loggers.push(WriteLogger::new(level, LogConfig::default(), file));
        }
    }

    CombinedLogger::init(loggers).context("Failed to initialize logger")?;
    Ok(())
}
