//! Site configuration
//!
//! Loaded from YAML (or JSON) through figment, with `POLLSRV_` environment
//! overrides. Nested keys use a double underscore:
//! `POLLSRV_POLLING__INTERVAL_MS=1000`.

use errors::{config_error, invalid_config, GatewayResult};
use figment::{
    providers::{Env, Format, Json, Yaml},
    Figment,
};
use modbus_driver::{
    DecoderKind, EngineConfig, Parity, ScaleFactorPolicy, SerialParams, MAX_READ_REGISTERS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "POLLSRV_";

/// Owner and place of the site, copied into every telemetry record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInfo {
    pub tenant: String,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Per-transaction timeout for TCP devices
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_window")]
    pub max_window: u16,
    /// Consecutive failed cycles before a device is retired
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    #[serde(default)]
    pub decoder: DecoderKind,
    #[serde(default)]
    pub scale_factor_policy: ScaleFactorPolicy,
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_max_window() -> u16 {
    modbus_driver::DEFAULT_MAX_WINDOW
}

fn default_max_errors() -> u32 {
    10
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            max_window: default_max_window(),
            max_errors: default_max_errors(),
            decoder: DecoderKind::default(),
            scale_factor_policy: ScaleFactorPolicy::default(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_window: self.max_window,
            scale_factor_policy: self.scale_factor_policy,
        }
    }
}

/// The RS-485 line shared by every RTU device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_serial_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_serial_timeout_ms() -> u64 {
    5000
}

impl SerialConfig {
    pub fn params(&self) -> SerialParams {
        SerialParams {
            device: self.device.clone(),
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[serde(alias = "TCP")]
    Tcp,
    #[serde(alias = "RTU")]
    Rtu,
}

/// Point names polled each cycle, per register type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointSelection {
    #[serde(default)]
    pub input_registers: Vec<String>,
    #[serde(default)]
    pub holding_registers: Vec<String>,
}

impl PointSelection {
    pub fn is_empty(&self) -> bool {
        self.input_registers.is_empty() && self.holding_registers.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub serial_number: String,
    pub model: String,
    #[serde(default)]
    pub manufacturer: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    /// Driver document, relative paths resolved against the config file
    pub driver: PathBuf,
    #[serde(default)]
    pub points: PointSelection,
}

fn default_port() -> u16 {
    modbus_driver::transport::tcp::DEFAULT_PORT
}

fn default_slave_id() -> u8 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub site: SiteInfo,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub serial: Option<SerialConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl SiteConfig {
    /// Load `path` (`.json` or YAML) and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(config_error!("config file not found: {}", path.display()));
        }

        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Figment::new().merge(Json::file(path)),
            _ => Figment::new().merge(Yaml::file(path)),
        };
        let mut config: SiteConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        if let Some(base) = path.parent() {
            config.resolve_driver_paths(base);
        }
        debug!(
            "Config: {} devices from {}",
            config.devices.len(),
            path.display()
        );
        Ok(config)
    }

    /// Make relative driver paths relative to `base`
    pub fn resolve_driver_paths(&mut self, base: &Path) {
        for device in &mut self.devices {
            if device.driver.is_relative() {
                device.driver = base.join(&device.driver);
            }
        }
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.devices.is_empty() {
            return Err(config_error!("no devices configured"));
        }
        if self.polling.interval_ms == 0 {
            return Err(invalid_config!("polling.interval_ms", "must be non-zero"));
        }
        if self.polling.max_window == 0 || self.polling.max_window > MAX_READ_REGISTERS {
            return Err(invalid_config!(
                "polling.max_window",
                "{} outside 1..={}",
                self.polling.max_window,
                MAX_READ_REGISTERS
            ));
        }
        if self.polling.max_errors == 0 {
            return Err(invalid_config!("polling.max_errors", "must be non-zero"));
        }

        let mut serials = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            let field = format!("devices[{}]", i);
            if device.serial_number.is_empty() {
                return Err(invalid_config!(field, "serial_number is empty"));
            }
            if !serials.insert(device.serial_number.as_str()) {
                return Err(invalid_config!(
                    field,
                    "duplicate serial_number {}",
                    device.serial_number
                ));
            }
            match device.protocol {
                Protocol::Tcp => {
                    if device.host.as_deref().map_or(true, str::is_empty) {
                        return Err(invalid_config!(field, "TCP device needs a host"));
                    }
                },
                Protocol::Rtu => {
                    if self.serial.is_none() {
                        return Err(invalid_config!(
                            field,
                            "RTU device needs a serial section"
                        ));
                    }
                },
            }
        }
        Ok(())
    }

    pub fn has_rtu_devices(&self) -> bool {
        self.devices.iter().any(|d| d.protocol == Protocol::Rtu)
    }
}
