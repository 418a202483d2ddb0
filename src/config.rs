//! Configuration loading and validation
//!
//! Settings are merged from a YAML file and `SOLARLINK_`-prefixed environment
//! variables (double underscore separates nesting, e.g.
//! `SOLARLINK_API__API_KEY`). Option keys use explicit millisecond suffixes;
//! `Duration` accessors are provided for call sites.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};
use crate::registry::RegisterConfig;

/// Minimum accepted per-request transport timeout
pub const MIN_TIMEOUT_MS: u64 = 1_000;
/// Minimum accepted polling interval
pub const MIN_POLLING_INTERVAL_MS: u64 = 1_000;

/// Modbus framing and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusSettings {
    pub slave_address: u8,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for ModbusSettings {
    fn default() -> Self {
        Self {
            slave_address: 17,
            timeout_ms: 5_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
        }
    }
}

impl ModbusSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Polling-cycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    pub polling_interval_ms: u64,
    /// Addresses always polled, validated against the catalogue at load time
    pub minimum_registers: Vec<u16>,
    /// Memory-ring capacity per register
    pub max_samples_per_register: usize,
    /// Export-power setpoint register used by the self-test and the facade
    pub export_power_register: u16,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            polling_interval_ms: 10_000,
            minimum_registers: vec![0, 1],
            max_samples_per_register: 1_000,
            export_power_register: 8,
        }
    }
}

impl AcquisitionSettings {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

/// Retention-store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub enable_persistent_storage: bool,
    pub data_retention_days: u32,
    pub cleanup_interval_ms: u64,
    pub database_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enable_persistent_storage: true,
            data_retention_days: 30,
            cleanup_interval_ms: 24 * 60 * 60 * 1_000,
            database_path: "data/solarlink.db".to_string(),
        }
    }
}

impl StorageSettings {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

/// Gateway endpoints and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub api_key: String,
    pub read_endpoint: String,
    pub write_endpoint: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://20.15.114.131:8080".to_string(),
            api_key: String::new(),
            read_endpoint: "/api/inverter/read".to_string(),
            write_endpoint: "/api/inverter/write".to_string(),
        }
    }
}

/// Console-logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete settings tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub modbus: ModbusSettings,
    pub acquisition: AcquisitionSettings,
    pub storage: StorageSettings,
    pub api: ApiSettings,
    pub logging: LoggingSettings,
    /// Register catalogue keyed by decimal address
    pub registers: BTreeMap<String, RegisterConfig>,
}

impl Settings {
    /// Load and validate settings from a YAML file plus environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings: Settings = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("SOLARLINK_").split("__"))
            .extract()
            .map_err(|e| LinkError::config(format!("failed to load configuration: {e}")))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse the register section into an address-keyed map.
    pub fn register_map(&self) -> Result<BTreeMap<u16, RegisterConfig>> {
        let mut map = BTreeMap::new();
        for (key, config) in &self.registers {
            let address: u16 = key.parse().map_err(|_| {
                LinkError::config(format!("invalid register address key: {key:?}"))
            })?;
            let mut config = config.clone();
            config.address = address;
            map.insert(address, config);
        }
        Ok(map)
    }

    /// Validate the whole settings tree. Fatal at startup on failure.
    pub fn validate(&self) -> Result<()> {
        if self.api.api_key.is_empty() {
            return Err(LinkError::config("api.api_key is required"));
        }
        if self.api.base_url.is_empty() {
            return Err(LinkError::config("api.base_url is required"));
        }
        if self.modbus.timeout_ms < MIN_TIMEOUT_MS {
            return Err(LinkError::config(format!(
                "modbus.timeout_ms must be at least {MIN_TIMEOUT_MS} (got {})",
                self.modbus.timeout_ms
            )));
        }
        if self.modbus.max_retries == 0 {
            return Err(LinkError::config("modbus.max_retries must be at least 1"));
        }
        if self.acquisition.polling_interval_ms < MIN_POLLING_INTERVAL_MS {
            return Err(LinkError::config(format!(
                "acquisition.polling_interval_ms must be at least {MIN_POLLING_INTERVAL_MS} (got {})",
                self.acquisition.polling_interval_ms
            )));
        }

        let registers = self.register_map()?;
        for (address, config) in &registers {
            if config.gain < 0.0 {
                return Err(LinkError::config(format!(
                    "register {address} has negative gain {}",
                    config.gain
                )));
            }
        }
        for address in &self.acquisition.minimum_registers {
            if !registers.contains_key(address) {
                return Err(LinkError::config(format!(
                    "minimum register {address} is not present in the catalogue"
                )));
            }
        }

        Ok(())
    }
}
