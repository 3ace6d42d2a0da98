//! Configuration management for the gateway
//!
//! Process configuration comes from a YAML file (serial line, timing,
//! battery model constants, file locations, logging). The radio settings
//! and battery capacity are JSON files owned by the configuration UI and
//! are re-read on every loop iteration, see [`lora`].

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod defaults;
pub mod lora;

pub use lora::{BatterySettings, LoraSettings, OperatingClass};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial line to the radio modem
    pub serial: SerialConfig,

    /// Radio-link protocol timing and retries
    pub link: LinkConfig,

    /// Battery model constants
    pub battery: BatteryModelConfig,

    /// Files read and written by the gateway
    pub paths: PathsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Outer loop tick in milliseconds
    pub poll_interval_ms: u64,

    /// Pause after an unexpected failure before retrying
    pub error_cooldown_ms: u64,
}

/// Serial port parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path of the modem
    pub port: String,

    /// Baud rate (8N1)
    pub baud_rate: u32,

    /// Delay after opening before the first command
    pub open_settle_ms: u64,
}

/// Radio-link protocol parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Id of the remote endpoint
    pub slave_id: u16,

    /// Deadline for the ADC response
    pub response_timeout_ms: u64,

    /// Longest single wait for serial readiness while awaiting a frame
    pub read_poll_ms: u64,

    /// Deadline for the link-quality response
    pub link_quality_timeout_ms: u64,

    /// Bytes the modem appends after the ADC response
    pub frame_trailer_bytes: usize,

    /// Pause after a cycle without a reading
    pub timeout_cooldown_ms: u64,

    /// Pause before the configuration-apply sequence
    pub config_pre_apply_ms: u64,

    /// Settle delay after the sleep/window and mode/class frames
    pub config_settle_ms: u64,

    /// Wait for acknowledgement bytes after each radio-parameter frame
    pub radio_ack_wait_ms: u64,

    /// Attempts for the radio-parameter frame
    pub radio_retries: u32,
}

/// Constants of the coulomb-counting model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryModelConfig {
    /// Deep-sleep current draw of the endpoint (mA)
    pub sleep_current_ma: f64,

    /// Awake time added to the configured wake window (s)
    pub active_overhead_s: f64,

    /// Longer intervals are treated as clock jumps and not integrated (s)
    pub max_interval_s: f64,

    /// Capacity used until the battery settings file provides one (mAh)
    pub default_capacity_mah: f64,
}

/// Locations of every file the gateway touches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// LoRa radio settings (JSON, read-only)
    pub lora_settings: PathBuf,

    /// Battery settings (JSON, read-only)
    pub battery_settings: PathBuf,

    /// Alarm rule table (JSON, read-only)
    pub alarm_rules: PathBuf,

    /// Presence requests a radio reconfiguration
    pub reconfig_flag: PathBuf,

    /// Presence requests a battery accumulator reset
    pub battery_reset_flag: PathBuf,

    /// Published sensor snapshot
    pub snapshot: PathBuf,

    /// Persisted battery accumulator
    pub battery_state: PathBuf,

    /// Persisted relay status
    pub alarm_status: PathBuf,

    /// Seconds since the last accepted reading
    pub link_health: PathBuf,

    /// Last link-quality report
    pub link_quality: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Console-specific level, falls back to `level`
    pub console_level: Option<String>,

    /// File-specific level, falls back to `level`
    pub file_level: Option<String>,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl LinkConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }

    pub fn link_quality_timeout(&self) -> Duration {
        Duration::from_millis(self.link_quality_timeout_ms)
    }

    pub fn timeout_cooldown(&self) -> Duration {
        Duration::from_millis(self.timeout_cooldown_ms)
    }
}

impl PathsConfig {
    /// Every file placed directly under `dir`
    pub fn under<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            lora_settings: dir.join("config_lora.json"),
            battery_settings: dir.join("config_battery.json"),
            alarm_rules: dir.join("config_alarms.json"),
            reconfig_flag: dir.join("reconfig.flag"),
            battery_reset_flag: dir.join("reset_battery.flag"),
            snapshot: dir.join("sensor_snapshot.json"),
            battery_state: dir.join("battery_state.json"),
            alarm_status: dir.join("alarm_status.json"),
            link_health: dir.join("link_health.json"),
            link_quality: dir.join("link_quality.json"),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first location that exists
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os("LORAGATE_CONFIG") {
            return Self::from_file(path);
        }

        let default_paths = [
            "loragate.yaml",
            "/data/loragate.yaml",
            "/etc/loragate/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(GatewayError::validation(
                "serial.port",
                "Port path cannot be empty",
            ));
        }

        if self.serial.baud_rate == 0 {
            return Err(GatewayError::validation(
                "serial.baud_rate",
                "Must be greater than 0",
            ));
        }

        if self.link.response_timeout_ms == 0 || self.link.read_poll_ms == 0 {
            return Err(GatewayError::validation(
                "link.response_timeout_ms",
                "Timeouts must be greater than 0",
            ));
        }

        if self.link.link_quality_timeout_ms >= self.link.response_timeout_ms {
            return Err(GatewayError::validation(
                "link.link_quality_timeout_ms",
                "Must be shorter than the response timeout",
            ));
        }

        if self.link.radio_retries == 0 {
            return Err(GatewayError::validation(
                "link.radio_retries",
                "At least one attempt is required",
            ));
        }

        if self.battery.sleep_current_ma < 0.0 || self.battery.default_capacity_mah <= 0.0 {
            return Err(GatewayError::validation(
                "battery",
                "Sleep current must be non-negative and capacity positive",
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(GatewayError::validation(
                "poll_interval_ms",
                "Must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial.port, "/dev/serial0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.link.slave_id, 1);
        assert_eq!(config.link.response_timeout_ms, 2000);
        assert_eq!(config.poll_interval_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.serial.port = String::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.link.link_quality_timeout_ms = config.link.response_timeout_ms;
        assert!(config.validate().is_err());

        config = Config::default();
        config.link.radio_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "serial:\n  port: /dev/ttyUSB1\nlink:\n  slave_id: 7\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB1");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.link.slave_id, 7);
        assert_eq!(config.link.radio_retries, 3);
    }

    #[test]
    fn paths_under_directory() {
        let paths = PathsConfig::under("/tmp/gw");
        assert_eq!(paths.snapshot, PathBuf::from("/tmp/gw/sensor_snapshot.json"));
        assert_eq!(paths.reconfig_flag, PathBuf::from("/tmp/gw/reconfig.flag"));
    }
}
