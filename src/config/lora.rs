//! Runtime JSON inputs written by the configuration UI
//!
//! These files change while the gateway runs. A read failure is reported
//! as [`GatewayError::Config`] so the caller can keep the last-known value.

use crate::battery::DutyCycle;
use crate::codec::RadioParams;
use crate::error::{GatewayError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Logical cycle used for loss detection when the endpoint never sleeps
const ALWAYS_AWAKE_CYCLE_S: f64 = 2.0;

/// LoRaWAN-style operating class of the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingClass {
    /// Duty-cycled: sleeps between wake windows
    A,
    /// Continuously listening
    C,
}

impl OperatingClass {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "A" => OperatingClass::A,
            _ => OperatingClass::C,
        }
    }

    /// Byte sent in the mode/class frame
    pub fn code(self) -> u8 {
        match self {
            OperatingClass::A => 0x00,
            OperatingClass::C => 0x02,
        }
    }
}

/// Radio link settings as edited in the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraSettings {
    /// "A" or "C"
    #[serde(alias = "classe")]
    pub class: String,
    /// Receive window after wake-up: "5s", "10s" or "15s"
    #[serde(alias = "janela")]
    pub window: String,
    /// Transmit power (dBm)
    pub power: u8,
    /// "125kHz", "250kHz" or "500kHz"
    pub bandwidth: String,
    /// 7 to 12
    pub spreading_factor: u8,
    /// "4/5" to "4/8"
    pub coding_rate: String,
    /// Seconds between endpoint wake-ups
    pub wake_interval: u32,
}

impl Default for LoraSettings {
    fn default() -> Self {
        Self {
            class: "C".to_string(),
            window: "5s".to_string(),
            power: 20,
            bandwidth: "125kHz".to_string(),
            spreading_factor: 7,
            coding_rate: "4/5".to_string(),
            wake_interval: 30,
        }
    }
}

impl LoraSettings {
    /// Read the settings file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path.as_ref())
    }

    pub fn operating_class(&self) -> OperatingClass {
        OperatingClass::parse(&self.class)
    }

    /// Wake window in seconds; unparsable values fall back to 5
    pub fn window_seconds(&self) -> f64 {
        self.window
            .trim()
            .trim_end_matches(['s', 'S'])
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(5.0)
    }

    fn window_code(&self) -> u8 {
        match self.window.trim() {
            "10s" => 0x01,
            "15s" => 0x02,
            _ => 0x00,
        }
    }

    fn bandwidth_code(&self) -> u8 {
        match self.bandwidth.trim() {
            "250kHz" => 0x01,
            "500kHz" => 0x02,
            _ => 0x00,
        }
    }

    fn coding_rate_code(&self) -> u8 {
        match self.coding_rate.trim() {
            "4/6" => 0x02,
            "4/7" => 0x03,
            "4/8" => 0x04,
            _ => 0x01,
        }
    }

    /// Wire bytes for the configuration-apply sequence
    pub fn radio_params(&self) -> RadioParams {
        let class = self.operating_class();
        let spreading_factor = if (7..=12).contains(&self.spreading_factor) {
            self.spreading_factor
        } else {
            7
        };
        // Class C never sleeps; class A wake interval must fit one byte
        let wake_s = match class {
            OperatingClass::C => 0,
            OperatingClass::A => self.wake_interval.clamp(5, 255) as u8,
        };

        RadioParams {
            power: self.power,
            bandwidth: self.bandwidth_code(),
            spreading_factor,
            coding_rate: self.coding_rate_code(),
            class: class.code(),
            window_code: self.window_code(),
            window_s: self.window_seconds().min(255.0) as u8,
            wake_s,
        }
    }

    /// Time base for energy accounting and loss detection
    pub fn duty_cycle(&self) -> DutyCycle {
        match self.operating_class() {
            OperatingClass::C => DutyCycle {
                always_awake: true,
                cycle_s: ALWAYS_AWAKE_CYCLE_S,
                wake_window_s: self.window_seconds(),
            },
            OperatingClass::A => DutyCycle {
                always_awake: false,
                cycle_s: f64::from(self.wake_interval),
                wake_window_s: self.window_seconds(),
            },
        }
    }
}

/// Battery settings as edited in the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatterySettings {
    /// Rated capacity (mAh)
    pub capacity_mah: f64,
}

impl BatterySettings {
    /// Read the settings file; a non-positive capacity is rejected
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings: Self = read_json(path.as_ref())?;
        if !settings.capacity_mah.is_finite() || settings.capacity_mah <= 0.0 {
            return Err(GatewayError::validation(
                "capacity_mah",
                "Must be a positive number",
            ));
        }
        Ok(settings)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::config(format!("Cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&contents)
        .map_err(|e| GatewayError::config(format!("Malformed {}: {}", path.display(), e)))
}
