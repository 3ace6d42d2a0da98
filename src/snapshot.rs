//! Sensor snapshot and link health files consumed by the protocol adapters

use crate::battery::BatteryMetrics;
use crate::codec::Reading;
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::persistence::StateFile;
use crate::session::LinkQualityReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tokio::time::Instant;

/// Link counts as online while readings arrive within this many cycles
pub const ONLINE_CYCLE_FACTOR: f64 = 1.5;

/// Time since the last accepted reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkHealth {
    pub last_update: DateTime<Utc>,
    pub elapsed_s: f64,
}

/// Tracks reading arrivals for link health
#[derive(Debug, Clone)]
pub struct LinkMonitor {
    last_reading: Instant,
    loss_counter: u64,
}

impl Default for LinkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkMonitor {
    /// Counting starts now, as if a reading had just arrived
    pub fn new() -> Self {
        Self {
            last_reading: Instant::now(),
            loss_counter: 0,
        }
    }

    /// A reading was accepted; `missed` packets were lost before it
    pub fn reading_accepted(&mut self, missed: u32) {
        self.last_reading = Instant::now();
        self.loss_counter += u64::from(missed);
    }

    pub fn elapsed_s(&self) -> f64 {
        self.last_reading.elapsed().as_secs_f64()
    }

    pub fn loss_counter(&self) -> u64 {
        self.loss_counter
    }

    pub fn is_online(&self, cycle_s: f64) -> bool {
        self.elapsed_s() < ONLINE_CYCLE_FACTOR * cycle_s
    }

    pub fn health(&self) -> LinkHealth {
        LinkHealth {
            last_update: Utc::now(),
            elapsed_s: self.elapsed_s(),
        }
    }
}

/// Key names the web UI and protocol adapters already read
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployedKeys {
    /// Same as `link_elapsed_s`
    pub comm_time: f64,
    /// Same as `accumulated_mah`
    pub consumo_mah: f64,
    pub bat_percent: f64,
    pub bat_days: f64,
}

/// Everything downstream consumers know about the endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub channel_1: u16,
    pub channel_2: u16,
    pub channel_3: u16,
    pub channel_4: u16,
    pub channel_5: u16,
    pub channel_6: u16,
    pub battery_voltage: f64,
    pub battery_current: f64,
    pub battery_avg_current: f64,
    pub accumulated_mah: f64,
    pub battery_percent: f64,
    pub battery_days: f64,
    pub sleep_reported_s: u16,
    pub link_elapsed_s: f64,
    pub online: bool,
    pub missed_packets: u32,
    pub loss_counter: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rssi_uplink: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rssi_downlink: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub snr_uplink: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub snr_downlink: Option<i16>,
    #[serde(flatten)]
    pub deployed: DeployedKeys,
    pub timestamp: DateTime<Utc>,
}

impl SensorSnapshot {
    /// Merge one cycle's results
    pub fn new(
        reading: &Reading,
        metrics: &BatteryMetrics,
        link_quality: Option<&LinkQualityReport>,
        missed_packets: u32,
        loss_counter: u64,
    ) -> Self {
        let [c1, c2, c3, c4, c5, c6] = reading.channels;
        let quality = link_quality.map(|report| report.quality);
        let accumulated_mah = round_to(metrics.accumulated_mah, 6);
        let percent = round_to(metrics.percent, 1);
        let days = round_to(metrics.days_remaining, 1);
        Self {
            channel_1: c1,
            channel_2: c2,
            channel_3: c3,
            channel_4: c4,
            channel_5: c5,
            channel_6: c6,
            battery_voltage: round_to(metrics.voltage_v, 2),
            battery_current: round_to(metrics.active_current_ma, 1),
            battery_avg_current: round_to(metrics.cycle_average_current_ma, 2),
            accumulated_mah,
            battery_percent: percent,
            battery_days: days,
            sleep_reported_s: reading.sleep_reported_s,
            link_elapsed_s: 0.0,
            online: true,
            missed_packets,
            loss_counter,
            rssi_uplink: quality.map(|q| q.rssi_uplink),
            rssi_downlink: quality.map(|q| q.rssi_downlink),
            snr_uplink: quality.map(|q| q.snr_uplink),
            snr_downlink: quality.map(|q| q.snr_downlink),
            deployed: DeployedKeys {
                comm_time: 0.0,
                consumo_mah: accumulated_mah,
                bat_percent: percent,
                bat_days: days,
            },
            timestamp: Utc::now(),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Writes the snapshot and link files
pub struct SnapshotPublisher {
    snapshot: StateFile<SensorSnapshot>,
    health: StateFile<LinkHealth>,
    link_quality: StateFile<LinkQualityReport>,
    last: Option<SensorSnapshot>,
    logger: StructuredLogger,
}

impl SnapshotPublisher {
    pub fn new<P: Into<PathBuf>>(snapshot: P, health: P, link_quality: P) -> Self {
        Self {
            snapshot: StateFile::new(snapshot),
            health: StateFile::new(health),
            link_quality: StateFile::new(link_quality),
            last: None,
            logger: get_logger("snapshot"),
        }
    }

    pub fn last(&self) -> Option<&SensorSnapshot> {
        self.last.as_ref()
    }

    /// Persist a new snapshot; it stays current even if the write fails
    pub fn publish(&mut self, snapshot: SensorSnapshot) -> Result<()> {
        let result = self.snapshot.save(&snapshot);
        self.last = Some(snapshot);
        result
    }

    pub fn publish_health(&self, health: &LinkHealth) -> Result<()> {
        self.health.save(health)
    }

    pub fn publish_link_quality(&self, report: &LinkQualityReport) -> Result<()> {
        self.link_quality.save(report)
    }

    /// Last snapshot with current link fields, as seen by the alarms
    pub fn current_view(&mut self, health: &LinkHealth, online: bool) -> Value {
        let Some(last) = self.last.as_mut() else {
            let elapsed = round_to(health.elapsed_s, 1);
            return serde_json::json!({
                "link_elapsed_s": elapsed,
                "comm_time": elapsed,
                "online": online,
            });
        };
        last.link_elapsed_s = round_to(health.elapsed_s, 1);
        last.deployed.comm_time = last.link_elapsed_s;
        last.online = online;
        match serde_json::to_value(&*last) {
            Ok(value) => value,
            Err(e) => {
                self.logger
                    .warn(&format!("Cannot serialize snapshot: {}", e));
                Value::Null
            }
        }
    }
}
