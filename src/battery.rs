//! Coulomb-counting battery model for the remote endpoint
//!
//! The endpoint reports raw registers of its power monitor. Charge drawn
//! between two readings is integrated by splitting the elapsed wall-clock
//! time into an awake part, charged at the measured current, and a sleeping
//! part, charged at the fixed deep-sleep current. The running total is
//! persisted after every reading so a restart resumes from it.

use crate::config::BatteryModelConfig;
use crate::logging::{StructuredLogger, get_logger};
use crate::persistence::StateFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Volts per bus-voltage LSB
pub const BUS_LSB_V: f64 = 0.00125;
/// Volts per shunt-voltage LSB
pub const SHUNT_LSB_V: f64 = 0.0000025;
/// Shunt resistor (ohm)
pub const SHUNT_RESISTANCE_OHM: f64 = 0.02;
/// Reported when the drain is too small to estimate
pub const DAYS_SENTINEL: f64 = 999.0;

/// Time base of the endpoint's sleep/wake behaviour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DutyCycle {
    /// The endpoint never sleeps
    pub always_awake: bool,
    /// Expected seconds between two transmissions
    pub cycle_s: f64,
    /// Configured receive window after each wake-up
    pub wake_window_s: f64,
}

impl Default for DutyCycle {
    fn default() -> Self {
        Self {
            always_awake: true,
            cycle_s: 2.0,
            wake_window_s: 5.0,
        }
    }
}

/// Persisted accumulator plus the last published values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryState {
    pub accumulated_mah: f64,
    pub capacity_mah: f64,
    pub last_update: Option<DateTime<Utc>>,
    pub voltage_v: f64,
    pub current_ma: f64,
    pub percent: f64,
    pub days_remaining: f64,
}

impl Default for BatteryState {
    fn default() -> Self {
        Self {
            accumulated_mah: 0.0,
            capacity_mah: 3000.0,
            last_update: None,
            voltage_v: 0.0,
            current_ma: 0.0,
            percent: 100.0,
            days_remaining: DAYS_SENTINEL,
        }
    }
}

/// Everything derived from one reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatteryMetrics {
    pub voltage_v: f64,
    /// Current measured while awake
    pub active_current_ma: f64,
    /// Time-weighted over the integrated interval
    pub average_current_ma: f64,
    /// Duty-cycle model average from the reported sleep time
    pub cycle_average_current_ma: f64,
    pub active_s: f64,
    pub sleep_s: f64,
    pub accumulated_mah: f64,
    pub percent: f64,
    pub days_remaining: f64,
}

/// Bus register to volts
pub fn bus_voltage(bus_raw: u16) -> f64 {
    f64::from(bus_raw) * BUS_LSB_V
}

/// Shunt register to milliamps
pub fn shunt_current_ma(shunt_raw: i16) -> f64 {
    f64::from(shunt_raw) * SHUNT_LSB_V / SHUNT_RESISTANCE_OHM * 1000.0
}

/// Percentage of capacity left, clamped to 0..=100
pub fn percent_remaining(capacity_mah: f64, accumulated_mah: f64) -> f64 {
    if capacity_mah <= 0.0 {
        return 0.0;
    }
    ((capacity_mah - accumulated_mah) / capacity_mah * 100.0).clamp(0.0, 100.0)
}

/// Days until empty at `average_current_ma`
pub fn days_remaining(capacity_mah: f64, accumulated_mah: f64, average_current_ma: f64) -> f64 {
    let remaining = capacity_mah - accumulated_mah;
    if remaining <= 0.0 {
        0.0
    } else if average_current_ma > 1e-9 {
        remaining / average_current_ma / 24.0
    } else {
        DAYS_SENTINEL
    }
}

/// Average current over one transmit cycle.
///
/// When the configured cycle is longer than the reported sleep the rest of
/// the cycle is awake time; otherwise the endpoint slept for the whole
/// reported time and was awake for one wake window on top of it.
pub fn cycle_average_current(
    active_current_ma: f64,
    sleep_current_ma: f64,
    reported_sleep_s: f64,
    duty: &DutyCycle,
) -> f64 {
    let (active_s, cycle_s) = if duty.cycle_s > reported_sleep_s {
        (duty.cycle_s - reported_sleep_s, duty.cycle_s)
    } else {
        (duty.wake_window_s, reported_sleep_s + duty.wake_window_s)
    };
    if cycle_s <= 0.0 {
        return active_current_ma;
    }
    (active_current_ma * active_s + sleep_current_ma * (cycle_s - active_s)) / cycle_s
}

/// Owner of the battery accumulator
pub struct EnergyAccountant {
    model: BatteryModelConfig,
    duty: DutyCycle,
    state: BatteryState,
    store: StateFile<BatteryState>,
    reset_pending: bool,
    logger: StructuredLogger,
}

impl EnergyAccountant {
    /// Resume from the persisted record, or start empty
    pub fn new(model: BatteryModelConfig, store: StateFile<BatteryState>) -> Self {
        let logger = get_logger("battery");
        let state = match store.load() {
            Ok(Some(state)) => {
                logger.info(&format!(
                    "Resuming from {:.3} mAh consumed of {:.0} mAh",
                    state.accumulated_mah, state.capacity_mah
                ));
                state
            }
            Ok(None) => BatteryState {
                capacity_mah: model.default_capacity_mah,
                ..BatteryState::default()
            },
            Err(e) => {
                logger.warn(&format!("Battery state unavailable, starting empty: {}", e));
                BatteryState {
                    capacity_mah: model.default_capacity_mah,
                    ..BatteryState::default()
                }
            }
        };

        Self {
            model,
            duty: DutyCycle::default(),
            state,
            store,
            reset_pending: false,
            logger,
        }
    }

    pub fn state(&self) -> &BatteryState {
        &self.state
    }

    pub fn duty_cycle(&self) -> DutyCycle {
        self.duty
    }

    /// New rated capacity; the accumulated charge is kept as is
    pub fn set_capacity(&mut self, capacity_mah: f64) {
        if capacity_mah > 0.0 && (capacity_mah - self.state.capacity_mah).abs() > f64::EPSILON {
            self.logger.info(&format!(
                "Capacity changed {:.0} -> {:.0} mAh",
                self.state.capacity_mah, capacity_mah
            ));
            self.state.capacity_mah = capacity_mah;
        }
    }

    pub fn set_duty_cycle(&mut self, duty: DutyCycle) {
        self.duty = duty;
    }

    /// Zero the accumulator on the next processed reading
    pub fn request_reset(&mut self) {
        self.reset_pending = true;
    }

    pub fn process(&mut self, bus_raw: u16, shunt_raw: i16, reported_sleep_s: u16) -> BatteryMetrics {
        self.process_at(bus_raw, shunt_raw, reported_sleep_s, Utc::now())
    }

    /// Integrate one reading taken at `now`
    pub fn process_at(
        &mut self,
        bus_raw: u16,
        shunt_raw: i16,
        reported_sleep_s: u16,
        now: DateTime<Utc>,
    ) -> BatteryMetrics {
        let voltage_v = bus_voltage(bus_raw);
        let active_current_ma = shunt_current_ma(shunt_raw);
        // A negative reading never gives charge back
        let drain_ma = active_current_ma.max(0.0);
        let sleep_ma = self.model.sleep_current_ma;

        let mut dt_total = self
            .state
            .last_update
            .map(|last| (now - last).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        if !(0.0..=self.model.max_interval_s).contains(&dt_total) {
            self.logger.warn(&format!(
                "Discarding implausible interval of {:.1}s",
                dt_total
            ));
            dt_total = 0.0;
        }

        if self.reset_pending {
            self.reset_pending = false;
            self.logger.info("Battery accumulator reset");
            self.state.accumulated_mah = 0.0;
            dt_total = 0.0;
        }

        let ceiling = if self.duty.always_awake {
            dt_total
        } else {
            self.duty.wake_window_s + self.model.active_overhead_s
        };
        let active_s = dt_total.min(ceiling);
        let sleep_s = (dt_total - active_s).max(0.0);

        self.state.accumulated_mah += drain_ma * active_s / 3600.0 + sleep_ma * sleep_s / 3600.0;
        self.state.last_update = Some(now);

        let average_current_ma = if dt_total > 0.0 {
            (drain_ma * active_s + sleep_ma * sleep_s) / dt_total
        } else {
            sleep_ma
        };
        let cycle_average_current_ma = cycle_average_current(
            drain_ma,
            sleep_ma,
            f64::from(reported_sleep_s),
            &self.duty,
        );

        let capacity = self.state.capacity_mah;
        let accumulated = self.state.accumulated_mah;
        let metrics = BatteryMetrics {
            voltage_v,
            active_current_ma,
            average_current_ma,
            cycle_average_current_ma,
            active_s,
            sleep_s,
            accumulated_mah: accumulated,
            percent: percent_remaining(capacity, accumulated),
            days_remaining: days_remaining(capacity, accumulated, average_current_ma),
        };

        self.state.voltage_v = voltage_v;
        self.state.current_ma = active_current_ma;
        self.state.percent = metrics.percent;
        self.state.days_remaining = metrics.days_remaining;

        if let Err(e) = self.store.save(&self.state) {
            self.logger
                .warn(&format!("Battery state not persisted: {}", e));
        }

        self.logger.debug(&format!(
            "active {:.1}s sleep {:.1}s, {:.2} V {:.1} mA, {:.4} mAh, {:.1} days",
            active_s, sleep_s, voltage_v, active_current_ma, accumulated, metrics.days_remaining
        ));

        metrics
    }
}
