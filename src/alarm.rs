//! Threshold alarms driving relay outputs
//!
//! Rules come from a JSON table keyed by relay name and are reloaded when
//! the file's modification time changes. Relay status only flips when a
//! value crosses its limit; the status map is persisted whenever it changes.

use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::persistence::StateFile;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Number of relays on the output board
pub const RELAY_COUNT: usize = 9;

/// Persisted relay status, keyed by relay name
pub type AlarmStatus = BTreeMap<String, bool>;

/// Comparison applied to the source value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmMode {
    #[default]
    #[serde(alias = "high")]
    Above,
    #[serde(alias = "low")]
    Below,
}

/// One relay's rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmRule {
    /// Snapshot field to watch; empty disables the relay
    pub source: String,
    #[serde(alias = "limit_real")]
    pub limit: Option<f64>,
    #[serde(rename = "type")]
    pub mode: AlarmMode,
    #[serde(alias = "alarm_name")]
    pub name: Option<String>,
    /// Distance past the limit needed to release an active alarm
    pub hysteresis: f64,
}

impl AlarmRule {
    fn is_configured(&self) -> bool {
        !self.source.trim().is_empty() && self.limit.is_some()
    }

    /// Next status for `value` given the current one
    pub fn next_status(&self, active: bool, value: f64) -> bool {
        let Some(limit) = self.limit else {
            return false;
        };
        let band = self.hysteresis.max(0.0);
        match (self.mode, active) {
            (AlarmMode::Above, false) => value >= limit,
            (AlarmMode::Above, true) => value >= limit - band,
            (AlarmMode::Below, false) => value <= limit,
            (AlarmMode::Below, true) => value <= limit + band,
        }
    }
}

/// Physical side of the relays
pub trait RelayOutput: Send {
    fn set(&mut self, relay: &str, on: bool) -> Result<()>;
}

/// Output that only records flips in the log
pub struct LoggingRelays {
    logger: StructuredLogger,
}

impl Default for LoggingRelays {
    fn default() -> Self {
        Self {
            logger: get_logger("relay"),
        }
    }
}

impl RelayOutput for LoggingRelays {
    fn set(&mut self, relay: &str, on: bool) -> Result<()> {
        self.logger
            .info(&format!("{} -> {}", relay, if on { "ON" } else { "OFF" }));
        Ok(())
    }
}

/// Result of one evaluation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmOutcome {
    /// Relays whose status flipped, with their new status
    pub changed: Vec<(String, bool)>,
    /// Status differs from what was last persisted
    pub dirty: bool,
}

pub fn default_status() -> AlarmStatus {
    (1..=RELAY_COUNT)
        .map(|i| (format!("relay_{}", i), false))
        .collect()
}

pub struct AlarmEvaluator {
    rules_path: PathBuf,
    rules: BTreeMap<String, AlarmRule>,
    rules_mtime: Option<SystemTime>,
    status: AlarmStatus,
    store: StateFile<AlarmStatus>,
    output: Box<dyn RelayOutput>,
    logger: StructuredLogger,
}

impl AlarmEvaluator {
    /// Load persisted status and drive every relay to it
    pub fn new<P: Into<PathBuf>>(
        rules_path: P,
        store: StateFile<AlarmStatus>,
        mut output: Box<dyn RelayOutput>,
    ) -> Self {
        let logger = get_logger("alarm");
        let mut status = match store.load() {
            Ok(Some(status)) => status,
            Ok(None) => default_status(),
            Err(e) => {
                logger.warn(&format!("Alarm status unavailable: {}", e));
                default_status()
            }
        };
        for relay in default_status().into_keys() {
            status.entry(relay).or_insert(false);
        }

        for (relay, on) in &status {
            if let Err(e) = output.set(relay, *on) {
                logger.warn(&format!("Cannot drive {}: {}", relay, e));
            }
        }

        Self {
            rules_path: rules_path.into(),
            rules: BTreeMap::new(),
            rules_mtime: None,
            status,
            store,
            output,
            logger,
        }
    }

    pub fn status(&self) -> &AlarmStatus {
        &self.status
    }

    pub fn rules(&self) -> &BTreeMap<String, AlarmRule> {
        &self.rules
    }

    fn reload_if_changed(&mut self) {
        let Some(mtime) = modified(&self.rules_path) else {
            return;
        };
        if self.rules_mtime == Some(mtime) {
            return;
        }
        self.rules_mtime = Some(mtime);

        match read_rules(&self.rules_path) {
            Ok(rules) => {
                self.logger
                    .info(&format!("Loaded {} alarm rules", rules.len()));
                self.rules = rules;
            }
            Err(e) => self
                .logger
                .warn(&format!("Keeping previous alarm rules: {}", e)),
        }
    }

    /// Evaluate every relay against `data`
    pub fn evaluate(&mut self, data: &Value) -> AlarmOutcome {
        self.reload_if_changed();

        let mut outcome = AlarmOutcome::default();
        let relays: Vec<String> = self.status.keys().cloned().collect();

        for relay in relays {
            let current = self.status.get(&relay).copied().unwrap_or(false);
            let next = match self.rules.get(&relay) {
                Some(rule) if rule.is_configured() => {
                    let Some(value) = numeric_field(data, &rule.source) else {
                        continue;
                    };
                    let next = rule.next_status(current, value);
                    if next != current {
                        self.logger.info(&format!(
                            "{} ({}) {} at {} {} limit {}",
                            relay,
                            rule.name
                                .as_deref()
                                .filter(|n| !n.is_empty())
                                .unwrap_or(&rule.source),
                            if next { "triggered" } else { "cleared" },
                            value,
                            match rule.mode {
                                AlarmMode::Above => ">=",
                                AlarmMode::Below => "<=",
                            },
                            rule.limit.unwrap_or_default()
                        ));
                    }
                    next
                }
                _ => false,
            };

            if next != current {
                self.status.insert(relay.clone(), next);
                if let Err(e) = self.output.set(&relay, next) {
                    self.logger.warn(&format!("Cannot drive {}: {}", relay, e));
                }
                outcome.changed.push((relay, next));
                outcome.dirty = true;
            }
        }

        if outcome.dirty
            && let Err(e) = self.store.save(&self.status)
        {
            self.logger.warn(&format!("Alarm status not persisted: {}", e));
        }

        outcome
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read_rules(path: &Path) -> Result<BTreeMap<String, AlarmRule>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn numeric_field(data: &Value, field: &str) -> Option<f64> {
    match data.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
