//! Polling loop tying the components together
//!
//! Each iteration refreshes link health, picks up external requests and
//! configuration edits, re-evaluates alarms, then runs one command cycle.
//! A reading flows through the battery model into a new snapshot and
//! another alarm pass.

use crate::alarm::{AlarmEvaluator, LoggingRelays, RelayOutput};
use crate::battery::EnergyAccountant;
use crate::config::{BatterySettings, Config, LoraSettings};
use crate::error::{GatewayError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::persistence::{FlagFile, StateFile};
use crate::session::{CommandSession, CycleReport};
use crate::snapshot::{LinkMonitor, SensorSnapshot, SnapshotPublisher};
use crate::transport::Transport;
use std::future::Future;
use tokio::time::{Duration, MissedTickBehavior, interval, sleep};

pub struct Gateway<T> {
    config: Config,
    session: CommandSession<T>,
    battery: EnergyAccountant,
    alarms: AlarmEvaluator,
    publisher: SnapshotPublisher,
    monitor: LinkMonitor,
    reconfig_flag: FlagFile,
    reset_flag: FlagFile,
    lora: LoraSettings,
    lora_error: Option<String>,
    battery_error: Option<String>,
    logger: StructuredLogger,
}

impl<T: Transport> Gateway<T> {
    /// Gateway whose relays only log
    pub fn new(config: Config, transport: T) -> Self {
        Self::with_relays(config, transport, Box::new(LoggingRelays::default()))
    }

    pub fn with_relays(config: Config, transport: T, relays: Box<dyn RelayOutput>) -> Self {
        let paths = &config.paths;
        let battery = EnergyAccountant::new(
            config.battery.clone(),
            StateFile::new(paths.battery_state.clone()),
        );
        let alarms = AlarmEvaluator::new(
            paths.alarm_rules.clone(),
            StateFile::new(paths.alarm_status.clone()),
            relays,
        );
        let publisher = SnapshotPublisher::new(
            paths.snapshot.clone(),
            paths.link_health.clone(),
            paths.link_quality.clone(),
        );
        let reconfig_flag = FlagFile::new(paths.reconfig_flag.clone());
        let reset_flag = FlagFile::new(paths.battery_reset_flag.clone());
        let session = CommandSession::new(transport, config.link.clone());
        let logger =
            get_logger_with_context(LogContext::new("gateway").with_slave_id(config.link.slave_id));

        let mut gateway = Self {
            config,
            session,
            battery,
            alarms,
            publisher,
            monitor: LinkMonitor::new(),
            reconfig_flag,
            reset_flag,
            lora: LoraSettings::default(),
            lora_error: None,
            battery_error: None,
            logger,
        };
        gateway.refresh_settings();
        gateway
    }

    pub fn session(&self) -> &CommandSession<T> {
        &self.session
    }

    pub fn battery(&self) -> &EnergyAccountant {
        &self.battery
    }

    pub fn alarms(&self) -> &AlarmEvaluator {
        &self.alarms
    }

    pub fn publisher(&self) -> &SnapshotPublisher {
        &self.publisher
    }

    pub fn monitor(&self) -> &LinkMonitor {
        &self.monitor
    }

    pub fn lora_settings(&self) -> &LoraSettings {
        &self.lora
    }

    /// Continue with a re-opened transport
    pub fn replace_transport(&mut self, transport: T) {
        self.session.replace_transport(transport);
    }

    /// Run until Ctrl-C or a fatal transport error
    pub async fn run(&mut self) -> Result<()> {
        let logger = self.logger.clone();
        self.run_until(shutdown_signal(tokio::signal::ctrl_c(), logger))
            .await
    }

    /// Run until `shutdown` completes or a fatal transport error
    pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) -> Result<()> {
        self.logger.info(&format!(
            "Starting polling loop on {} every {} ms",
            self.config.serial.port, self.config.poll_interval_ms
        ));

        let mut poll_interval = interval(Duration::from_millis(self.config.poll_interval_ms));
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    match self.run_iteration().await {
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => {
                            self.logger.error(&format!("Transport failed: {}", e));
                            return Err(e);
                        }
                        Err(e) => {
                            self.logger.error(&format!("Iteration failed: {}", e));
                            sleep(Duration::from_millis(self.config.error_cooldown_ms)).await;
                        }
                    }
                }
                _ = &mut shutdown => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// One pass of the loop; `Ok(None)` when the cycle produced no reading
    pub async fn run_iteration(&mut self) -> Result<Option<CycleReport>> {
        self.refresh_settings();

        match self.reconfig_flag.take() {
            Ok(true) => {
                self.logger
                    .info("Reconfiguration requested, applying after next reading");
                self.session.set_pending_config(self.lora.radio_params());
            }
            Ok(false) => {}
            Err(e) => self.logger.warn(&format!("Reconfiguration flag: {}", e)),
        }

        let cycle_s = self.lora.duty_cycle().cycle_s;
        let health = self.monitor.health();
        if let Err(e) = self.publisher.publish_health(&health) {
            self.logger.warn(&format!("Link health not persisted: {}", e));
        }
        let view = self
            .publisher
            .current_view(&health, self.monitor.is_online(cycle_s));
        self.alarms.evaluate(&view);

        match self.session.run_cycle(cycle_s).await {
            Ok(report) => {
                self.accept(&report);
                Ok(Some(report))
            }
            Err(GatewayError::Timeout { message }) => {
                self.logger.warn(&message);
                sleep(self.config.link.timeout_cooldown()).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn accept(&mut self, report: &CycleReport) {
        let reading = &report.reading;
        let missed = report.missed_packets();
        self.monitor.reading_accepted(missed);

        match self.reset_flag.take() {
            Ok(true) => self.battery.request_reset(),
            Ok(false) => {}
            Err(e) => self.logger.warn(&format!("Battery reset flag: {}", e)),
        }

        let metrics = self.battery.process(
            reading.bus_raw,
            reading.shunt_raw,
            reading.sleep_reported_s,
        );
        self.logger.info(&format!(
            "Reading from {}: sleep {}s, active {:.1}s / sleep {:.1}s, {:.2} V, {:.1} mA, {:.3} mAh, {:.1} days",
            reading.source_id,
            reading.sleep_reported_s,
            metrics.active_s,
            metrics.sleep_s,
            metrics.voltage_v,
            metrics.active_current_ma,
            metrics.accumulated_mah,
            metrics.days_remaining
        ));

        if let Some(link_quality) = &report.link_quality
            && let Err(e) = self.publisher.publish_link_quality(link_quality)
        {
            self.logger.warn(&format!("Link quality not persisted: {}", e));
        }

        let snapshot = SensorSnapshot::new(
            reading,
            &metrics,
            report.link_quality.as_ref(),
            missed,
            self.monitor.loss_counter(),
        );
        if let Err(e) = self.publisher.publish(snapshot) {
            self.logger.warn(&format!("Snapshot not persisted: {}", e));
        }

        let health = self.monitor.health();
        if let Err(e) = self.publisher.publish_health(&health) {
            self.logger.warn(&format!("Link health not persisted: {}", e));
        }
        let view = self.publisher.current_view(&health, true);
        self.alarms.evaluate(&view);
    }

    /// Re-read the UI-owned settings, keeping the last good values on error
    fn refresh_settings(&mut self) {
        match LoraSettings::from_file(&self.config.paths.lora_settings) {
            Ok(settings) => {
                if settings != self.lora {
                    self.logger
                        .info(&format!("LoRa settings loaded: {:?}", settings));
                    self.lora = settings;
                }
                self.lora_error = None;
            }
            Err(e) => report_once(&self.logger, &mut self.lora_error, e),
        }
        self.battery.set_duty_cycle(self.lora.duty_cycle());

        match BatterySettings::from_file(&self.config.paths.battery_settings) {
            Ok(settings) => {
                self.battery.set_capacity(settings.capacity_mah);
                self.battery_error = None;
            }
            Err(e) => report_once(&self.logger, &mut self.battery_error, e),
        }
    }
}

/// Resolve when `signal` fires; a handler that failed to install never does
async fn shutdown_signal<F>(signal: F, logger: StructuredLogger)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        logger.error(&format!("Cannot listen for Ctrl-C: {}", e));
        std::future::pending::<()>().await;
    }
}

// Warn only when the error differs from the previous one
fn report_once(logger: &StructuredLogger, last: &mut Option<String>, error: GatewayError) {
    let message = error.to_string();
    if last.as_deref() != Some(message.as_str()) {
        logger.warn(&format!("{}, keeping previous values", message));
        *last = Some(message);
    }
}
