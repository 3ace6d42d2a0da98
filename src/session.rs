//! Request/response exchanges with the remote endpoint
//!
//! One call to [`CommandSession::run_cycle`] is one polling cycle:
//!
//! 1. flush stale input and send the ADC read command
//! 2. wait, bounded by the response timeout, for a valid reading
//! 3. ask for link quality, which may go unanswered
//! 4. apply a pending radio configuration, if any
//!
//! Transport failures are returned as fatal errors. A cycle without a
//! reading ends with [`GatewayError::Timeout`].

use crate::codec::{
    self, ADC_RESPONSE_LEN, CMD_ADC, CMD_LINK_QUALITY, LINK_QUALITY_RESPONSE_LEN, LinkQuality,
    RadioParams, Reading,
};
use crate::config::LinkConfig;
use crate::error::{GatewayError, Result};
use crate::link::LinkSynchronizer;
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Gaps this long are outages, not lost packets
pub const MAX_LOSS_INTERVAL_S: f64 = 3600.0;

/// Where the session is within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingReading,
    AwaitingLinkQuality,
    ApplyingConfig,
}

/// Link quality with the time it was received
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkQualityReport {
    #[serde(flatten)]
    pub quality: LinkQuality,
    pub captured_at: DateTime<Utc>,
}

/// Outcome of a cycle that produced a reading
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub reading: Reading,
    pub link_quality: Option<LinkQualityReport>,
    /// Expected cycles covered by the gap since the previous reading
    pub loss_multiplier: u32,
    /// A pending configuration was applied this cycle
    pub config_applied: bool,
}

impl CycleReport {
    /// Packets presumed lost before this reading
    pub fn missed_packets(&self) -> u32 {
        self.loss_multiplier.saturating_sub(1)
    }
}

/// Number of cycles an inter-arrival gap spans, at least 1
pub fn loss_multiplier(interval_s: f64, cycle_s: f64) -> u32 {
    if !interval_s.is_finite() || cycle_s <= 0.0 || interval_s >= MAX_LOSS_INTERVAL_S {
        return 1;
    }
    let cycles = (interval_s / cycle_s).round();
    if cycles < 1.0 { 1 } else { cycles as u32 }
}

pub struct CommandSession<T> {
    transport: T,
    link: LinkConfig,
    sync: LinkSynchronizer,
    state: SessionState,
    pending_config: Option<RadioParams>,
    last_reading_at: Option<Instant>,
    logger: StructuredLogger,
}

impl<T: Transport> CommandSession<T> {
    pub fn new(transport: T, link: LinkConfig) -> Self {
        let logger = get_logger_with_context(LogContext::new("session").with_slave_id(link.slave_id));
        Self {
            transport,
            link,
            sync: LinkSynchronizer::new(),
            state: SessionState::Idle,
            pending_config: None,
            last_reading_at: None,
            logger,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Swap in a freshly opened transport after a fatal error
    pub fn replace_transport(&mut self, transport: T) {
        self.transport = transport;
        self.sync.clear();
        self.state = SessionState::Idle;
    }

    /// Queue a configuration for the next successful cycle
    pub fn set_pending_config(&mut self, params: RadioParams) {
        self.pending_config = Some(params);
    }

    pub fn has_pending_config(&self) -> bool {
        self.pending_config.is_some()
    }

    /// Run one polling cycle
    pub async fn run_cycle(&mut self, cycle_s: f64) -> Result<CycleReport> {
        let result = self.exchange(cycle_s).await;
        self.state = SessionState::Idle;
        result
    }

    async fn exchange(&mut self, cycle_s: f64) -> Result<CycleReport> {
        let slave_id = self.link.slave_id;

        self.send(&codec::build_command(slave_id, CMD_ADC, &[])).await?;
        self.state = SessionState::AwaitingReading;

        let frame_len = ADC_RESPONSE_LEN + self.link.frame_trailer_bytes;
        let reading = self
            .await_frame(
                codec::frame_header(slave_id, CMD_ADC),
                frame_len,
                ADC_RESPONSE_LEN,
                self.link.response_timeout(),
                codec::parse_adc_response,
            )
            .await?
            .ok_or_else(|| {
                GatewayError::timeout(format!(
                    "No reading from slave {} within {} ms",
                    slave_id, self.link.response_timeout_ms
                ))
            })?;

        let arrived = Instant::now();
        let multiplier = match self.last_reading_at {
            Some(previous) => loss_multiplier((arrived - previous).as_secs_f64(), cycle_s),
            None => 1,
        };
        self.last_reading_at = Some(arrived);
        if multiplier > 1 {
            self.logger.warn(&format!(
                "Suspected {} missed packet(s) before this reading",
                multiplier - 1
            ));
        }

        self.state = SessionState::AwaitingLinkQuality;
        let link_quality = self.request_link_quality().await?;

        let mut config_applied = false;
        if let Some(params) = self.pending_config {
            self.state = SessionState::ApplyingConfig;
            config_applied = self.apply_config(&params).await?;
            if config_applied {
                self.pending_config = None;
            }
        }

        Ok(CycleReport {
            reading,
            link_quality,
            loss_multiplier: multiplier,
            config_applied,
        })
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.transport.clear_input().await?;
        self.sync.clear();
        self.transport.write_frame(frame).await
    }

    /// Feed arriving bytes to the synchroniser until a frame decodes or
    /// `timeout` passes
    async fn await_frame<R>(
        &mut self,
        header: [u8; 3],
        frame_len: usize,
        decode_len: usize,
        timeout: Duration,
        decode: fn(&[u8]) -> Result<R>,
    ) -> Result<Option<R>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(value) = self.sync.next_frame(header, frame_len, decode_len, decode) {
                return Ok(Some(value));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(self.link.read_poll());
            let bytes = self.transport.read_available(wait).await?;
            self.sync.extend(&bytes);
        }
    }

    async fn request_link_quality(&mut self) -> Result<Option<LinkQualityReport>> {
        let slave_id = self.link.slave_id;
        self.send(&codec::build_link_quality_request(slave_id)).await?;

        let quality = self
            .await_frame(
                codec::frame_header(slave_id, CMD_LINK_QUALITY),
                LINK_QUALITY_RESPONSE_LEN,
                LINK_QUALITY_RESPONSE_LEN,
                self.link.link_quality_timeout(),
                codec::parse_link_quality,
            )
            .await?;

        match quality {
            Some(quality) => {
                self.logger.debug(&format!(
                    "RSSI up {} down {} dBm, SNR up {} down {} dB",
                    quality.rssi_uplink,
                    quality.rssi_downlink,
                    quality.snr_uplink,
                    quality.snr_downlink
                ));
                Ok(Some(LinkQualityReport {
                    quality,
                    captured_at: Utc::now(),
                }))
            }
            None => {
                self.logger.debug("No link quality response");
                Ok(None)
            }
        }
    }

    /// Send the three configuration frames; `false` if the radio step was
    /// never acknowledged
    async fn apply_config(&mut self, params: &RadioParams) -> Result<bool> {
        let slave_id = self.link.slave_id;
        let settle = Duration::from_millis(self.link.config_settle_ms);
        self.logger.info(&format!("Applying radio configuration {:?}", params));

        sleep(Duration::from_millis(self.link.config_pre_apply_ms)).await;

        self.send(&params.sleep_frame(slave_id)).await?;
        self.logger.debug(&format!(
            "Sleep/window step sent: wake {}s window {}s",
            params.wake_s, params.window_s
        ));
        sleep(settle).await;

        self.send(&params.mode_frame(slave_id)).await?;
        self.logger.debug(&format!("Mode step sent: class {:#04x}", params.class));
        sleep(settle).await;

        let ack_wait = Duration::from_millis(self.link.radio_ack_wait_ms);
        for attempt in 1..=self.link.radio_retries {
            self.send(&params.radio_frame(slave_id)).await?;
            let ack = self.transport.read_available(ack_wait).await?;
            if !ack.is_empty() {
                self.logger
                    .info(&format!("Radio configuration acknowledged (attempt {})", attempt));
                return Ok(true);
            }
            self.logger.warn(&format!(
                "No acknowledgement for radio step, attempt {}/{}",
                attempt, self.link.radio_retries
            ));
        }

        self.logger
            .warn("Radio configuration not confirmed, keeping it pending");
        Ok(false)
    }
}
