#![allow(dead_code)]

use async_trait::async_trait;
use loragate::codec::{self, CMD_ADC, CMD_LINK_QUALITY};
use loragate::error::{GatewayError, Result};
use loragate::transport::Transport;
use std::collections::VecDeque;
use std::time::Duration;

/// Endpoint id used throughout the tests
pub const SLAVE: u16 = 1;

/// ADC response as the endpoint would send it
pub fn adc_frame(id: u16, channels: [u16; 6], bus: u16, shunt: i16, sleep_s: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(18);
    for channel in channels {
        payload.extend_from_slice(&channel.to_le_bytes());
    }
    payload.extend_from_slice(&bus.to_le_bytes());
    payload.extend_from_slice(&shunt.to_le_bytes());
    payload.extend_from_slice(&sleep_s.to_le_bytes());
    codec::build_command(id, CMD_ADC, &payload)
}

/// 4.125 V, +50 mA, 25 s reported sleep
pub fn sample_frame() -> Vec<u8> {
    adc_frame(SLAVE, [1024, 2048, 3072, 4095, 0, 512], 3300, 400, 25)
}

pub fn link_quality_frame(id: u16, rssi_up: u8, rssi_down: u8, snr_up: u8, snr_down: u8) -> Vec<u8> {
    codec::build_command(id, CMD_LINK_QUALITY, &[0x05, 0x00, rssi_up, rssi_down, snr_up, snr_down])
}

/// One chunk of bytes that becomes readable `after` the previous one
#[derive(Debug, Clone)]
pub struct Chunk {
    pub after: Duration,
    pub bytes: Vec<u8>,
}

impl Chunk {
    pub fn now(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            after: Duration::ZERO,
            bytes: bytes.into(),
        }
    }

    pub fn after_ms(ms: u64, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            after: Duration::from_millis(ms),
            bytes: bytes.into(),
        }
    }
}

/// In-memory modem: each written frame releases the next scripted reply
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: VecDeque<Vec<Chunk>>,
    pending: VecDeque<Chunk>,
    writes: Vec<Vec<u8>>,
    clears: usize,
    fail_writes: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to the next unanswered write
    pub fn reply(mut self, chunks: Vec<Chunk>) -> Self {
        self.replies.push_back(chunks);
        self
    }

    /// Leave the next write unanswered
    pub fn silent(self) -> Self {
        self.reply(Vec::new())
    }

    /// Every write fails as if the line were unplugged
    pub fn broken() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    pub fn clears(&self) -> usize {
        self.clears
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn clear_input(&mut self) -> Result<()> {
        self.clears += 1;
        self.pending.clear();
        Ok(())
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if self.fail_writes {
            return Err(GatewayError::transport("device disconnected"));
        }
        self.writes.push(frame.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            self.pending.extend(reply);
        }
        Ok(())
    }

    async fn read_available(&mut self, wait: Duration) -> Result<Vec<u8>> {
        let Some(next) = self.pending.front_mut() else {
            tokio::time::sleep(wait).await;
            return Ok(Vec::new());
        };
        if next.after > wait {
            next.after -= wait;
            tokio::time::sleep(wait).await;
            return Ok(Vec::new());
        }
        tokio::time::sleep(next.after).await;
        let chunk = self.pending.pop_front().map(|c| c.bytes).unwrap_or_default();
        Ok(chunk)
    }
}
