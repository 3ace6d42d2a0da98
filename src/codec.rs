//! Wire format of the radio link
//!
//! Command frames are `[dest_id:u16-LE][cmd:u8][payload..][crc:u16-LE]`.
//! Every frame, in either direction, ends with a CRC-16 over all preceding
//! bytes. Everything here is a pure function of its input.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};

/// Read the six analog channels plus battery telemetry
pub const CMD_ADC: u8 = 0xB0;
/// Ask the modem for signal quality of the last exchange
pub const CMD_LINK_QUALITY: u8 = 0xD5;
/// Sleep interval and wake window
pub const CMD_CONFIG_SLEEP: u8 = 0x50;
/// Operating class and window code
pub const CMD_CONFIG_MODE: u8 = 0xC1;
/// Power, bandwidth, spreading factor, coding rate
pub const CMD_CONFIG_RADIO: u8 = 0xD6;

/// Size of the ADC response including its CRC
pub const ADC_RESPONSE_LEN: usize = 23;
/// Size of the link-quality response including its CRC
pub const LINK_QUALITY_RESPONSE_LEN: usize = 11;
/// Number of analog channels carried by a reading
pub const CHANNEL_COUNT: usize = 6;

const CRC_SEED: u16 = 0xC181;
const CRC_POLY: u16 = 0xA001;

/// CRC-16 as used by the radio modem.
///
/// Modbus-style reflected CRC (polynomial 0xA001, LSB first, no final
/// XOR) with a non-standard seed of 0xC181.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = CRC_SEED;
    for &byte in bytes {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Build a command frame addressed to `dest_id`
pub fn build_command(dest_id: u16, cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 5);
    frame.extend_from_slice(&dest_id.to_le_bytes());
    frame.push(cmd);
    frame.extend_from_slice(payload);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// The three bytes a response to `cmd` from `id` starts with
pub fn frame_header(id: u16, cmd: u8) -> [u8; 3] {
    let [lo, hi] = id.to_le_bytes();
    [lo, hi, cmd]
}

/// Check length and trailing CRC of a complete frame
fn validate(bytes: &[u8], expected_len: usize) -> Result<()> {
    if bytes.len() != expected_len {
        return Err(GatewayError::FrameLength {
            expected: expected_len,
            actual: bytes.len(),
        });
    }
    let (body, tail) = bytes.split_at(expected_len - 2);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    let computed = crc16(body);
    if received != computed {
        return Err(GatewayError::FrameCrc {
            expected: computed,
            actual: received,
        });
    }
    Ok(())
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// One validated ADC response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Endpoint that answered
    pub source_id: u16,
    /// Echoed command byte
    pub command: u8,
    /// Raw 12-bit channel codes
    pub channels: [u16; CHANNEL_COUNT],
    /// Raw bus-voltage register of the power monitor
    pub bus_raw: u16,
    /// Raw shunt-voltage register, two's complement
    pub shunt_raw: i16,
    /// Seconds the endpoint slept before this transmission
    pub sleep_reported_s: u16,
}

/// Decode an ADC response frame
pub fn parse_adc_response(bytes: &[u8]) -> Result<Reading> {
    validate(bytes, ADC_RESPONSE_LEN)?;

    let mut channels = [0u16; CHANNEL_COUNT];
    for (i, channel) in channels.iter_mut().enumerate() {
        *channel = u16_at(bytes, 3 + i * 2);
    }

    Ok(Reading {
        source_id: u16_at(bytes, 0),
        command: bytes[2],
        channels,
        bus_raw: u16_at(bytes, 15),
        shunt_raw: i16::from_le_bytes([bytes[17], bytes[18]]),
        sleep_reported_s: u16_at(bytes, 19),
    })
}

/// Signal quality of the last exchange, as seen by both radios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkQuality {
    /// Modem that relayed the exchange
    pub gateway_id: u16,
    /// RSSI at the endpoint (dBm)
    pub rssi_uplink: i16,
    /// RSSI at the gateway (dBm)
    pub rssi_downlink: i16,
    /// SNR at the endpoint (dB)
    pub snr_uplink: i16,
    /// SNR at the gateway (dB)
    pub snr_downlink: i16,
}

/// Link-quality query frame
pub fn build_link_quality_request(dest_id: u16) -> Vec<u8> {
    build_command(dest_id, CMD_LINK_QUALITY, &[0x00])
}

/// Decode a link-quality response frame.
///
/// RSSI is transmitted as a magnitude and returned negated.
pub fn parse_link_quality(bytes: &[u8]) -> Result<LinkQuality> {
    validate(bytes, LINK_QUALITY_RESPONSE_LEN)?;
    Ok(LinkQuality {
        gateway_id: u16_at(bytes, 3),
        rssi_uplink: -i16::from(bytes[5]),
        rssi_downlink: -i16::from(bytes[6]),
        snr_uplink: i16::from(bytes[7]),
        snr_downlink: i16::from(bytes[8]),
    })
}

/// Radio configuration already mapped to wire bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioParams {
    pub power: u8,
    pub bandwidth: u8,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    /// 0x00 class A, 0x02 class C
    pub class: u8,
    /// 0x00 5 s, 0x01 10 s, 0x02 15 s
    pub window_code: u8,
    pub window_s: u8,
    /// Seconds between wake-ups, 0 when always awake
    pub wake_s: u8,
}

impl RadioParams {
    /// Sleep/window step
    pub fn sleep_frame(&self, dest_id: u16) -> Vec<u8> {
        build_command(dest_id, CMD_CONFIG_SLEEP, &[self.wake_s, self.window_s])
    }

    /// Mode/class step
    pub fn mode_frame(&self, dest_id: u16) -> Vec<u8> {
        build_command(
            dest_id,
            CMD_CONFIG_MODE,
            &[0x00, self.class, self.window_code],
        )
    }

    /// Radio-parameter step
    pub fn radio_frame(&self, dest_id: u16) -> Vec<u8> {
        build_command(
            dest_id,
            CMD_CONFIG_RADIO,
            &[
                0x01,
                self.power,
                self.bandwidth,
                self.spreading_factor,
                self.coding_rate,
            ],
        )
    }
}
