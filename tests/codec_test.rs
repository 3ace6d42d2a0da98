mod common;

use common::{SLAVE, adc_frame, sample_frame};
use loragate::codec::{
    self, ADC_RESPONSE_LEN, CMD_ADC, CMD_LINK_QUALITY, LINK_QUALITY_RESPONSE_LEN,
};
use loragate::error::GatewayError;
use loragate::link::LinkSynchronizer;

fn poll_adc(sync: &mut LinkSynchronizer) -> Option<codec::Reading> {
    sync.next_frame(
        codec::frame_header(SLAVE, CMD_ADC),
        ADC_RESPONSE_LEN,
        ADC_RESPONSE_LEN,
        codec::parse_adc_response,
    )
}

#[test]
fn adc_command_matches_reference_bytes() {
    let frame = codec::build_command(SLAVE, CMD_ADC, &[]);
    assert_eq!(frame, vec![0x01, 0x00, 0xB0, 0x51, 0xCC]);
}

#[test]
fn built_frames_parse_back() {
    for id in [1u16, 2, 0x00FF, 0x1234, u16::MAX] {
        let frame = adc_frame(id, [1, 2, 3, 4, 5, 4095], 2800, -12, 300);
        assert_eq!(frame.len(), ADC_RESPONSE_LEN);
        let reading = codec::parse_adc_response(&frame).unwrap();
        assert_eq!(reading.source_id, id);
        assert_eq!(reading.command, CMD_ADC);
        assert_eq!(reading.channels, [1, 2, 3, 4, 5, 4095]);
        assert_eq!(reading.bus_raw, 2800);
        assert_eq!(reading.shunt_raw, -12);
        assert_eq!(reading.sleep_reported_s, 300);
    }
}

#[test]
fn crc_over_frame_with_crc_differs() {
    let frame = sample_frame();
    let body_crc = codec::crc16(&frame[..ADC_RESPONSE_LEN - 2]);
    assert_ne!(codec::crc16(&frame), body_crc);
}

#[test]
fn crc_error_reports_both_values() {
    let mut frame = sample_frame();
    frame[ADC_RESPONSE_LEN - 1] ^= 0xFF;
    match codec::parse_adc_response(&frame) {
        Err(GatewayError::FrameCrc { expected, actual }) => {
            assert_ne!(expected, actual);
            assert_eq!(expected, codec::crc16(&frame[..ADC_RESPONSE_LEN - 2]));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn link_quality_length_is_checked() {
    let frame = common::link_quality_frame(SLAVE, 80, 90, 8, 6);
    assert_eq!(frame.len(), LINK_QUALITY_RESPONSE_LEN);
    assert_eq!(frame[2], CMD_LINK_QUALITY);
    let err = codec::parse_link_quality(&frame[..9]).unwrap_err();
    assert!(err.is_frame_error());
}

#[test]
fn resync_after_garbage_prefix() {
    let mut sync = LinkSynchronizer::new();
    let mut stream = vec![0xFF, 0xFF];
    stream.extend_from_slice(&sample_frame());
    sync.extend(&stream);

    let reading = poll_adc(&mut sync).unwrap();
    assert_eq!(reading, codec::parse_adc_response(&sample_frame()).unwrap());

    // Still in sync for the next frame
    sync.extend(&sample_frame());
    assert!(poll_adc(&mut sync).is_some());
}

#[test]
fn byte_by_byte_delivery_decodes_identically() {
    let single = codec::parse_adc_response(&sample_frame()).unwrap();
    let mut sync = LinkSynchronizer::new();
    let mut decoded = None;
    for byte in [0x00u8, 0x42].iter().chain(sample_frame().iter()) {
        sync.extend(&[*byte]);
        if let Some(reading) = poll_adc(&mut sync) {
            decoded = Some(reading);
        }
    }
    assert_eq!(decoded, Some(single));
}

#[test]
fn frame_for_other_slave_is_ignored() {
    let mut sync = LinkSynchronizer::new();
    sync.extend(&adc_frame(2, [0; 6], 3300, 0, 0));
    assert!(poll_adc(&mut sync).is_none());
    sync.extend(&sample_frame());
    assert_eq!(poll_adc(&mut sync).unwrap().source_id, SLAVE);
}
