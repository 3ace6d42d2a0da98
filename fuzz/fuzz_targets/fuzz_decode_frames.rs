#![no_main]
use libfuzzer_sys::fuzz_target;
use loragate::codec;

fuzz_target!(|data: &[u8]| {
    // Decoders must reject, never panic
    let _ = codec::parse_adc_response(data);
    let _ = codec::parse_link_quality(data);

    // Anything that decodes must carry a valid trailing CRC
    if let Ok(reading) = codec::parse_adc_response(data) {
        let crc = codec::crc16(&data[..data.len() - 2]);
        assert_eq!(crc.to_le_bytes(), [data[data.len() - 2], data[data.len() - 1]]);
        assert_eq!(reading.command, data[2]);
    }
});
