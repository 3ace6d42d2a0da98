#![no_main]
use libfuzzer_sys::fuzz_target;
use loragate::codec::{self, ADC_RESPONSE_LEN, CMD_ADC};
use loragate::link::{LinkSynchronizer, MAX_BUFFERED};

fuzz_target!(|data: &[u8]| {
    let header = codec::frame_header(1, CMD_ADC);
    let mut sync = LinkSynchronizer::new();

    // First byte picks the chunk size the stream is fed in
    let Some((&chunk, rest)) = data.split_first() else {
        return;
    };
    for piece in rest.chunks(usize::from(chunk.max(1))) {
        sync.extend(piece);
        while let Some(reading) =
            sync.next_frame(header, ADC_RESPONSE_LEN, ADC_RESPONSE_LEN, codec::parse_adc_response)
        {
            assert_eq!(reading.source_id, 1);
        }
        assert!(sync.buffered().len() <= MAX_BUFFERED);
    }
});
