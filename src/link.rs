//! Frame synchronisation over the raw serial byte stream
//!
//! Bytes arrive in arbitrary chunks, possibly preceded by noise or by the
//! tail of an unrelated frame. The synchroniser keeps a rolling buffer and
//! looks for the three header bytes of the response it is waiting for.

use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};

/// Upper bound on buffered bytes while no header matches
pub const MAX_BUFFERED: usize = 1024;

/// Rolling receive buffer with header-based frame location
pub struct LinkSynchronizer {
    buffer: Vec<u8>,
    logger: StructuredLogger,
}

impl Default for LinkSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkSynchronizer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            logger: get_logger("link"),
        }
    }

    /// Forget everything received so far
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Append newly arrived bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Try to extract and decode one frame.
    ///
    /// `frame_len` bytes starting at the header are consumed on success and
    /// `decode` sees the leading `decode_len` of them. A candidate that fails
    /// to decode is treated as a false header match: the buffer is dropped up
    /// to and including the first header byte and the search continues.
    /// Returns `None` while no complete valid frame is buffered.
    pub fn next_frame<T, F>(
        &mut self,
        header: [u8; 3],
        frame_len: usize,
        decode_len: usize,
        mut decode: F,
    ) -> Option<T>
    where
        F: FnMut(&[u8]) -> Result<T>,
    {
        let decode_len = decode_len.min(frame_len);

        loop {
            let Some(start) = find_header(&self.buffer, &header) else {
                self.trim_unmatched();
                return None;
            };

            if self.buffer.len() - start < frame_len {
                // Header found, rest of the frame still in flight
                if start > 0 {
                    self.buffer.drain(..start);
                }
                return None;
            }

            let candidate = &self.buffer[start..start + decode_len];
            match decode(candidate) {
                Ok(value) => {
                    self.buffer.drain(..start + frame_len);
                    return Some(value);
                }
                Err(e) => {
                    self.logger.debug(&format!(
                        "Rejected candidate frame at offset {}: {}",
                        start, e
                    ));
                    self.buffer.drain(..=start);
                }
            }
        }
    }

    // Oldest bytes go first; the input is flushed before every command anyway
    fn trim_unmatched(&mut self) {
        if self.buffer.len() > MAX_BUFFERED {
            let excess = self.buffer.len() - MAX_BUFFERED;
            self.buffer.drain(..excess);
        }
    }
}

fn find_header(buffer: &[u8], header: &[u8; 3]) -> Option<usize> {
    buffer.windows(header.len()).position(|w| w == header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::SAMPLE_FRAME;
    use crate::codec::{ADC_RESPONSE_LEN, CMD_ADC, frame_header, parse_adc_response};

    fn poll(sync: &mut LinkSynchronizer) -> Option<crate::codec::Reading> {
        sync.next_frame(
            frame_header(1, CMD_ADC),
            ADC_RESPONSE_LEN,
            ADC_RESPONSE_LEN,
            parse_adc_response,
        )
    }

    #[test]
    fn skips_leading_garbage() {
        let mut sync = LinkSynchronizer::new();
        sync.extend(&[0xFF, 0xFF]);
        sync.extend(&SAMPLE_FRAME);
        let reading = poll(&mut sync).unwrap();
        assert_eq!(reading.bus_raw, 3300);
        assert!(sync.buffered().is_empty());
    }

    #[test]
    fn waits_for_partial_frame() {
        let mut sync = LinkSynchronizer::new();
        sync.extend(&SAMPLE_FRAME[..10]);
        assert!(poll(&mut sync).is_none());
        sync.extend(&SAMPLE_FRAME[10..]);
        assert!(poll(&mut sync).is_some());
    }

    #[test]
    fn false_header_inside_garbage_is_skipped() {
        let mut sync = LinkSynchronizer::new();
        // A header followed by junk long enough to look like a frame
        sync.extend(&[0x01, 0x00, 0xB0]);
        sync.extend(&[0x55; 5]);
        sync.extend(&SAMPLE_FRAME);
        let reading = poll(&mut sync).unwrap();
        assert_eq!(reading.channels[0], 1024);
    }

    #[test]
    fn corrupted_frame_then_valid_frame() {
        let mut sync = LinkSynchronizer::new();
        let mut bad = SAMPLE_FRAME;
        bad[10] ^= 0x40;
        sync.extend(&bad);
        assert!(poll(&mut sync).is_none());
        sync.extend(&SAMPLE_FRAME);
        assert!(poll(&mut sync).is_some());
    }

    #[test]
    fn trailer_bytes_are_consumed() {
        let mut sync = LinkSynchronizer::new();
        sync.extend(&SAMPLE_FRAME);
        sync.extend(&[0xAA, 0xBB]);
        sync.extend(&SAMPLE_FRAME);
        sync.extend(&[0xCC, 0xDD]);
        let header = frame_header(1, CMD_ADC);
        for _ in 0..2 {
            let reading = sync.next_frame(
                header,
                ADC_RESPONSE_LEN + 2,
                ADC_RESPONSE_LEN,
                parse_adc_response,
            );
            assert!(reading.is_some());
        }
        assert!(sync.buffered().is_empty());
    }

    #[test]
    fn unmatched_noise_is_bounded() {
        let mut sync = LinkSynchronizer::new();
        sync.extend(&vec![0x42; MAX_BUFFERED * 3]);
        assert!(poll(&mut sync).is_none());
        assert!(sync.buffered().len() <= MAX_BUFFERED);
    }
}
