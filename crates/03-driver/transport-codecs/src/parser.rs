use crate::error::CodecResult;
use crate::format::parse_body;
use crate::frame::CanFrame;

/// Size of the partial-frame buffer. One slot stays reserved, so bodies of
/// up to `FRAME_BUFFER - 1` bytes are accepted.
pub const FRAME_BUFFER: usize = 32;

/// Finds GridConnect frame boundaries in a byte stream.
///
/// `:` starts a frame and `;` ends it. Bytes outside a frame are dropped. A
/// body that overruns the buffer cannot be valid, so the parser discards it
/// and waits for the next `:`.
#[derive(Clone, Debug)]
pub struct GcStreamParser {
    buf: [u8; FRAME_BUFFER],
    len: usize,
    in_frame: bool,
}

impl Default for GcStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl GcStreamParser {
    pub fn new() -> Self {
        Self {
            buf: [0; FRAME_BUFFER],
            len: 0,
            in_frame: false,
        }
    }

    /// Adds the next byte. Returns `true` when a complete frame body is
    /// available through [`GcStreamParser::frame_buffer`].
    pub fn consume_byte(&mut self, byte: u8) -> bool {
        match byte {
            b':' => {
                self.len = 0;
                self.in_frame = true;
                false
            }
            b';' => {
                if !self.in_frame {
                    return false;
                }
                self.in_frame = false;
                true
            }
            _ if !self.in_frame => false,
            _ if self.len >= FRAME_BUFFER - 1 => {
                tracing::debug!("gridconnect frame overran buffer, resynchronising");
                self.in_frame = false;
                self.len = 0;
                false
            }
            _ => {
                self.buf[self.len] = byte;
                self.len += 1;
                false
            }
        }
    }

    /// Current body: the last complete frame, or the partial one in progress.
    pub fn frame_buffer(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Parses the last complete frame body.
    pub fn parse_frame(&self) -> CodecResult<CanFrame> {
        parse_body(self.frame_buffer())
    }

    /// Feeds a chunk, reporting every completed frame in order.
    pub fn feed(&mut self, bytes: &[u8], mut on_frame: impl FnMut(CodecResult<CanFrame>, &[u8])) {
        for &byte in bytes {
            if self.consume_byte(byte) {
                on_frame(self.parse_frame(), self.frame_buffer());
            }
        }
    }

    /// True while inside a frame.
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;

    fn frames(parser: &mut GcStreamParser, input: &[u8]) -> Vec<CodecResult<CanFrame>> {
        let mut out = Vec::new();
        parser.feed(input, |frame, _| out.push(frame));
        out
    }

    #[test]
    fn finds_frames_and_drops_bytes_between_them() {
        let mut parser = GcStreamParser::new();
        let got = frames(&mut parser, b"noise:X1N01;\r\n:S2N;junk");
        assert_eq!(
            got,
            vec![
                CanFrame::extended(1, &[1]),
                CanFrame::standard(2, &[]),
            ]
        );
        assert!(!parser.in_frame());
    }

    #[test]
    fn frames_may_span_chunks() {
        let mut parser = GcStreamParser::new();
        assert!(frames(&mut parser, b":X19").is_empty());
        assert!(parser.in_frame());
        assert_eq!(parser.frame_buffer(), b"X19");
        let got = frames(&mut parser, b"5B4123N0102;");
        assert_eq!(got, vec![CanFrame::extended(0x195B_4123, &[1, 2])]);
    }

    #[test]
    fn colon_restarts_a_partial_frame() {
        let mut parser = GcStreamParser::new();
        let got = frames(&mut parser, b":X1N0:S3N;");
        assert_eq!(got, vec![CanFrame::standard(3, &[])]);
    }

    #[test]
    fn stray_terminator_is_ignored() {
        let mut parser = GcStreamParser::new();
        assert!(!parser.consume_byte(b';'));
        assert!(frames(&mut parser, b";;").is_empty());
    }

    #[test]
    fn overrun_resets_until_next_start() {
        let mut parser = GcStreamParser::new();
        let mut input = b":X".to_vec();
        input.extend(std::iter::repeat(b'0').take(FRAME_BUFFER));
        input.extend_from_slice(b"N;:X5N;");
        let got = frames(&mut parser, &input);
        assert_eq!(got, vec![CanFrame::extended(5, &[])]);
    }

    #[test]
    fn malformed_body_is_reported() {
        let mut parser = GcStreamParser::new();
        let got = frames(&mut parser, b":Z;");
        assert_eq!(got, vec![Err(CodecError::UnknownFormat('Z'))]);
    }

    mod prop {
        use super::*;
        use crate::format::render;
        use proptest::prelude::*;

        proptest! {
            /// Garbage without frame delimiters never hides a frame that follows it.
            #[test]
            fn resyncs_after_noise(
                noise in proptest::collection::vec(any::<u8>().prop_filter("no delimiters", |b| *b != b':' && *b != b';'), 0..80),
                id in 0u32..=0x1FFF_FFFF,
                data in proptest::collection::vec(any::<u8>(), 0..=8),
            ) {
                let frame = CanFrame::extended(id, &data).expect("valid frame");
                let mut parser = GcStreamParser::new();
                let mut input = noise.clone();
                input.extend(render(&frame, false));
                let got = frames(&mut parser, &input);
                prop_assert_eq!(got, vec![Ok(frame)]);
            }
        }
    }
}
