//! Marker-delimited, COBS-framed, CRC32-checked link frames.
//!
//! Shared wire format for the serial transport (spec §4.5) and the
//! pre-modulation byte stream of the audio modem (spec §4.6):
//!
//! ```text
//! MARKER COBS( type(1) | frame_seq(4 LE) | [len(2 LE) | payload] | crc32(4 LE) ) MARKER
//! ```
//!
//! - `MARKER` is a configurable byte (default `0x00`) repeated
//!   `marker_run` times (default 3); COBS guarantees the encoded segment
//!   between marker runs contains no `0x00` bytes, so the run length is
//!   unambiguous on the wire.
//! - `type` is `0x01` (DATA, carries an envelope) or `0x02` (ACK, bare
//!   acknowledgment of a `frame_seq`).
//! - `crc32` is IEEE 802.3, computed over every preceding byte in the
//!   COBS-encodable segment (type, frame_seq, and — for DATA — len and
//!   payload).

use crate::link::cobs;

/// DATA frame type byte: carries an enveloped payload.
pub const FRAME_TYPE_DATA: u8 = 0x01;

/// ACK frame type byte: bare acknowledgment of a `frame_seq`.
pub const FRAME_TYPE_ACK: u8 = 0x02;

/// A decoded link frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFrame {
    /// Carries a payload (the COBS-framed envelope bytes at L1; whatever
    /// bytes the caller handed to [`LinkFrame::data`]).
    Data {
        /// Per-sender monotonically increasing frame sequence number.
        frame_seq: u32,
        /// Opaque payload bytes (an envelope, JSON-encoded).
        payload: Vec<u8>,
    },
    /// Bare acknowledgment of a previously received `frame_seq`.
    Ack {
        /// The `frame_seq` being acknowledged.
        frame_seq: u32,
    },
}

impl LinkFrame {
    /// Construct a DATA frame.
    #[must_use]
    pub fn data(frame_seq: u32, payload: Vec<u8>) -> Self {
        Self::Data { frame_seq, payload }
    }

    /// Construct an ACK frame.
    #[must_use]
    pub fn ack(frame_seq: u32) -> Self {
        Self::Ack { frame_seq }
    }

    /// Encode this frame to the inner (pre-marker, pre-COBS) byte
    /// sequence: `type | frame_seq | [len | payload] | crc32`.
    fn encode_inner(&self) -> Vec<u8> {
        let mut content = Vec::new();
        match self {
            Self::Data { frame_seq, payload } => {
                content.push(FRAME_TYPE_DATA);
                content.extend_from_slice(&frame_seq.to_le_bytes());
                let len = u16::try_from(payload.len()).unwrap_or(u16::MAX);
                content.extend_from_slice(&len.to_le_bytes());
                content.extend_from_slice(&payload[..len as usize]);
            }
            Self::Ack { frame_seq } => {
                content.push(FRAME_TYPE_ACK);
                content.extend_from_slice(&frame_seq.to_le_bytes());
            }
        }
        let crc = crc32fast::hash(&content);
        content.extend_from_slice(&crc.to_le_bytes());
        content
    }

    /// Encode a complete on-wire frame: marker run, COBS body, marker run.
    pub fn encode(&self, marker_byte: u8, marker_run: usize) -> Vec<u8> {
        let inner = self.encode_inner();
        let cobs_body = cobs::encode(&inner);
        let mut out = Vec::with_capacity(cobs_body.len() + marker_run * 2);
        out.extend(std::iter::repeat(marker_byte).take(marker_run));
        out.extend_from_slice(&cobs_body);
        out.extend(std::iter::repeat(marker_byte).take(marker_run));
        out
    }

    /// Decode a single COBS-decoded, marker-stripped segment.
    ///
    /// Returns `None` if the segment is too short, the CRC does not
    /// match (single-bit corruption in transit), or the type byte is
    /// unrecognized — per spec invariant 2, corruption must yield `None`
    /// rather than wrong bytes.
    fn decode_inner(content: &[u8]) -> Option<Self> {
        if content.len() < 1 + 4 + 4 {
            return None;
        }
        let crc_offset = content.len() - 4;
        let expected_crc = u32::from_le_bytes(content[crc_offset..].try_into().ok()?);
        let body = &content[..crc_offset];
        if crc32fast::hash(body) != expected_crc {
            return None;
        }

        match body[0] {
            FRAME_TYPE_ACK => {
                if body.len() != 5 {
                    return None;
                }
                let frame_seq = u32::from_le_bytes(body[1..5].try_into().ok()?);
                Some(Self::Ack { frame_seq })
            }
            FRAME_TYPE_DATA => {
                if body.len() < 7 {
                    return None;
                }
                let frame_seq = u32::from_le_bytes(body[1..5].try_into().ok()?);
                let len = u16::from_le_bytes(body[5..7].try_into().ok()?) as usize;
                if body.len() != 7 + len {
                    return None;
                }
                Some(Self::Data {
                    frame_seq,
                    payload: body[7..].to_vec(),
                })
            }
            _ => None,
        }
    }
}

/// Incremental decoder that scans a marker-delimited byte stream and
/// extracts complete [`LinkFrame`]s, tolerating partial reads and
/// garbage between frames (e.g. modem preamble noise).
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    marker_byte: u8,
    marker_run: usize,
}

impl FrameDecoder {
    /// Create a decoder for the given marker byte and run length.
    #[must_use]
    pub fn new(marker_byte: u8, marker_run: usize) -> Self {
        Self {
            buf: Vec::new(),
            marker_byte,
            marker_run: marker_run.max(1),
        }
    }

    /// Feed newly received bytes and extract every complete frame found
    /// so far. Malformed segments (bad CRC, truncated, unknown type) are
    /// silently discarded — per spec §4.1 this is an `Encoding` error,
    /// logged and never surfaced to the caller.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<LinkFrame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            let Some((start, end)) = self.find_marker_run(0) else {
                break;
            };
            if start > 0 {
                // Discard noise preceding the first marker we can see and
                // re-scan against the shrunk buffer.
                self.buf.drain(..start);
                continue;
            }
            // The next marker run's *start* doubles as the current
            // frame's closing delimiter and the following frame's
            // opening delimiter, so it is left in the buffer rather than
            // consumed here.
            let Some((next_start, _)) = self.find_marker_run(end) else {
                break; // wait for the closing marker
            };
            let segment = &self.buf[end..next_start];
            if !segment.is_empty() {
                if let Some(decoded) = cobs::decode(segment).and_then(|raw| LinkFrame::decode_inner(&raw)) {
                    frames.push(decoded);
                } else {
                    log::debug!("clipssh: dropped malformed link frame ({} bytes)", segment.len());
                }
            }
            self.buf.drain(..next_start);
        }

        frames
    }

    /// Find the next run of at least `marker_run` consecutive
    /// `marker_byte`s at or after `from`, returning `(run_start, run_end)`.
    fn find_marker_run(&self, from: usize) -> Option<(usize, usize)> {
        let mut i = from;
        while i + self.marker_run <= self.buf.len() {
            if self.buf[i..i + self.marker_run].iter().all(|&b| b == self.marker_byte) {
                let mut end = i + self.marker_run;
                while end < self.buf.len() && self.buf[end] == self.marker_byte {
                    end += 1;
                }
                return Some((i, end));
            }
            i += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: LinkFrame) {
        let encoded = frame.encode(0x00, 3);
        let mut decoder = FrameDecoder::new(0x00, 3);
        let frames = decoder.feed(&encoded);
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn data_frame_round_trip() {
        roundtrip(LinkFrame::data(1, b"hello".to_vec()));
    }

    #[test]
    fn ack_frame_round_trip() {
        roundtrip(LinkFrame::ack(42));
    }

    #[test]
    fn empty_payload_round_trip() {
        roundtrip(LinkFrame::data(0, vec![]));
    }

    #[test]
    fn multiple_frames_in_one_feed() {
        let f1 = LinkFrame::data(1, b"first".to_vec());
        let f2 = LinkFrame::ack(1);
        let f3 = LinkFrame::data(2, b"second".to_vec());

        let mut buf = Vec::new();
        buf.extend(f1.encode(0x00, 3));
        buf.extend(f2.encode(0x00, 3));
        buf.extend(f3.encode(0x00, 3));

        let mut decoder = FrameDecoder::new(0x00, 3);
        let frames = decoder.feed(&buf);
        assert_eq!(frames, vec![f1, f2, f3]);
    }

    #[test]
    fn partial_feed_then_completion() {
        let frame = LinkFrame::data(7, b"split across reads".to_vec());
        let encoded = frame.encode(0x00, 3);
        let mid = encoded.len() / 2;

        let mut decoder = FrameDecoder::new(0x00, 3);
        assert!(decoder.feed(&encoded[..mid]).is_empty());
        let frames = decoder.feed(&encoded[mid..]);
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn single_bit_corruption_drops_frame_not_garbage() {
        let frame = LinkFrame::data(3, b"integrity matters".to_vec());
        let mut encoded = frame.encode(0x00, 3);
        // Flip a bit squarely inside the COBS-encoded body (after the
        // leading marker run).
        let flip_at = 3 + 5;
        encoded[flip_at] ^= 0x01;

        let mut decoder = FrameDecoder::new(0x00, 3);
        let frames = decoder.feed(&encoded);
        assert!(frames.is_empty(), "corrupted frame must be dropped, not decoded to wrong bytes");
    }

    #[test]
    fn custom_marker_byte_and_run() {
        let frame = LinkFrame::ack(9);
        let encoded = frame.encode(0xFF, 5);
        let mut decoder = FrameDecoder::new(0xFF, 5);
        assert_eq!(decoder.feed(&encoded), vec![frame]);
    }

    #[test]
    fn byte_at_a_time_feed() {
        let frame = LinkFrame::data(5, b"x".to_vec());
        let encoded = frame.encode(0x00, 3);
        let mut decoder = FrameDecoder::new(0x00, 3);
        let mut got = Vec::new();
        for byte in &encoded {
            got.extend(decoder.feed(&[*byte]));
        }
        assert_eq!(got, vec![frame]);
    }
}
