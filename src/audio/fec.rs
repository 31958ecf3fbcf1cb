//! Repeat-code forward error correction for the audio link (spec §4.6).
//!
//! Each payload byte is transmitted `repeat` times; the decoder recovers
//! the original byte with a bit-wise majority vote across the copies.
//! This is a weak code — it exists to survive narrow dropouts (a single
//! corrupted copy among several), not Gaussian noise, and makes no
//! attempt at detecting errors beyond what the majority vote implies.

/// Encode `data` by repeating every byte `repeat` times.
///
/// `repeat` of `0` or `1` degenerates to no redundancy; callers should
/// use `repeat >= 2` for any error tolerance (spec default is 3).
#[must_use]
pub fn encode(data: &[u8], repeat: u32) -> Vec<u8> {
    let repeat = repeat.max(1) as usize;
    let mut out = Vec::with_capacity(data.len() * repeat);
    for &byte in data {
        for _ in 0..repeat {
            out.push(byte);
        }
    }
    out
}

/// Decode a repeat-encoded buffer via per-bit majority vote.
///
/// Returns `None` if `data`'s length isn't a multiple of `repeat`.
#[must_use]
pub fn decode(data: &[u8], repeat: u32) -> Option<Vec<u8>> {
    let repeat = repeat.max(1) as usize;
    if data.is_empty() {
        return Some(Vec::new());
    }
    if data.len() % repeat != 0 {
        return None;
    }

    let mut out = Vec::with_capacity(data.len() / repeat);
    for chunk in data.chunks_exact(repeat) {
        let mut byte = 0u8;
        for bit in 0..8u8 {
            let ones = chunk.iter().filter(|&&c| (c >> bit) & 1 == 1).count();
            if ones * 2 > chunk.len() {
                byte |= 1 << bit;
            }
        }
        out.push(byte);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_no_corruption() {
        let data = b"the quick brown fox";
        let encoded = encode(data, 3);
        assert_eq!(encoded.len(), data.len() * 3);
        assert_eq!(decode(&encoded, 3).unwrap(), data);
    }

    #[test]
    fn repeat_of_one_is_identity() {
        let data = b"passthrough";
        let encoded = encode(data, 1);
        assert_eq!(encoded, data);
        assert_eq!(decode(&encoded, 1).unwrap(), data);
    }

    #[test]
    fn empty_input() {
        assert_eq!(encode(&[], 3), Vec::<u8>::new());
        assert_eq!(decode(&[], 3).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn rejects_length_not_multiple_of_repeat() {
        assert_eq!(decode(&[1, 2, 3, 4], 3), None);
    }

    /// Spec invariant 7 / scenario S5: a single-position bit error in
    /// `<= floor(R/2)` copies is fully corrected.
    #[test]
    fn single_copy_corruption_in_every_third_position_is_corrected() {
        let original: Vec<u8> = (0..64u8).collect();
        let mut encoded = encode(&original, 3);

        // Corrupt one byte in copy index 1 (of 0,1,2) at source positions
        // 0, 20, 40, and 63 -- a minority (1 of 3) of the repeated copies.
        for &pos in &[0usize, 20, 40, 63] {
            let copy_index = pos * 3 + 1;
            encoded[copy_index] ^= 0xFF;
        }

        let decoded = decode(&encoded, 3).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn majority_corruption_changes_the_decoded_byte() {
        // Two of three copies corrupted identically: majority now agrees
        // on the wrong value, which is the documented limit of this code.
        let original = [0b0000_0000u8];
        let mut encoded = encode(&original, 3);
        encoded[0] = 0b1111_1111;
        encoded[1] = 0b1111_1111;

        let decoded = decode(&encoded, 3).unwrap();
        assert_eq!(decoded, vec![0b1111_1111]);
    }

    #[test]
    fn higher_repeat_factor_tolerates_more_corruption() {
        let original = [0xAAu8; 8];
        let mut encoded = encode(&original, 5);
        // Corrupt 2 of 5 copies per byte (still a minority).
        for chunk_start in (0..encoded.len()).step_by(5) {
            encoded[chunk_start] ^= 0xFF;
            encoded[chunk_start + 1] ^= 0xFF;
        }
        assert_eq!(decode(&encoded, 5).unwrap(), original);
    }
}
