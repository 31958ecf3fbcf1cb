//! Consistent Overhead Byte Stuffing (COBS).
//!
//! Removes a chosen delimiter byte (`0x00`) from an arbitrary payload so
//! that byte is free to use as an unambiguous frame marker on the wire.
//! Overhead is at most one byte per 254 input bytes, plus one.
//!
//! Pure functions: no I/O, so they can be exercised directly by
//! property tests (spec §9 design note).

/// Encode `input` with COBS, eliminating all `0x00` bytes from the
/// output.
pub fn encode(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() + input.len() / 254 + 2);
    let mut code_index = 0usize;
    output.push(0); // placeholder for the first code byte
    let mut code = 1u8;

    for &byte in input {
        if byte == 0 {
            output[code_index] = code;
            code_index = output.len();
            output.push(0); // placeholder for next code byte
            code = 1;
        } else {
            output.push(byte);
            code += 1;
            if code == 0xFF {
                output[code_index] = code;
                code_index = output.len();
                output.push(0);
                code = 1;
            }
        }
    }
    output[code_index] = code;
    output
}

/// Decode a COBS-encoded buffer back into the original bytes.
///
/// Returns `None` if `input` is empty or malformed (a code byte points
/// past the end of the buffer).
pub fn decode(input: &[u8]) -> Option<Vec<u8>> {
    if input.is_empty() {
        return None;
    }
    let mut output = Vec::with_capacity(input.len());
    let mut i = 0usize;

    while i < input.len() {
        let code = input[i] as usize;
        if code == 0 || i + code > input.len() + 1 {
            return None;
        }
        i += 1;
        let run_end = i + code - 1;
        if run_end > input.len() {
            return None;
        }
        output.extend_from_slice(&input[i..run_end]);
        i = run_end;
        if code < 0xFF && i < input.len() {
            output.push(0);
        }
    }
    Some(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(input: &[u8]) {
        let encoded = encode(input);
        assert!(!encoded.contains(&0), "encoded output must contain no zero bytes");
        let decoded = decode(&encoded).expect("decode should succeed for valid COBS output");
        assert_eq!(decoded, input);
    }

    #[test]
    fn empty_input() {
        round_trip(&[]);
    }

    #[test]
    fn no_zeros() {
        round_trip(b"hello world");
    }

    #[test]
    fn all_zeros() {
        round_trip(&[0, 0, 0, 0, 0]);
    }

    #[test]
    fn leading_and_trailing_zero() {
        round_trip(&[0, 1, 2, 3, 0]);
    }

    #[test]
    fn run_of_254_nonzero_bytes() {
        let input: Vec<u8> = (0..254).map(|i| (i % 255 + 1) as u8).collect();
        round_trip(&input);
    }

    #[test]
    fn run_of_255_nonzero_bytes() {
        let input: Vec<u8> = (0..255).map(|i| (i % 255 + 1) as u8).collect();
        round_trip(&input);
    }

    #[test]
    fn large_random_ish_buffer() {
        let input: Vec<u8> = (0..5000u32).map(|i| (i * 37 % 256) as u8).collect();
        round_trip(&input);
    }

    #[test]
    fn decode_rejects_empty() {
        assert_eq!(decode(&[]), None);
    }

    #[test]
    fn decode_rejects_truncated_frame() {
        let encoded = encode(b"abcdef");
        let truncated = &encoded[..encoded.len() - 1];
        assert_eq!(decode(truncated), None);
    }

    #[test]
    fn decode_rejects_zero_code_byte() {
        assert_eq!(decode(&[0, 1, 2]), None);
    }

    proptest::proptest! {
        #[test]
        fn round_trips_any_byte_sequence(bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..2048)) {
            let encoded = encode(&bytes);
            proptest::prop_assert!(!encoded.contains(&0));
            proptest::prop_assert_eq!(decode(&encoded), Some(bytes));
        }
    }
}
