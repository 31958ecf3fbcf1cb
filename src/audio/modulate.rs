//! FSK modulator: byte payload to PCM samples (spec §4.6).
//!
//! Output is a single self-contained burst: preamble (alternating
//! extremal tones, for the demodulator's AGC/phase lock), sync word,
//! then the data symbols. There is no trailing silence or framing at
//! this layer — [`crate::audio::link`] decides burst boundaries.

use super::{bits_to_symbol, ModeSpec};
use crate::constants::AUDIO_SAMPLE_RATE;
use std::f32::consts::PI;

/// Peak sample amplitude for generated tones. Kept below `i16::MAX` to
/// leave headroom against summed harmonics a real playback/capture
/// path might introduce.
pub(crate) const TONE_AMPLITUDE: f32 = 0.7 * i16::MAX as f32;

/// Modulate `payload` into a burst of 16-bit PCM samples at
/// [`AUDIO_SAMPLE_RATE`], per `spec`.
#[must_use]
pub fn modulate(payload: &[u8], spec: &ModeSpec) -> Vec<i16> {
    let mut symbols = preamble_symbols(spec);
    symbols.extend(spec.sync_symbols());
    symbols.extend(bytes_to_symbols(payload, spec.bits_per_symbol));

    let mut samples = Vec::with_capacity(symbols.len() * spec.samples_per_symbol);
    let mut sample_index: u64 = 0;
    for symbol in symbols {
        let freq = spec.carriers[symbol as usize];
        samples.extend(generate_tone(freq, spec.samples_per_symbol, sample_index, AUDIO_SAMPLE_RATE));
        sample_index += spec.samples_per_symbol as u64;
    }
    samples
}

/// Alternates between the two most frequency-separated carriers
/// (lowest/highest index) so the demodulator's Goertzel bank sees a
/// clean on/off pattern to lock its energy floor against.
fn preamble_symbols(spec: &ModeSpec) -> Vec<u8> {
    let low = 0u8;
    let high = (spec.symbol_count() - 1) as u8;
    (0..spec.preamble_symbols)
        .map(|i| if i % 2 == 0 { low } else { high })
        .collect()
}

fn generate_tone(freq: f32, num_samples: usize, start_sample_index: u64, sample_rate: u32) -> Vec<i16> {
    (0..num_samples)
        .map(|i| {
            let t = (start_sample_index + i as u64) as f32 / sample_rate as f32;
            (TONE_AMPLITUDE * (2.0 * PI * freq * t).sin()) as i16
        })
        .collect()
}

/// Pack a byte slice into `bits_per_symbol`-wide symbol values, MSB
/// first, zero-padding the final symbol if the bit count doesn't
/// divide evenly.
pub(crate) fn bytes_to_symbols(data: &[u8], bits_per_symbol: u32) -> Vec<u8> {
    let mut symbols = Vec::new();
    let mut acc: u32 = 0;
    let mut acc_bits = 0u32;

    for &byte in data {
        acc = (acc << 8) | u32::from(byte);
        acc_bits += 8;
        while acc_bits >= bits_per_symbol {
            let shift = acc_bits - bits_per_symbol;
            let bits = ((acc >> shift) & ((1 << bits_per_symbol) - 1)) as u8;
            symbols.push(bits_to_symbol(bits, bits_per_symbol));
            acc_bits -= bits_per_symbol;
        }
    }
    if acc_bits > 0 {
        let bits = ((acc << (bits_per_symbol - acc_bits)) & ((1 << bits_per_symbol) - 1)) as u8;
        symbols.push(bits_to_symbol(bits, bits_per_symbol));
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ModulationMode;

    #[test]
    fn bytes_to_symbols_packs_msb_first_for_legacy() {
        let symbols = bytes_to_symbols(&[0b1010_0000], 1);
        assert_eq!(symbols, vec![1, 0, 1, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn bytes_to_symbols_handles_four_fsk_width() {
        let symbols = bytes_to_symbols(&[0b1011_0010], 2);
        // bit groups: 10, 11, 00, 10 -> mapped through the Hamming-2 table
        assert_eq!(symbols.len(), 4);
    }

    #[test]
    fn modulate_produces_expected_sample_count() {
        let spec = ModulationMode::Legacy.spec();
        let payload = b"hi";
        let samples = modulate(payload, &spec);
        let expected_symbols = spec.preamble_symbols + spec.sync_symbols().len() + payload.len() * 8;
        assert_eq!(samples.len(), expected_symbols * spec.samples_per_symbol);
    }

    #[test]
    fn modulate_stays_within_amplitude_bounds() {
        let spec = ModulationMode::RobustV1.spec();
        let samples = modulate(b"bounds check", &spec);
        for sample in samples {
            assert!(i32::from(sample).unsigned_abs() <= TONE_AMPLITUDE as u32 + 1);
        }
    }
}
