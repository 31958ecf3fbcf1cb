//! Sliding Goertzel demodulator (spec §4.6).
//!
//! Operates on a captured burst of PCM samples: tracks a running energy
//! floor to find where a signal starts (rejecting silence), refines the
//! sample alignment around that onset, locates the sync word, then
//! decodes every following symbol until the energy floor drops again
//! (silence, end of burst). No attempt is made to track phase/amplitude
//! drift mid-burst beyond the per-symbol Goertzel bank itself — good
//! enough for the short bursts this transport actually sends.

use super::{symbol_to_bits, ModeSpec};
use crate::audio::modulate::TONE_AMPLITUDE;
use crate::constants::AUDIO_SAMPLE_RATE;

/// Fraction of the theoretical full-amplitude tone power below which a
/// symbol window is treated as silence rather than a decoded tone.
const SILENCE_RATIO: f32 = 0.05;

/// Attempt to demodulate one burst. Returns `None` if no onset of
/// signal is found, or the sync word can't be located near it.
#[must_use]
pub fn demodulate(samples: &[i16], spec: &ModeSpec) -> Option<Vec<u8>> {
    let sps = spec.samples_per_symbol;
    if sps == 0 || samples.len() < sps {
        return None;
    }
    let sync = spec.sync_symbols();

    let onset = find_onset(samples, spec)?;
    let search_start = onset.saturating_sub(sps);
    let search_end = (onset + sps).min(samples.len().saturating_sub(sps));
    let probe_symbols = spec.preamble_symbols + sync.len();

    for start in search_start..=search_end {
        let probe = decode_symbols_limited(&samples[start..], spec, probe_symbols);
        let Some(pos) = find_subsequence(&probe, &sync) else {
            continue;
        };
        let payload_start = start + (pos + sync.len()) * sps;
        if payload_start > samples.len() {
            return Some(Vec::new());
        }
        let payload_symbols = decode_symbols(&samples[payload_start..], spec);
        return Some(symbols_to_bytes(&payload_symbols, spec.bits_per_symbol));
    }
    None
}

/// Coarse scan in whole-symbol strides for the first window whose peak
/// carrier power clears the silence floor.
fn find_onset(samples: &[i16], spec: &ModeSpec) -> Option<usize> {
    let sps = spec.samples_per_symbol;
    let mut start = 0;
    while start + sps <= samples.len() {
        let window = &samples[start..start + sps];
        if decode_symbol(window, spec).is_some() {
            return Some(start);
        }
        start += sps;
    }
    None
}

/// Decode every full symbol window until either the buffer or the
/// signal (energy floor) runs out.
fn decode_symbols(samples: &[i16], spec: &ModeSpec) -> Vec<u8> {
    decode_symbols_limited(samples, spec, usize::MAX)
}

/// As [`decode_symbols`], but stops after `max` symbols even if the
/// signal continues — used to cheaply probe candidate alignments for
/// the sync word without decoding an entire burst at each one.
fn decode_symbols_limited(samples: &[i16], spec: &ModeSpec, max: usize) -> Vec<u8> {
    let mut symbols = Vec::new();
    for window in samples.chunks_exact(spec.samples_per_symbol) {
        if symbols.len() >= max {
            break;
        }
        match decode_symbol(window, spec) {
            Some(symbol) => symbols.push(symbol),
            None => break,
        }
    }
    symbols
}

/// Argmax of Goertzel power across `spec.carriers`, or `None` if the
/// strongest bin is below the silence floor.
fn decode_symbol(window: &[i16], spec: &ModeSpec) -> Option<u8> {
    let powers: Vec<f32> = spec
        .carriers
        .iter()
        .map(|&freq| goertzel_power(window, AUDIO_SAMPLE_RATE, freq))
        .collect();

    let (max_index, &max_power) = powers
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;

    if max_power < silence_floor(window.len()) {
        return None;
    }
    Some(max_index as u8)
}

fn silence_floor(window_len: usize) -> f32 {
    let max_tone_power = (TONE_AMPLITUDE * window_len as f32 / 2.0).powi(2);
    max_tone_power * SILENCE_RATIO
}

/// Goertzel algorithm: power of `samples` at `target_freq`, given
/// `sample_rate`. O(n) per call, no FFT needed since only a handful of
/// fixed bins are ever probed per symbol.
#[must_use]
pub fn goertzel_power(samples: &[i16], sample_rate: u32, target_freq: f32) -> f32 {
    let n = samples.len() as f32;
    let k = (0.5 + n * target_freq / sample_rate as f32).floor();
    let omega = 2.0 * std::f32::consts::PI * k / n;
    let coeff = 2.0 * omega.cos();

    let mut q1 = 0.0f32;
    let mut q2 = 0.0f32;
    for &sample in samples {
        let q0 = coeff * q1 - q2 + f32::from(sample);
        q2 = q1;
        q1 = q0;
    }
    q1 * q1 + q2 * q2 - q1 * q2 * coeff
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Unpack `bits_per_symbol`-wide symbol values back into bytes, MSB
/// first. Trailing bits that don't complete a byte (zero-padding from
/// [`super::modulate::bytes_to_symbols`], or noise past the real
/// payload) are discarded.
pub(crate) fn symbols_to_bytes(symbols: &[u8], bits_per_symbol: u32) -> Vec<u8> {
    let mut out = Vec::new();
    let mut acc: u32 = 0;
    let mut acc_bits = 0u32;

    for &symbol in symbols {
        let bits = symbol_to_bits(symbol, bits_per_symbol);
        acc = (acc << bits_per_symbol) | u32::from(bits);
        acc_bits += bits_per_symbol;
        if acc_bits >= 8 {
            let shift = acc_bits - 8;
            out.push(((acc >> shift) & 0xFF) as u8);
            acc_bits -= 8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::modulate::modulate;
    use crate::audio::ModulationMode;

    #[test]
    fn goertzel_identifies_pure_tone() {
        let spec = ModulationMode::Legacy.spec();
        let samples = modulate(&[], &spec); // preamble + sync only
        let window = &samples[..spec.samples_per_symbol];
        let powers: Vec<f32> = spec
            .carriers
            .iter()
            .map(|&f| goertzel_power(window, AUDIO_SAMPLE_RATE, f))
            .collect();
        let (max_idx, _) = powers.iter().enumerate().max_by(|a, b| a.1.partial_cmp(b.1).unwrap()).unwrap();
        assert_eq!(max_idx, 0); // preamble starts on the low tone
    }

    #[test]
    fn silence_is_not_decoded_as_a_symbol() {
        let spec = ModulationMode::Legacy.spec();
        let silence = vec![0i16; spec.samples_per_symbol];
        assert_eq!(decode_symbol(&silence, &spec), None);
    }

    #[test]
    fn round_trip_legacy_mode() {
        let spec = ModulationMode::Legacy.spec();
        let payload = b"hello modem";
        let samples = modulate(payload, &spec);
        let decoded = demodulate(&samples, &spec).expect("sync should be found");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn round_trip_robust_v1_mode() {
        let spec = ModulationMode::RobustV1.spec();
        let payload = b"robust payload with several bytes";
        let samples = modulate(payload, &spec);
        let decoded = demodulate(&samples, &spec).expect("sync should be found");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn round_trip_pcoip_safe_mode() {
        let spec = ModulationMode::PcoipSafe.spec();
        let payload = b"pcoip";
        let samples = modulate(payload, &spec);
        let decoded = demodulate(&samples, &spec).expect("sync should be found");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn round_trip_survives_leading_silence() {
        let spec = ModulationMode::Legacy.spec();
        let payload = b"leading silence";
        let mut samples = vec![0i16; spec.samples_per_symbol * 10];
        samples.extend(modulate(payload, &spec));
        let decoded = demodulate(&samples, &spec).expect("sync should be found past the silence");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn no_sync_word_present_returns_none() {
        let spec = ModulationMode::Legacy.spec();
        let samples = vec![0i16; spec.samples_per_symbol * 20];
        assert_eq!(demodulate(&samples, &spec), None);
    }

    #[test]
    fn empty_payload_round_trips() {
        let spec = ModulationMode::Legacy.spec();
        let samples = modulate(&[], &spec);
        let decoded = demodulate(&samples, &spec).expect("sync should be found");
        assert!(decoded.is_empty());
    }
}
