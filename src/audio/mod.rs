//! L1a audio modem: FSK modulation over a lossy PCM path (spec §4.6).
//!
//! [`fec`] and [`modulate`]/[`demodulate`] are pure, sample-buffer-in
//! sample-buffer-out functions with no I/O, so the modem core is
//! exercised directly by unit tests without touching a sound card.
//! [`io`] holds the `AudioBackend` trait and its process-driven and
//! WAV-file implementations; [`link`] is the stateful layer that ties
//! framing, FEC, modulation and the `auto` mode downgrade ladder
//! together into a duplex byte pipe for `transport::audio`.

pub mod demodulate;
pub mod fec;
pub mod io;
pub mod link;
pub mod modulate;

use crate::constants::AUDIO_SAMPLE_RATE;

/// Selects a modem's carrier set, symbol rate and sync pattern.
///
/// `auto` (spec §4.6) is not a mode in this sense — it's a policy that
/// picks among `PcoipSafe`, `RobustV1` and `Legacy` at the [`link`]
/// layer and steps down after repeated NACKs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModulationMode {
    /// Plain 2-FSK: bit 0 = tone at f0, bit 1 = tone at f1.
    Legacy,
    /// 4-FSK with a Hamming-distance-2 bit mapping; longer symbol,
    /// wider guard tones. Designed to survive lossy voice codecs.
    RobustV1,
    /// Tuned 4-FSK variant: carriers placed outside the band OPUS voice
    /// activity detection tends to suppress. Higher throughput than
    /// `RobustV1` when the channel is stable.
    PcoipSafe,
}

impl ModulationMode {
    /// Parse one of `--audio-modulation`'s fixed-mode values
    /// (`legacy`/`robust-v1`/`pcoip-safe`). `auto` isn't a fixed mode —
    /// callers handle it by setting [`crate::audio::link::AudioLinkConfig::auto`]
    /// and starting from [`Self::PcoipSafe`] instead of calling this.
    pub fn parse(value: &str) -> Result<Self, crate::transport::TransportError> {
        match value {
            "legacy" => Ok(Self::Legacy),
            "robust-v1" => Ok(Self::RobustV1),
            "pcoip-safe" => Ok(Self::PcoipSafe),
            other => Err(crate::transport::TransportError::TransportSetup(format!(
                "unknown --audio-modulation {other:?} (expected auto, robust-v1, pcoip-safe, or legacy)"
            ))),
        }
    }

    /// `auto`'s downgrade ladder: start optimistic, fall back stepwise.
    /// Upgrading back up is never automatic within a session.
    #[must_use]
    pub fn next_downgrade(self) -> Option<Self> {
        match self {
            Self::PcoipSafe => Some(Self::RobustV1),
            Self::RobustV1 => Some(Self::Legacy),
            Self::Legacy => None,
        }
    }

    #[must_use]
    pub fn spec(self) -> ModeSpec {
        match self {
            Self::Legacy => ModeSpec {
                carriers: vec![1_200.0, 2_200.0],
                bits_per_symbol: 1,
                samples_per_symbol: 40, // 48kHz / 40 = 1200 baud
                preamble_symbols: 32,
                sync_word: 0xB2_A5,
            },
            Self::RobustV1 => ModeSpec {
                carriers: vec![600.0, 1_000.0, 1_400.0, 1_800.0],
                bits_per_symbol: 2,
                samples_per_symbol: 240, // 48kHz / 240 = 200 baud/symbol
                preamble_symbols: 48,
                sync_word: 0xB2_A5,
            },
            Self::PcoipSafe => ModeSpec {
                carriers: vec![3_300.0, 3_700.0, 4_100.0, 4_500.0],
                bits_per_symbol: 2,
                samples_per_symbol: 120, // 48kHz / 120 = 400 baud/symbol
                preamble_symbols: 48,
                sync_word: 0xB2_A5,
            },
        }
    }
}

/// Concrete modulation parameters for one [`ModulationMode`].
///
/// `carriers.len()` is always `2.pow(bits_per_symbol)`: one tone per
/// possible symbol value. The bit-to-tone-index mapping a 4-FSK mode
/// uses is [`symbol_to_bits`]/[`bits_to_symbol`], chosen so confusing a
/// tone with its immediate frequency neighbor flips both symbol bits
/// rather than one, making single-tone misdetections easier to catch
/// at the CRC rather than silently decoding to an adjacent value.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSpec {
    /// Carrier frequencies in Hz, one per symbol value (index = value).
    pub carriers: Vec<f32>,
    /// Bits encoded per symbol (`1` for legacy 2-FSK, `2` for 4-FSK).
    pub bits_per_symbol: u32,
    /// Samples per symbol at [`AUDIO_SAMPLE_RATE`].
    pub samples_per_symbol: usize,
    /// Number of alternating-tone symbols in the lock-on preamble.
    pub preamble_symbols: usize,
    /// Bit pattern (read as `bits_per_symbol`-wide symbols, MSB first)
    /// marking the end of the preamble and the start of framed data.
    pub sync_word: u16,
}

impl ModeSpec {
    #[must_use]
    pub fn symbol_duration_secs(&self) -> f32 {
        self.samples_per_symbol as f32 / AUDIO_SAMPLE_RATE as f32
    }

    #[must_use]
    pub fn symbol_count(&self) -> usize {
        1 << self.bits_per_symbol
    }

    /// Sync word re-expressed as a sequence of symbol values (MSB
    /// first), for the demodulator's sliding match against decoded
    /// symbols.
    #[must_use]
    pub fn sync_symbols(&self) -> Vec<u8> {
        bits_to_symbols(self.sync_word, 16, self.bits_per_symbol)
    }
}

/// Maps a symbol value to its tone-index Hamming-distance-2 bit code.
///
/// For 4-FSK (`bits_per_symbol == 2`) the four carriers are assigned
/// codes `00, 11, 01, 10` in increasing frequency order: the two
/// *most* likely confusions (adjacent carriers) differ by two bits,
/// not one, from one neighbor and by one bit from the other — the best
/// achievable spread for a 4-point constellation. For 2-FSK the
/// mapping is the identity.
#[must_use]
pub fn symbol_to_bits(symbol: u8, bits_per_symbol: u32) -> u8 {
    match bits_per_symbol {
        1 => symbol & 0b1,
        2 => match symbol & 0b11 {
            0 => 0b00,
            1 => 0b11,
            2 => 0b01,
            3 => 0b10,
            _ => unreachable!(),
        },
        _ => symbol,
    }
}

/// Inverse of [`symbol_to_bits`]: bit code back to carrier-index symbol.
#[must_use]
pub fn bits_to_symbol(bits: u8, bits_per_symbol: u32) -> u8 {
    match bits_per_symbol {
        1 => bits & 0b1,
        2 => match bits & 0b11 {
            0b00 => 0,
            0b11 => 1,
            0b01 => 2,
            0b10 => 3,
            _ => unreachable!(),
        },
        _ => bits,
    }
}

/// Split a big-endian value's low `width` bits into `bits_per_symbol`
/// wide groups, most-significant group first.
pub(crate) fn bits_to_symbols(value: u16, width: u32, bits_per_symbol: u32) -> Vec<u8> {
    let mut symbols = Vec::with_capacity((width / bits_per_symbol) as usize);
    let mut shift = width as i32 - bits_per_symbol as i32;
    while shift >= 0 {
        let mask = ((1u32 << bits_per_symbol) - 1) as u16;
        let chunk = ((value >> shift) as u16 & mask) as u8;
        symbols.push(chunk);
        shift -= bits_per_symbol as i32;
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downgrade_ladder_terminates_at_legacy() {
        assert_eq!(ModulationMode::PcoipSafe.next_downgrade(), Some(ModulationMode::RobustV1));
        assert_eq!(ModulationMode::RobustV1.next_downgrade(), Some(ModulationMode::Legacy));
        assert_eq!(ModulationMode::Legacy.next_downgrade(), None);
    }

    #[test]
    fn parse_accepts_every_fixed_mode_name() {
        assert_eq!(ModulationMode::parse("legacy").unwrap(), ModulationMode::Legacy);
        assert_eq!(ModulationMode::parse("robust-v1").unwrap(), ModulationMode::RobustV1);
        assert_eq!(ModulationMode::parse("pcoip-safe").unwrap(), ModulationMode::PcoipSafe);
        assert!(ModulationMode::parse("auto").is_err());
        assert!(ModulationMode::parse("bogus").is_err());
    }

    #[test]
    fn four_fsk_bit_mapping_round_trips_all_symbols() {
        for symbol in 0u8..4 {
            let bits = symbol_to_bits(symbol, 2);
            assert_eq!(bits_to_symbol(bits, 2), symbol);
        }
    }

    #[test]
    fn adjacent_symbols_differ_by_two_bits_at_least_once() {
        // Neighboring carrier indices (0-1, 1-2, 2-3) are the pairs most
        // likely to be confused by Goertzel energy leakage; at least one
        // of those pairs must have a 2-bit-distant code, otherwise the
        // mapping offers no advantage over naive binary counting.
        let mut max_distance = 0;
        for pair in [(0u8, 1u8), (1, 2), (2, 3)] {
            let a = symbol_to_bits(pair.0, 2);
            let b = symbol_to_bits(pair.1, 2);
            let distance = (a ^ b).count_ones();
            max_distance = max_distance.max(distance);
        }
        assert_eq!(max_distance, 2);
    }

    #[test]
    fn carrier_count_matches_symbol_count() {
        for mode in [ModulationMode::Legacy, ModulationMode::RobustV1, ModulationMode::PcoipSafe] {
            let spec = mode.spec();
            assert_eq!(spec.carriers.len(), spec.symbol_count());
        }
    }

    #[test]
    fn sync_symbols_round_trip_through_bits_to_symbols() {
        let spec = ModulationMode::RobustV1.spec();
        let symbols = spec.sync_symbols();
        assert_eq!(symbols.len(), 16 / 2);
    }
}
