//! Audio-modem transport (spec §4.6): wraps [`crate::audio::link::AudioLink`]
//! in the [`Transport`] contract, plus the `-diag` diagnostics ladder
//! (continuous `diag_ping` bursts, a connect-time burst to aid peer
//! discovery) and the envelope<->raw-payload boundary the link layer
//! itself doesn't know about.

use crate::audio::io::{AudioBackend, ProcessAudioBackend, WavFileBackend};
use crate::audio::link::{AudioLink, AudioLinkConfig};
use crate::audio::ModulationMode;
use crate::session::envelope::{Envelope, Role};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Which PipeWire/PulseAudio node (or WAV fixture) backs capture and
/// playback (spec §4.6 "I/O backends" and §6 `--pw-*` flags).
#[derive(Debug, Clone, Default)]
pub struct AudioNodeSelector {
    pub node_id: Option<u32>,
    pub node_match: Option<String>,
}

/// Full set of tunables for opening an [`AudioTransport`] (spec §6
/// `--audio-*`/`--pw-*`/`-diag` flags).
#[derive(Debug, Clone)]
pub struct AudioTransportConfig {
    pub link: AudioLinkConfig,
    pub capture_node: AudioNodeSelector,
    pub write_node: AudioNodeSelector,
    pub capture_wav_path: Option<PathBuf>,
    pub skip_preflight: bool,
    pub diag: bool,
    pub diag_interval: Duration,
    pub diag_connect_burst: u32,
}

impl Default for AudioTransportConfig {
    fn default() -> Self {
        Self {
            link: AudioLinkConfig::default(),
            capture_node: AudioNodeSelector::default(),
            write_node: AudioNodeSelector::default(),
            capture_wav_path: None,
            skip_preflight: false,
            diag: false,
            diag_interval: crate::constants::DIAG_INTERVAL,
            diag_connect_burst: crate::constants::DIAG_CONNECT_BURST,
        }
    }
}

/// Duplex envelope transport over a PCM audio path (spec §4.6).
///
/// Server side drives PulseAudio directly (`parec`/`pacat` against the
/// default source/sink); client side drives PipeWire
/// (`pw-cat`/`pw-link` against a node chosen by id or regex). Both
/// share the same [`AudioLink`] once a backend is open.
pub struct AudioTransport {
    link: AudioLink,
    diag_frame_seq: u32,
    diag_next_at: Option<std::time::Instant>,
    config_diag: bool,
    diag_interval: Duration,
}

impl AudioTransport {
    /// Open the server-side backend: PulseAudio via `parec`/`pacat`.
    pub fn open_server(config: AudioTransportConfig) -> Result<Self, TransportError> {
        let capture: Box<dyn AudioBackend> = Box::new(ProcessAudioBackend::spawn_parec_capture()?);
        let playback: Box<dyn AudioBackend> = Box::new(ProcessAudioBackend::spawn_pacat_playback()?);
        Self::assemble(DuplexBackend::new(capture, playback), config)
    }

    /// Open the client-side backend: PipeWire via `pw-cat`, or a WAV
    /// fixture in place of live capture (spec §4.6
    /// `pw_capture_wav_path`).
    pub fn open_client(config: AudioTransportConfig) -> Result<Self, TransportError> {
        if !config.skip_preflight {
            crate::audio::io::preflight_pipewire()?;
        }

        let capture: Box<dyn AudioBackend> = if let Some(wav_path) = &config.capture_wav_path {
            Box::new(WavFileBackend::open(wav_path)?)
        } else {
            Box::new(ProcessAudioBackend::spawn_pw_cat_capture(
                config.capture_node.node_id,
                config.capture_node.node_match.as_deref(),
            )?)
        };
        let playback: Box<dyn AudioBackend> = Box::new(ProcessAudioBackend::spawn_pw_cat_playback(
            config.write_node.node_id,
            config.write_node.node_match.as_deref(),
        )?);
        Self::assemble(DuplexBackend::new(capture, playback), config)
    }

    fn assemble(backend: DuplexBackend, config: AudioTransportConfig) -> Result<Self, TransportError> {
        let diag = config.diag;
        let diag_interval = config.diag_interval;
        let link = AudioLink::new(Box::new(backend), config.link);
        Ok(Self {
            link,
            diag_frame_seq: 0,
            diag_next_at: diag.then(|| std::time::Instant::now()),
            config_diag: diag,
            diag_interval,
        })
    }

    #[must_use]
    pub fn current_mode(&self) -> ModulationMode {
        self.link.current_mode()
    }

    /// Emit `diag_connect_burst` `diag_ping` frames back-to-back, used
    /// by the client right after connecting to help the server's
    /// energy-floor tracking lock on quickly (spec §4.6).
    pub async fn send_connect_burst(&mut self, count: u32) -> Result<(), TransportError> {
        for _ in 0..count {
            let frame_seq = self.diag_frame_seq;
            self.diag_frame_seq = self.diag_frame_seq.wrapping_add(1);
            let payload = crate::audio::link::diag_ping_frame(frame_seq);
            self.link.transmit_frame_best_effort(&payload).await;
        }
        Ok(())
    }

    /// Send a `diag_ping` if `-diag` mode is active and the interval has
    /// elapsed. Call this opportunistically from the transport's
    /// driving loop; a no-op when diagnostics are off.
    pub async fn maybe_send_diag_ping(&mut self) {
        if !self.config_diag {
            return;
        }
        let Some(next_at) = self.diag_next_at else { return };
        if std::time::Instant::now() < next_at {
            return;
        }
        let frame_seq = self.diag_frame_seq;
        self.diag_frame_seq = self.diag_frame_seq.wrapping_add(1);
        let frame = crate::audio::link::diag_ping_frame(frame_seq);
        self.link.transmit_frame_best_effort(&frame).await;
        self.diag_next_at = Some(std::time::Instant::now() + self.diag_interval);
    }
}

#[async_trait]
impl Transport for AudioTransport {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let json = envelope
            .encode()
            .map_err(|e| TransportError::Encoding(format!("failed to encode envelope: {e}")))?;
        self.link.transmit(json.as_bytes()).await
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Envelope, TransportError> {
        let payload = self.link.receive(timeout).await?;
        let json = std::str::from_utf8(&payload).map_err(|e| TransportError::Encoding(format!("audio payload is not UTF-8: {e}")))?;
        Envelope::decode(json).map_err(|e| TransportError::Encoding(format!("failed to decode audio envelope: {e}")))
    }

    async fn close(&mut self) {}
}

/// Marries a capture backend and a playback backend that may be two
/// distinct child processes (PipeWire client side: one `pw-cat
/// --record`, one `pw-cat --playback`) into a single [`AudioBackend`].
struct DuplexBackend {
    capture: Box<dyn AudioBackend>,
    playback: Box<dyn AudioBackend>,
}

impl DuplexBackend {
    fn new(capture: Box<dyn AudioBackend>, playback: Box<dyn AudioBackend>) -> Self {
        Self { capture, playback }
    }
}

#[async_trait]
impl AudioBackend for DuplexBackend {
    async fn capture(&mut self, max_samples: usize) -> Result<Vec<i16>, TransportError> {
        self.capture.capture(max_samples).await
    }

    async fn playback(&mut self, samples: &[i16]) -> Result<(), TransportError> {
        self.playback.playback(samples).await
    }
}

/// Which role the peer-discovery node selector / `pw-link` wiring
/// should apply to; kept here rather than in `audio::io` since it's a
/// transport-level (not backend-level) concept.
#[must_use]
pub fn default_role_diag_burst(role: Role, config: &AudioTransportConfig) -> u32 {
    match role {
        Role::Client => config.diag_connect_burst,
        Role::Server => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_carries_spec_defaults() {
        let config = AudioTransportConfig::default();
        assert_eq!(config.link.byte_repeat, crate::constants::DEFAULT_BYTE_REPEAT);
        assert_eq!(config.diag_connect_burst, crate::constants::DIAG_CONNECT_BURST);
        assert!(!config.diag);
    }

    #[test]
    fn connect_burst_only_fires_for_the_client() {
        let config = AudioTransportConfig::default();
        assert_eq!(default_role_diag_burst(Role::Client, &config), crate::constants::DIAG_CONNECT_BURST);
        assert_eq!(default_role_diag_burst(Role::Server, &config), 0);
    }
}
