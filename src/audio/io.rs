//! Audio I/O backends: how PCM samples actually reach a speaker/mic.
//!
//! Server side drives PulseAudio directly via `parec`/`pacat` against
//! the default source/sink. Client side drives PipeWire via
//! `pw-cat`/`pw-link`, since that's what lets it target a specific
//! named capture/playback node instead of "whatever is default" — the
//! whole point of tunneling over "the speakers", as opposed to normal
//! audio chat, is usually that the operator has wired up a specific
//! loopback node by hand. `WavFileBackend` swaps live capture for
//! reading a fixture file, for testing and for `--pw-capture-wav-path`.

use crate::transport::TransportError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

/// A duplex PCM16 mono 48kHz sample source/sink.
#[async_trait]
pub trait AudioBackend: Send {
    /// Read up to `max_samples` i16 PCM samples. Returns fewer than
    /// requested (including zero) on a transient underrun; returns
    /// `Err` only if the backend itself has died.
    async fn capture(&mut self, max_samples: usize) -> Result<Vec<i16>, TransportError>;

    /// Write PCM samples for playback.
    async fn playback(&mut self, samples: &[i16]) -> Result<(), TransportError>;
}

/// Drives a long-lived child process that streams raw PCM16LE on
/// stdout (capture) or accepts it on stdin (playback).
pub struct ProcessAudioBackend {
    child: Child,
}

impl ProcessAudioBackend {
    /// Spawn `parec` (PulseAudio capture) against the default source.
    pub fn spawn_parec_capture() -> Result<Self, TransportError> {
        Self::spawn(Command::new("parec").args(["--raw", "--format=s16le", "--rate=48000", "--channels=1"]))
    }

    /// Spawn `pacat` (PulseAudio playback) against the default sink.
    pub fn spawn_pacat_playback() -> Result<Self, TransportError> {
        Self::spawn(Command::new("pacat").args(["--raw", "--format=s16le", "--rate=48000", "--channels=1"]))
    }

    /// Spawn `pw-cat --record` targeting a PipeWire node by numeric id.
    pub fn spawn_pw_cat_capture(node_id: Option<u32>, node_match: Option<&str>) -> Result<Self, TransportError> {
        let mut cmd = Command::new("pw-cat");
        cmd.args(["--record", "-", "--format=s16", "--rate=48000", "--channels=1"]);
        apply_node_selector(&mut cmd, node_id, node_match);
        Self::spawn(&mut cmd)
    }

    /// Spawn `pw-cat --playback` targeting a PipeWire node by numeric id.
    pub fn spawn_pw_cat_playback(node_id: Option<u32>, node_match: Option<&str>) -> Result<Self, TransportError> {
        let mut cmd = Command::new("pw-cat");
        cmd.args(["--playback", "-", "--format=s16", "--rate=48000", "--channels=1"]);
        apply_node_selector(&mut cmd, node_id, node_match);
        Self::spawn(&mut cmd)
    }

    fn spawn(cmd: &mut Command) -> Result<Self, TransportError> {
        let child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| TransportError::TransportSetup(format!("failed to spawn audio process: {e}")))?;
        Ok(Self { child })
    }
}

fn apply_node_selector(cmd: &mut Command, node_id: Option<u32>, node_match: Option<&str>) {
    if let Some(id) = node_id {
        cmd.args(["--target", &id.to_string()]);
    } else if let Some(pattern) = node_match {
        cmd.args(["--target", pattern]);
    }
}

#[async_trait]
impl AudioBackend for ProcessAudioBackend {
    async fn capture(&mut self, max_samples: usize) -> Result<Vec<i16>, TransportError> {
        let stdout = self
            .child
            .stdout
            .as_mut()
            .ok_or_else(|| TransportError::TransportBroken("audio process has no stdout".into()))?;
        let mut buf = vec![0u8; max_samples * 2];
        let n = stdout
            .read(&mut buf)
            .await
            .map_err(|e| TransportError::TransportBroken(format!("audio capture read failed: {e}")))?;
        Ok(bytes_to_samples(&buf[..n]))
    }

    async fn playback(&mut self, samples: &[i16]) -> Result<(), TransportError> {
        let stdin = self
            .child
            .stdin
            .as_mut()
            .ok_or_else(|| TransportError::TransportBroken("audio process has no stdin".into()))?;
        let bytes = samples_to_bytes(samples);
        stdin
            .write_all(&bytes)
            .await
            .map_err(|e| TransportError::TransportBroken(format!("audio playback write failed: {e}")))
    }
}

impl Drop for ProcessAudioBackend {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Reads PCM from a WAV file instead of a live device, downmixing
/// stereo to mono (spec §4.6 `pw_capture_wav_path`). Playback is a
/// no-op sink; this backend only makes sense client-side for capture.
pub struct WavFileBackend {
    samples: Vec<i16>,
    cursor: usize,
}

impl WavFileBackend {
    pub fn open(path: &std::path::Path) -> Result<Self, TransportError> {
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| TransportError::TransportSetup(format!("failed to open WAV file {}: {e}", path.display())))?;
        let spec = reader.spec();
        let raw: Vec<i32> = reader
            .samples::<i32>()
            .collect::<Result<_, _>>()
            .map_err(|e| TransportError::TransportSetup(format!("failed to read WAV samples: {e}")))?;

        let samples = match spec.channels {
            1 => raw.into_iter().map(|s| s as i16).collect(),
            channels => downmix_to_mono(&raw, channels as usize),
        };
        Ok(Self { samples, cursor: 0 })
    }
}

fn downmix_to_mono(raw: &[i32], channels: usize) -> Vec<i16> {
    raw.chunks_exact(channels)
        .map(|frame| {
            let sum: i64 = frame.iter().map(|&s| i64::from(s)).sum();
            (sum / channels as i64) as i16
        })
        .collect()
}

#[async_trait]
impl AudioBackend for WavFileBackend {
    async fn capture(&mut self, max_samples: usize) -> Result<Vec<i16>, TransportError> {
        let end = (self.cursor + max_samples).min(self.samples.len());
        let chunk = self.samples[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(chunk)
    }

    async fn playback(&mut self, _samples: &[i16]) -> Result<(), TransportError> {
        Ok(())
    }
}

fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect()
}

fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Verifies a PipeWire session manager is reachable before attempting
/// to open any nodes. Spec §4.6: "a preflight verifies a session
/// manager is present and that selected nodes have ports."
pub fn preflight_pipewire() -> Result<(), TransportError> {
    let output = std::process::Command::new("pw-cli")
        .arg("info")
        .output()
        .map_err(|e| TransportError::TransportSetup(format!("pw-cli not found: {e}")))?;
    if !output.status.success() {
        return Err(TransportError::TransportSetup(
            "pw-cli info failed: no PipeWire session manager reachable".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sample_round_trip() {
        let samples: Vec<i16> = vec![0, 1, -1, 12345, -12345, i16::MIN, i16::MAX];
        let bytes = samples_to_bytes(&samples);
        assert_eq!(bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn downmix_averages_channel_pairs() {
        let stereo = [100i32, 200, -100, -200];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono, vec![150, -150]);
    }
}
