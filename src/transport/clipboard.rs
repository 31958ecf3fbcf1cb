//! Clipboard transport (spec §4.2): the system clipboard as the medium,
//! driven by `wl-copy`/`wl-paste` under Wayland or `xclip`/`xsel` under
//! X11.
//!
//! Every send/recv shells out to a short-lived subprocess rather than
//! holding a long-running reader, following the teacher's
//! one-shot-`Command`-per-operation style (`git.rs`) rather than the
//! continuous child-process streaming used for PCM audio I/O.

use crate::constants::CLIPBOARD_WIRE_PREFIX;
use crate::session::envelope::Envelope;
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Which pair of clipboard CLI tools to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardBackend {
    Wayland,
    Xsel,
    Xclip,
}

impl ClipboardBackend {
    /// Parse `--clipboard-backend`'s accepted values. `auto` defers to
    /// [`Self::detect`] and so has no fixed variant; everything else
    /// pins a specific backend.
    pub fn parse(value: &str) -> Result<Option<Self>, TransportError> {
        match value {
            "auto" => Ok(None),
            "wayland" => Ok(Some(Self::Wayland)),
            "xclip" => Ok(Some(Self::Xclip)),
            "xsel" => Ok(Some(Self::Xsel)),
            other => Err(TransportError::TransportSetup(format!(
                "unknown --clipboard-backend {other:?} (expected auto, wayland, xclip, or xsel)"
            ))),
        }
    }

    /// Pick a backend per spec §4.2: `WAYLAND_DISPLAY` set → wayland;
    /// otherwise X11, preferring `xsel` then `xclip`.
    pub async fn detect() -> Result<Self, TransportError> {
        if std::env::var_os("WAYLAND_DISPLAY").is_some() && binary_exists("wl-copy").await && binary_exists("wl-paste").await {
            return Ok(Self::Wayland);
        }
        if binary_exists("xsel").await {
            return Ok(Self::Xsel);
        }
        if binary_exists("xclip").await {
            return Ok(Self::Xclip);
        }
        Err(TransportError::TransportSetup("no usable clipboard backend found (need wl-copy/wl-paste, xsel, or xclip)".into()))
    }

    async fn read(self, timeout: Duration) -> Result<String, TransportError> {
        let (program, args): (&str, &[&str]) = match self {
            Self::Wayland => ("wl-paste", &["--no-newline"]),
            Self::Xsel => ("xsel", &["-b", "-o"]),
            Self::Xclip => ("xclip", &["-selection", "clipboard", "-o"]),
        };
        run_capturing_stdout(program, args, timeout).await
    }

    async fn write(self, content: &str, timeout: Duration) -> Result<(), TransportError> {
        let (program, args): (&str, &[&str]) = match self {
            Self::Wayland => ("wl-copy", &[]),
            Self::Xsel => ("xsel", &["-b", "-i"]),
            Self::Xclip => ("xclip", &["-selection", "clipboard", "-i"]),
        };
        run_feeding_stdin(program, args, content, timeout).await
    }
}

async fn binary_exists(name: &str) -> bool {
    Command::new("which").arg(name).output().await.is_ok_and(|o| o.status.success())
}

async fn run_capturing_stdout(program: &str, args: &[&str], read_timeout: Duration) -> Result<String, TransportError> {
    let output = tokio::time::timeout(read_timeout, Command::new(program).args(args).output())
        .await
        .map_err(|_| TransportError::TransportBroken(format!("{program} timed out")))?
        .map_err(|e| TransportError::TransportBroken(format!("failed to run {program}: {e}")))?;
    if !output.status.success() {
        return Err(TransportError::TransportBroken(format!("{program} exited with {}", output.status)));
    }
    String::from_utf8(output.stdout).map_err(|e| TransportError::Encoding(format!("{program} produced non-UTF8 output: {e}")))
}

async fn run_feeding_stdin(program: &str, args: &[&str], content: &str, write_timeout: Duration) -> Result<(), TransportError> {
    use std::process::Stdio;
    use tokio::io::AsyncWriteExt as _;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|e| TransportError::TransportBroken(format!("failed to spawn {program}: {e}")))?;

    let mut stdin = child.stdin.take().expect("stdin was piped");
    let content = content.to_string();
    tokio::time::timeout(write_timeout, async move {
        stdin.write_all(content.as_bytes()).await?;
        stdin.shutdown().await
    })
    .await
    .map_err(|_| TransportError::TransportBroken(format!("{program} write timed out")))?
    .map_err(|e| TransportError::TransportBroken(format!("failed to write to {program}: {e}")))?;

    let status = child
        .wait()
        .await
        .map_err(|e| TransportError::TransportBroken(format!("failed to wait on {program}: {e}")))?;
    if !status.success() {
        return Err(TransportError::TransportBroken(format!("{program} exited with {status}")));
    }
    Ok(())
}

/// Tunable clipboard parameters (spec §6 `--clipboard-*` flags).
#[derive(Debug, Clone)]
pub struct ClipboardTransportConfig {
    pub poll_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub probe_read_timeout: Duration,
    pub probe_write_timeout: Duration,
}

impl Default for ClipboardTransportConfig {
    fn default() -> Self {
        Self {
            poll_interval: crate::constants::CLIPBOARD_POLL_INTERVAL,
            read_timeout: crate::constants::CLIPBOARD_READ_TIMEOUT,
            write_timeout: crate::constants::CLIPBOARD_WRITE_TIMEOUT,
            probe_read_timeout: crate::constants::CLIPBOARD_PROBE_READ_TIMEOUT,
            probe_write_timeout: crate::constants::CLIPBOARD_PROBE_WRITE_TIMEOUT,
        }
    }
}

pub struct ClipboardTransport {
    backend: ClipboardBackend,
    config: ClipboardTransportConfig,
    last_sent: Option<String>,
    last_received: Option<String>,
}

impl ClipboardTransport {
    pub async fn open(backend: Option<ClipboardBackend>, config: ClipboardTransportConfig) -> Result<Self, TransportError> {
        let backend = match backend {
            Some(backend) => backend,
            None => ClipboardBackend::detect().await?,
        };
        probe_round_trip(backend, config.probe_write_timeout, config.probe_read_timeout).await?;
        Ok(Self {
            backend,
            config,
            last_sent: None,
            last_received: None,
        })
    }
}

/// Confirm the chosen backend actually works end to end before trusting
/// it for the session (spec §4.2: "a backend is selected only if a
/// round-trip write/read test passes").
async fn probe_round_trip(backend: ClipboardBackend, write_timeout: Duration, read_timeout: Duration) -> Result<(), TransportError> {
    let probe = format!("clipssh-probe-{}", uuid::Uuid::new_v4());
    backend.write(&probe, write_timeout).await?;
    let read_back = backend.read(read_timeout).await?;
    if read_back.trim() != probe {
        return Err(TransportError::TransportSetup(format!("{backend:?} round-trip probe failed")));
    }
    Ok(())
}

#[async_trait]
impl Transport for ClipboardTransport {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let json = envelope
            .encode()
            .map_err(|e| TransportError::Encoding(format!("failed to encode envelope: {e}")))?;
        let line = format!("{CLIPBOARD_WIRE_PREFIX}{}", STANDARD.encode(json));

        // One write per call: placing the envelope on the clipboard is
        // the whole of this trait's contract. The retransmit-until-reply
        // behavior spec §4.2 describes lives in `session::retry::RetryQueue`,
        // which re-invokes `send` on the same backoff schedule.
        self.backend.write(&line, self.config.write_timeout).await?;
        self.last_sent = Some(line);
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Envelope, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout("clipboard: no new content observed".into()));
            }

            let content = self.backend.read(self.config.read_timeout).await?;
            let trimmed = content.trim();

            let is_new = self.last_received.as_deref() != Some(trimmed) && self.last_sent.as_deref() != Some(trimmed);
            if is_new {
                if let Some(encoded) = trimmed.strip_prefix(CLIPBOARD_WIRE_PREFIX) {
                    self.last_received = Some(trimmed.to_string());
                    match decode_wire_line(encoded) {
                        Ok(envelope) => return Ok(envelope),
                        Err(e) => log::debug!("clipssh: dropped malformed clipboard payload: {e}"),
                    }
                }
                // Non-protocol content: mark seen so we don't keep
                // re-evaluating it, then keep polling.
                self.last_received = Some(trimmed.to_string());
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn close(&mut self) {}
}

fn decode_wire_line(encoded: &str) -> Result<Envelope, TransportError> {
    let bytes = STANDARD.decode(encoded).map_err(|e| TransportError::Encoding(format!("invalid base64 on clipboard: {e}")))?;
    let json = String::from_utf8(bytes).map_err(|e| TransportError::Encoding(format!("clipboard payload is not UTF-8: {e}")))?;
    Envelope::decode(&json).map_err(|e| TransportError::Encoding(format!("failed to decode clipboard envelope: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::envelope::{Kind, Protocol, Role};

    #[test]
    fn wire_line_round_trips_through_base64() {
        let envelope = Envelope::new(Protocol::ClipsshV1, Kind::Cmd { text: "ls".into() }, "s1".into(), 0, Role::Client);
        let json = envelope.encode().expect("encode");
        let line = format!("{CLIPBOARD_WIRE_PREFIX}{}", STANDARD.encode(&json));
        let encoded = line.strip_prefix(CLIPBOARD_WIRE_PREFIX).expect("prefix");
        let decoded = decode_wire_line(encoded).expect("decode");
        assert_eq!(decoded.msg_id, envelope.msg_id);
    }

    #[test]
    fn non_protocol_content_is_rejected_by_decode() {
        assert!(decode_wire_line("not valid base64!!").is_err());
    }

    #[test]
    fn parse_accepts_every_documented_backend_name() {
        assert_eq!(ClipboardBackend::parse("auto").unwrap(), None);
        assert_eq!(ClipboardBackend::parse("wayland").unwrap(), Some(ClipboardBackend::Wayland));
        assert_eq!(ClipboardBackend::parse("xclip").unwrap(), Some(ClipboardBackend::Xclip));
        assert_eq!(ClipboardBackend::parse("xsel").unwrap(), Some(ClipboardBackend::Xsel));
    }

    #[test]
    fn parse_rejects_unknown_backend_names() {
        assert!(ClipboardBackend::parse("carrier-pigeon").is_err());
    }
}
