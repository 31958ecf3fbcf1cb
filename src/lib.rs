//! `clipssh` — a local "SSH emulator" that tunnels one interactive shell
//! session over unconventional side-channels: the system clipboard, a
//! shared bare git repo, a pair of Google Drive log files, a USB-serial
//! port, or a PCM audio modem.
//!
//! The crate is layered bottom-up:
//!
//! - [`link`] — byte-level framing shared by the serial and audio
//!   transports (marker delimiting, COBS, CRC32).
//! - [`audio`] — the PCM modem: FSK/4-FSK modulation, Goertzel
//!   demodulation, and repeat-code forward error correction.
//! - [`transport`] — the [`transport::Transport`] trait and one adapter
//!   per medium (clipboard, git, Drive, serial, audio).
//! - [`session`] — the `gitssh/2` / `CLIPSSH/1` envelope format, retry
//!   queue, dedup window, and sequence generator.
//! - [`app`] — the two application protocols built on top: an
//!   interactive PTY session and a one-shot command/reply session.
//! - [`cli`] — the binary-layer glue (raw-mode stdin/stdout, signal
//!   handling) that the four `src/bin` entry points share.
//!
//! See `SPEC_FULL.md` in the repository root for the full design.

pub mod app;
pub mod audio;
pub mod cli;
pub mod config;
pub mod constants;
pub mod env;
pub mod error;
pub mod link;
pub mod logging;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::ClipsshError;
pub use session::envelope::Envelope;
pub use transport::{Transport, TransportError};
