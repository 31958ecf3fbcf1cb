//! Shared glue for the four binaries: exactly the "external
//! collaborators" spec §1 calls out as out of scope for the library
//! core — terminal raw-mode toggling, `SIGWINCH`/`SIGINT` handling —
//! implemented once here instead of four times.

use crate::app::clip_session::LineSource;
use crate::app::pty_session::TerminalIo;
use crate::app::Shutdown;
use crate::error::ClipsshError;
use async_trait::async_trait;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::Read;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// Register `SIGINT`/`SIGTERM`/`SIGHUP` against `shutdown`, the same
/// `signal_hook::flag::register` pattern the teacher's own daemon
/// entry point uses, so a plain `kill` or Ctrl-C drains the session
/// instead of dropping the transport mid-write.
pub fn install_shutdown_signals(shutdown: &Shutdown) -> anyhow::Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, shutdown.raw_flag())?;
    flag::register(SIGTERM, shutdown.raw_flag())?;
    flag::register(SIGHUP, shutdown.raw_flag())?;
    Ok(())
}

/// Spawn a background thread translating `SIGWINCH` into terminal-size
/// samples on a channel, fed into [`crate::app::pty_session::run_client`]'s
/// `resize_rx` parameter. Runs for the life of the process; the
/// channel's receiver being dropped just stops consumption, not the
/// thread, which is fine since the process exits together with it.
pub fn spawn_resize_watcher() -> mpsc::Receiver<(u16, u16)> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::spawn(move || {
        use signal_hook::consts::signal::SIGWINCH;
        use signal_hook::iterator::Signals;
        let mut signals = match Signals::new([SIGWINCH]) {
            Ok(signals) => signals,
            Err(e) => {
                log::debug!("clipssh: failed to install SIGWINCH handler: {e}");
                return;
            }
        };
        for _ in signals.forever() {
            if let Ok((cols, rows)) = crossterm::terminal::size() {
                if tx.blocking_send((cols, rows)).is_err() {
                    break;
                }
            }
        }
    });
    rx
}

/// Line-oriented stdin reader for [`crate::app::clip_session::run_client_repl`].
pub struct StdinLineSource {
    lines: tokio::io::Lines<BufReader<tokio::io::Stdin>>,
}

impl Default for StdinLineSource {
    fn default() -> Self {
        Self { lines: BufReader::new(tokio::io::stdin()).lines() }
    }
}

#[async_trait]
impl LineSource for StdinLineSource {
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.lines.next_line().await
    }
}

/// Raw-mode terminal I/O for [`crate::app::pty_session::run_client`].
///
/// Stdin is read from a dedicated OS thread (raw-mode stdin reads are
/// blocking, same reasoning as [`crate::app::pty_session`]'s own PTY
/// reader thread) and bridged onto a bounded channel; stdout is written
/// directly since writes never block waiting on the user.
pub struct RawTerminalIo {
    input_rx: mpsc::Receiver<Vec<u8>>,
    stdout: tokio::io::Stdout,
    _raw_mode: RawModeGuard,
}

/// Disables raw mode on drop so a crash or early return never leaves
/// the user's shell in a broken terminal state.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> std::io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

impl RawTerminalIo {
    pub fn open() -> std::io::Result<Self> {
        let raw_mode = RawModeGuard::enable()?;
        let (tx, rx) = mpsc::channel(256);
        std::thread::spawn(move || {
            let mut stdin = std::io::stdin();
            let mut buf = [0u8; crate::constants::PTY_INPUT_CHUNK_MAX];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::debug!("clipssh: stdin reader thread: {e}");
                        break;
                    }
                }
            }
        });
        Ok(Self { input_rx: rx, stdout: tokio::io::stdout(), _raw_mode: raw_mode })
    }
}

#[async_trait]
impl TerminalIo for RawTerminalIo {
    async fn read(&mut self) -> std::io::Result<Vec<u8>> {
        Ok(self.input_rx.recv().await.unwrap_or_default())
    }

    async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.stdout.write_all(data).await?;
        self.stdout.flush().await
    }
}

/// Map a top-level [`ClipsshError`] to a process exit code (spec §6):
/// `0` normal, `1` fatal transport/config/protocol failure, `2` shell
/// spawn failure. `130` (user interrupt) is handled separately at the
/// signal layer, not here.
#[must_use]
pub fn exit_code_for_error(err: &ClipsshError) -> i32 {
    match err {
        ClipsshError::Session(message) if message.contains("shell") || message.contains("spawn") => 2,
        ClipsshError::Transport(_) | ClipsshError::Config(_) | ClipsshError::Session(_) | ClipsshError::Protocol(_) | ClipsshError::Timeout(_) => 1,
    }
}

/// Whether the process was asked to shut down via a signal, for the
/// binaries to distinguish "clean disconnect" from "user interrupt"
/// when choosing between exit code `0` and `130`.
#[must_use]
pub fn interrupted(shutdown: &Shutdown) -> bool {
    shutdown.is_set()
}
