//! `sshc` — clipboard-transport `CLIPSSH/1` client (spec §6).
//!
//! Connects once, then reads commands from stdin one line at a time
//! and runs each through the same session (command/reply only — no
//! PTY, per spec's clipboard-transport non-goal), printing streamed
//! stdout/stderr as it arrives.

use anyhow::{Context, Result};
use clap::Parser;
use clipssh::app::clip_session;
use clipssh::app::RetryPolicy;
use clipssh::cli::StdinLineSource;
use clipssh::transport::clipboard::{ClipboardBackend, ClipboardTransport, ClipboardTransportConfig};
use mimalloc::MiMalloc;
use std::time::Duration;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Clipboard-transport `CLIPSSH/1` client.
#[derive(Parser, Debug)]
#[command(name = "sshc", version, about = "Clipboard-transport command/reply client")]
struct Args {
    /// Peer host (informational — the clipboard medium has no
    /// addressing of its own; whichever `sshcd` shares the clipboard
    /// is the peer).
    host: String,

    /// Clipboard backend to use.
    #[arg(long, default_value = "auto")]
    clipboard_backend: String,

    /// Steady-state clipboard read timeout, in seconds.
    #[arg(long, default_value_t = 2.0)]
    clipboard_read_timeout: f64,

    /// Steady-state clipboard write timeout, in seconds.
    #[arg(long, default_value_t = 2.0)]
    clipboard_write_timeout: f64,

    /// Backend-selection round-trip probe read timeout, in seconds.
    #[arg(long, default_value_t = 1.0)]
    clipboard_probe_read_timeout: f64,

    /// Backend-selection round-trip probe write timeout, in seconds.
    #[arg(long, default_value_t = 1.0)]
    clipboard_probe_write_timeout: f64,

    /// Verbose logging (envelope kind/msg_id/seq, transport internals).
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    clipssh::logging::init(args.verbose);

    let backend = ClipboardBackend::parse(&args.clipboard_backend).map_err(|e| anyhow::anyhow!("{e}"))?;
    let config = ClipboardTransportConfig {
        poll_interval: clipssh::constants::CLIPBOARD_POLL_INTERVAL,
        read_timeout: Duration::from_secs_f64(args.clipboard_read_timeout),
        write_timeout: Duration::from_secs_f64(args.clipboard_write_timeout),
        probe_read_timeout: Duration::from_secs_f64(args.clipboard_probe_read_timeout),
        probe_write_timeout: Duration::from_secs_f64(args.clipboard_probe_write_timeout),
    };

    let transport = ClipboardTransport::open(backend, config)
        .await
        .context("failed to open clipboard transport (is a clipboard tool installed? wl-copy/wl-paste, xsel, or xclip)")?;

    log::info!("sshc: connecting to {} over the clipboard", args.host);
    let lines = Box::new(StdinLineSource::default());
    let prompt = format!("{}> ", args.host);

    match clip_session::run_client_repl(Box::new(transport), RetryPolicy::L3Retry, lines, &prompt).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("sshc: {e}");
            std::process::exit(clipssh::cli::exit_code_for_error(&e));
        }
    }
}
