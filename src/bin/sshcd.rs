//! `sshcd` — clipboard-transport `CLIPSSH/1` server (spec §6).
//!
//! Accepts one session at a time forever: each completed or dropped
//! connection returns the server to idle, ready for the next
//! `connect_req` on the clipboard.

use anyhow::{Context, Result};
use clap::Parser;
use clipssh::app::clip_session;
use clipssh::app::{RetryPolicy, Shutdown};
use clipssh::transport::clipboard::{ClipboardBackend, ClipboardTransport, ClipboardTransportConfig};
use mimalloc::MiMalloc;
use std::time::Duration;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Clipboard-transport `CLIPSSH/1` server.
#[derive(Parser, Debug)]
#[command(name = "sshcd", version, about = "Clipboard-transport command/reply server")]
struct Args {
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

    let shutdown = Shutdown::new();
    clipssh::cli::install_shutdown_signals(&shutdown)?;

    log::info!("sshcd: listening on the clipboard, one session at a time");
    match clip_session::run_server(Box::new(transport), RetryPolicy::L3Retry, shutdown.clone()).await {
        Ok(()) => {
            if clipssh::cli::interrupted(&shutdown) {
                std::process::exit(130);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("sshcd: {e}");
            std::process::exit(clipssh::cli::exit_code_for_error(&e));
        }
    }
}
