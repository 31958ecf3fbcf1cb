//! `sshg` — interactive `gitssh/2` client over a pluggable transport
//! (spec §6): git, Google Drive, USB-serial, or the audio modem.

use anyhow::{Context, Result};
use clap::Parser;
use clipssh::app::pty_session;
use clipssh::audio::link::AudioLinkConfig;
use clipssh::audio::ModulationMode;
use clipssh::cli::RawTerminalIo;
use clipssh::transport::audio::{AudioNodeSelector, AudioTransportConfig};
use clipssh::session::Role;
use clipssh::transport::registry::{self, InteractiveTransportConfig, TransportKind};
use mimalloc::MiMalloc;
use std::path::PathBuf;
use std::time::Duration;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Interactive `gitssh/2` client.
#[derive(Parser, Debug)]
#[command(name = "sshg", version, about = "Interactive shell session over git/Drive/serial/audio")]
struct Args {
    /// Peer host (informational for git/Drive/serial; unused for the
    /// audio modem, which has no network addressing at all).
    host: String,

    /// Transport medium to use.
    #[arg(long, default_value = "git")]
    transport: String,

    /// Shared bare upstream repository URL (git transport).
    #[arg(long)]
    upstream_url: Option<String>,

    /// Local bare mirror path (git transport).
    #[arg(long)]
    local_repo: Option<PathBuf>,

    /// OAuth desktop-app client secrets file (Google Drive transport).
    #[arg(long)]
    drive_client_secrets: Option<PathBuf>,

    /// Persisted OAuth refresh token path (Google Drive transport).
    #[arg(long)]
    drive_token_path: Option<PathBuf>,

    /// Serial device path (USB-serial transport).
    #[arg(long)]
    serial_port: Option<String>,

    /// Modulation mode: auto, robust-v1, pcoip-safe, or legacy (audio-modem transport).
    #[arg(long = "audio-modulation", default_value = "auto")]
    audio_modulation: String,

    /// Repeat-code FEC factor (audio-modem transport).
    #[arg(long)]
    audio_byte_repeat: Option<u32>,

    /// Link-layer ACK timeout, in milliseconds (audio-modem transport).
    #[arg(long)]
    audio_ack_timeout_ms: Option<u64>,

    /// Maximum link-layer retries before surfacing a broken link (audio-modem transport).
    #[arg(long)]
    audio_max_retries: Option<u32>,

    /// Marker-run length for frame delimiting (audio-modem transport).
    #[arg(long)]
    audio_marker_run: Option<usize>,

    /// Capture node id to wire via `pw-link` (audio-modem transport, PipeWire client side).
    #[arg(long)]
    pw_capture_node_id: Option<u32>,

    /// Capture node name/regex match (audio-modem transport, PipeWire client side).
    #[arg(long)]
    pw_capture_match: Option<String>,

    /// Playback node id to wire via `pw-link` (audio-modem transport, PipeWire client side).
    #[arg(long)]
    pw_write_node_id: Option<u32>,

    /// Playback node name/regex match (audio-modem transport, PipeWire client side).
    #[arg(long)]
    pw_write_match: Option<String>,

    /// Read a WAV file instead of live capture (audio-modem transport).
    #[arg(long)]
    pw_capture_wav_path: Option<PathBuf>,

    /// Skip the PipeWire session-manager/port preflight check (audio-modem transport).
    #[arg(long)]
    skip_pw_preflight: bool,

    /// Emit `diag_ping` frames continuously for channel measurement (audio-modem transport).
    #[arg(long)]
    diag: bool,

    /// Interval between `diag_ping` frames, in milliseconds.
    #[arg(long, default_value_t = 500)]
    diag_interval_ms: u64,

    /// Number of `diag_ping` frames burst on connect to aid peer discovery.
    #[arg(long, default_value_t = 5)]
    diag_connect_burst: u32,

    /// Verbose logging (envelope kind/msg_id/seq, transport internals).
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn audio_config(args: &Args) -> Result<AudioTransportConfig> {
    let mut link = AudioLinkConfig::default();
    if args.audio_modulation == "auto" {
        link.auto = true;
    } else {
        link.auto = false;
        link.starting_mode = ModulationMode::parse(&args.audio_modulation).map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    if let Some(byte_repeat) = args.audio_byte_repeat {
        link.byte_repeat = byte_repeat;
    }
    if let Some(ack_timeout_ms) = args.audio_ack_timeout_ms {
        link.ack_timeout = Duration::from_millis(ack_timeout_ms);
    }
    if let Some(max_retries) = args.audio_max_retries {
        link.max_retries = max_retries;
    }
    if let Some(marker_run) = args.audio_marker_run {
        link.marker_run = marker_run;
    }

    Ok(AudioTransportConfig {
        link,
        capture_node: AudioNodeSelector { node_id: args.pw_capture_node_id, node_match: args.pw_capture_match.clone() },
        write_node: AudioNodeSelector { node_id: args.pw_write_node_id, node_match: args.pw_write_match.clone() },
        capture_wav_path: args.pw_capture_wav_path.clone(),
        skip_preflight: args.skip_pw_preflight,
        diag: args.diag,
        diag_interval: Duration::from_millis(args.diag_interval_ms),
        diag_connect_burst: args.diag_connect_burst,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    clipssh::logging::init(args.verbose);

    let kind = TransportKind::parse(&args.transport).map_err(|e| anyhow::anyhow!("{e}"))?;
    let audio = audio_config(&args)?;
    let config = InteractiveTransportConfig {
        git_local_repo: args.local_repo.clone(),
        git_upstream_url: args.upstream_url.clone(),
        drive_client_secrets: args.drive_client_secrets.clone(),
        drive_token_path: args.drive_token_path.clone(),
        serial_port: args.serial_port.clone(),
        audio,
    };

    let transport = registry::open(kind, Role::Client, config).await.context("failed to open transport")?;
    let retry_policy = kind.retry_policy();

    log::info!("sshg: connecting to {} over {:?}", args.host, kind);

    let terminal = Box::new(RawTerminalIo::open().context("failed to enable terminal raw mode")?);
    let initial_size = crossterm::terminal::size().unwrap_or((80, 24));
    let resize_rx = Some(clipssh::cli::spawn_resize_watcher());

    match pty_session::run_client(transport, retry_policy, terminal, initial_size, resize_rx).await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("sshg: {e}");
            std::process::exit(clipssh::cli::exit_code_for_error(&e));
        }
    }
}
