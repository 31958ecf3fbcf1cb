//! Application-wide constants for clipssh.
//!
//! Centralizes magic numbers so timeouts, window sizes, and protocol
//! constants are discoverable in one place instead of scattered as
//! literals across the transport and session modules.
//!
//! # Categories
//!
//! - **Protocol**: envelope/session constants shared by both protocols
//! - **Dedup / reorder**: receiver-side windows
//! - **Retry**: clipboard/git/drive retry schedule
//! - **Transports**: per-medium polling intervals and timeouts

use std::time::Duration;

// ============================================================================
// Protocol identifiers
// ============================================================================

/// Protocol string for the command/reply (clipboard) protocol.
pub const PROTOCOL_CLIPSSH_V1: &str = "CLIPSSH/1";

/// Protocol string for the interactive PTY protocol.
pub const PROTOCOL_GITSSH_V2: &str = "gitssh/2";

// ============================================================================
// Dedup / reorder
// ============================================================================

/// Capacity of the receiver's `msg_id` dedup window (LRU).
///
/// Bounds memory use while comfortably covering a session's worth of
/// retransmitted envelopes before the oldest entries are evicted.
pub const DEDUP_WINDOW_CAPACITY: usize = 4096;

/// Reorder window for out-of-order delivery over clipboard/git/drive.
///
/// Arrivals more than this many sequence numbers behind the current
/// delivery cursor are treated as stale and dropped rather than buffered
/// indefinitely.
pub const REORDER_WINDOW: u64 = 32;

// ============================================================================
// Retry (clipboard / git / drive)
// ============================================================================

/// Retry backoff schedule for L3 retransmission on best-effort transports.
///
/// After the last entry is exhausted, the interval repeats at the final
/// value until [`RETRY_MAX_ATTEMPTS`] is reached.
pub const RETRY_BACKOFF_SCHEDULE_MS: &[u64] = &[500, 1_000, 2_000, 4_000];

/// Maximum retransmission attempts before L3 gives up and emits a local
/// `error`.
pub const RETRY_MAX_ATTEMPTS: u32 = 12;

// ============================================================================
// Bounded queues
// ============================================================================

/// Capacity of the bounded inter-task envelope queues (§5).
///
/// Producers block (back-pressure) once a queue fills, rather than
/// dropping or growing unbounded.
pub const QUEUE_CAPACITY: usize = 256;

/// Maximum interval between shutdown-flag checks inside any blocking
/// call, so cancellation is always observed promptly.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Deadline for draining outbound queues on shutdown before transports
/// are closed unconditionally.
pub const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(1);

// ============================================================================
// PTY
// ============================================================================

/// Maximum chunk size for a single `pty_input` envelope body.
pub const PTY_INPUT_CHUNK_MAX: usize = 4 * 1024;

/// Shells tried in order when spawning a server-side PTY session.
pub const SHELL_CANDIDATES: &[&str] = &["tcsh", "/bin/sh"];

// ============================================================================
// Clipboard transport
// ============================================================================

/// Default clipboard polling interval.
pub const CLIPBOARD_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default steady-state clipboard read timeout.
pub const CLIPBOARD_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Default steady-state clipboard write timeout.
pub const CLIPBOARD_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default backend-probe read timeout (separate from steady-state).
pub const CLIPBOARD_PROBE_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Default backend-probe write timeout (separate from steady-state).
pub const CLIPBOARD_PROBE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Wire prefix placed before the base64 envelope on the clipboard.
pub const CLIPBOARD_WIRE_PREFIX: &str = "CLIPSSH/1 ";

// ============================================================================
// Git transport
// ============================================================================

/// Client → server branch name.
pub const GIT_BRANCH_C2S: &str = "gitssh2-c2s";

/// Server → client branch name.
pub const GIT_BRANCH_S2C: &str = "gitssh2-s2c";

/// Blob path inside each envelope-carrying commit's tree.
pub const GIT_FRAME_BLOB: &str = "frame.json";

/// Ref under which the last-processed commit SHA is persisted.
pub const GIT_CURSOR_REF: &str = "refs/clipssh/cursor";

/// Interval between git sync attempts (push/fetch).
pub const GIT_SYNC_INTERVAL: Duration = Duration::from_millis(500);

/// Initial backoff for transient git failures.
pub const GIT_RETRY_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Cap for git retry exponential backoff.
pub const GIT_RETRY_MAX_BACKOFF: Duration = Duration::from_secs(30);

// ============================================================================
// Drive transport
// ============================================================================

/// Client → server Drive log file name (`appDataFolder`).
pub const DRIVE_LOG_C2S: &str = "gitssh2-c2s.log";

/// Server → client Drive log file name (`appDataFolder`).
pub const DRIVE_LOG_S2C: &str = "gitssh2-s2c.log";

/// Interval between Drive log polls.
pub const DRIVE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Maximum attempts to retry a Drive append on ETag precondition failure.
pub const DRIVE_CAS_MAX_RETRIES: u32 = 8;

// ============================================================================
// Serial transport
// ============================================================================

/// Default serial baud rate.
pub const SERIAL_DEFAULT_BAUD: u32 = 115_200;

/// Default marker byte value.
pub const MARKER_BYTE: u8 = 0x00;

/// Default marker run length.
pub const DEFAULT_MARKER_RUN: usize = 3;

/// Default ACK timeout for the serial link layer.
pub const SERIAL_ACK_TIMEOUT: Duration = Duration::from_millis(200);

/// Default maximum link-layer retries before surfacing `TransportBroken`.
pub const SERIAL_MAX_RETRIES: u32 = 8;

// ============================================================================
// Audio modem
// ============================================================================

/// Sampling rate used by the audio modem (48 kHz mono, 16-bit PCM).
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Default repeat-code FEC factor.
pub const DEFAULT_BYTE_REPEAT: u32 = 3;

/// Default audio link-layer ACK timeout.
pub const AUDIO_ACK_TIMEOUT: Duration = Duration::from_millis(800);

/// Default maximum audio link-layer retries.
pub const AUDIO_MAX_RETRIES: u32 = 8;

/// Default number of consecutive NACKs before `auto` downgrades one step.
pub const AUTO_DOWNGRADE_AFTER_NACKS: u32 = 5;

/// Default number of `diag_ping` frames burst on client connect.
pub const DIAG_CONNECT_BURST: u32 = 5;

/// Default interval between `diag_ping` frames in `-diag` mode.
pub const DIAG_INTERVAL: Duration = Duration::from_millis(500);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_schedule_is_nonempty_and_increasing() {
        assert!(!RETRY_BACKOFF_SCHEDULE_MS.is_empty());
        for pair in RETRY_BACKOFF_SCHEDULE_MS.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn timeouts_are_reasonable() {
        assert!(CLIPBOARD_POLL_INTERVAL <= Duration::from_millis(500));
        assert!(SERIAL_ACK_TIMEOUT < AUDIO_ACK_TIMEOUT);
        assert!(QUEUE_CAPACITY >= 64);
    }
}
