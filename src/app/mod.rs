//! L4 application protocols built on top of the session layer: the
//! interactive PTY session (`gitssh/2`, [`pty_session`]) and the
//! one-shot command/reply session (`CLIPSSH/1`, [`clip_session`]).
//!
//! Both modules drive a `Box<dyn Transport>` to completion for exactly
//! one connection, per spec.md §4.7/§4.8: a `connect_req`/`connect_ack`
//! handshake, an active phase doing the protocol's actual work, and a
//! drain back to idle on teardown. Transport-specific retry policy
//! (spec §4.7: L3 retransmits on clipboard/git/drive, L1 ACK is
//! authoritative on serial/audio) is a caller-supplied [`RetryPolicy`]
//! rather than something either module infers from the transport
//! object, since a trait object can't expose which medium it wraps.

pub mod clip_session;
pub mod pty_session;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation signal for the session loops (spec §5): every
/// suspension point in a session's main loop is bounded by
/// [`crate::constants::SHUTDOWN_POLL_INTERVAL`], so checking this flag
/// once per loop iteration honors the spec's "≤ 250 ms" cancellation
/// latency without a dedicated select arm in every blocking call.
#[derive(Clone, Debug)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// The underlying flag, for registering with `signal_hook::flag`.
    #[must_use]
    pub fn raw_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Local user name for `connect_ack` (spec §3 `SessionState`/§4.7
/// handshake fields); shared by both session protocols.
pub(crate) fn local_user() -> String {
    std::env::var("USER").or_else(|_| std::env::var("LOGNAME")).unwrap_or_else(|_| "unknown".to_string())
}

/// Local host name for `connect_ack`, via the same `libc::gethostname`
/// call the teacher's stack already depends on for other FFI needs.
pub(crate) fn local_host() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: `buf` is a valid writable byte buffer of the given length;
    // gethostname always null-terminates on success.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "unknown".to_string();
    }
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..nul]).into_owned()
}

/// Whether the session layer should retransmit unacknowledged outbound
/// envelopes itself (spec §4.7).
///
/// The binaries pick this based on which `--transport` was selected:
/// clipboard/git/drive get [`RetryPolicy::L3Retry`]; serial/audio
/// already retry at L1 and get [`RetryPolicy::L1Authoritative`], where
/// L3 retransmission would just be redundant traffic on top of a link
/// that already guarantees delivery or gives up loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Clipboard, git, Drive: retransmit on the L3 backoff schedule
    /// until a reply is observed or the peer's `seq` visibly advances.
    L3Retry,
    /// Serial, audio: the transport's own L1 ACK/retry already covers
    /// this; L3 tracks nothing.
    L1Authoritative,
}
