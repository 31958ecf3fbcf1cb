//! Crate-wide error taxonomy (spec §7).
//!
//! [`TransportError`] (defined in [`crate::transport`]) covers failures
//! at L0/L1; [`ClipsshError`] is the L3/L4 umbrella the session and
//! application layers actually return to their callers, wrapping a
//! transport error where one occurred.

use crate::transport::TransportError;
use thiserror::Error;

/// Top-level error taxonomy surfaced by the session and application
/// layers.
#[derive(Debug, Error)]
pub enum ClipsshError {
    /// Bad CLI flags, or a required external tool is missing.
    #[error("configuration error: {0}")]
    Config(String),

    /// The transport medium couldn't be opened, or broke mid-run.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An envelope's `kind` didn't make sense for the current session
    /// state (e.g. `pty_input` before `connect_ack`). Non-fatal: a
    /// local `error` envelope is emitted and the session stays up.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Session-level failure: peer busy, or shell failed to spawn.
    #[error("session error: {0}")]
    Session(String),

    /// An L1 ACK or L3 retry budget was exhausted.
    #[error("timeout: {0}")]
    Timeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_wraps_with_from() {
        let transport_err = TransportError::TransportBroken("medium vanished".into());
        let err: ClipsshError = transport_err.into();
        assert!(matches!(err, ClipsshError::Transport(_)));
    }

    #[test]
    fn display_messages_are_human_readable() {
        let err = ClipsshError::Session("peer busy".into());
        assert_eq!(err.to_string(), "session error: peer busy");
    }
}
