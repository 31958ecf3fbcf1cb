//! L3 session layer: envelope format, dedup, retry, sequencing,
//! seq-based reorder, and the server-side connection state machine
//! (spec §3/§4.7).
//!
//! Concurrency note (spec §5): shared state is confined to a single
//! [`SessionState`] plus its [`dedup::DedupWindow`] and
//! [`retry::RetryQueue`], guarded by locks acquired in the fixed order
//! `SessionState → DedupWindow → RetryQueue` wherever a caller needs
//! more than one at once, to rule out lock-order deadlocks between the
//! transport reader/writer tasks and the session task.

pub mod dedup;
pub mod envelope;
pub mod reorder;
pub mod retry;
pub mod seq;

pub use dedup::DedupWindow;
pub use envelope::{Envelope, Kind, Protocol, PtySignalName, Role};
pub use reorder::ReorderBuffer;
pub use retry::RetryQueue;
pub use seq::SeqGen;

/// Server-side connection phase (spec §3 `SessionState`).
///
/// Invariant: at most one session has `phase != Idle` at any moment; a
/// `connect_req` arriving while non-idle gets a `busy` reply and does
/// not replace the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Handshaking,
    Active,
    Draining,
}

/// Server-side session state: the PTY/shell handle plus bookkeeping,
/// the one piece of mutable shared state the concurrency model
/// revolves around.
#[derive(Debug)]
pub struct SessionState {
    pub phase: Phase,
    pub session_id: Option<String>,
    pub peer_source: Option<Role>,
    pub shell_pid: Option<u32>,
    pub last_activity: std::time::Instant,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            session_id: None,
            peer_source: None,
            shell_pid: None,
            last_activity: std::time::Instant::now(),
        }
    }
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to begin handshaking a new connection. Returns `false`
    /// (caller should reply `busy`) if a session is already underway.
    #[must_use]
    pub fn begin_handshake(&mut self, session_id: String, peer_source: Role) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        self.phase = Phase::Handshaking;
        self.session_id = Some(session_id);
        self.peer_source = Some(peer_source);
        self.touch();
        true
    }

    /// Transition `handshaking -> active` once `connect_ack` has been
    /// emitted and the shell spawned.
    pub fn activate(&mut self, shell_pid: u32) {
        debug_assert_eq!(self.phase, Phase::Handshaking);
        self.phase = Phase::Active;
        self.shell_pid = Some(shell_pid);
        self.touch();
    }

    /// Transition `active -> draining`: the shell exited, final flush
    /// in progress.
    pub fn begin_drain(&mut self) {
        debug_assert_eq!(self.phase, Phase::Active);
        self.phase = Phase::Draining;
        self.touch();
    }

    /// Transition `draining -> idle`, clearing session identity so a
    /// new `connect_req` can be accepted.
    pub fn reset_to_idle(&mut self) {
        *self = Self::default();
    }

    pub fn touch(&mut self) {
        self.last_activity = std::time::Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let state = SessionState::new();
        assert_eq!(state.phase, Phase::Idle);
    }

    #[test]
    fn full_lifecycle_transitions_in_order() {
        let mut state = SessionState::new();
        assert!(state.begin_handshake("s1".into(), Role::Client));
        assert_eq!(state.phase, Phase::Handshaking);

        state.activate(1234);
        assert_eq!(state.phase, Phase::Active);
        assert_eq!(state.shell_pid, Some(1234));

        state.begin_drain();
        assert_eq!(state.phase, Phase::Draining);

        state.reset_to_idle();
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.session_id, None);
    }

    #[test]
    fn second_handshake_while_busy_is_rejected() {
        let mut state = SessionState::new();
        assert!(state.begin_handshake("s1".into(), Role::Client));
        assert!(!state.begin_handshake("s2".into(), Role::Client));
        assert_eq!(state.session_id, Some("s1".to_string()));
    }
}
