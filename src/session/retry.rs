//! L3 retry queue for the best-effort transports (spec §3/§4.7).
//!
//! Serial and audio do their own L1 ACK/retry and never touch this;
//! clipboard/git/drive retransmit the same envelope (same `msg_id`) on
//! [`crate::constants::RETRY_BACKOFF_SCHEDULE_MS`] until the peer's
//! reply is observed, a later `seq` supersedes it, or
//! [`crate::constants::RETRY_MAX_ATTEMPTS`] is exhausted.

use crate::constants::{RETRY_BACKOFF_SCHEDULE_MS, RETRY_MAX_ATTEMPTS};
use crate::session::envelope::Envelope;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct RetryEntry {
    envelope: Envelope,
    #[allow(dead_code)] // kept for diagnostics/telemetry, not read by the schedule itself
    first_sent_at: Instant,
    next_deadline: Instant,
    attempts: u32,
}

/// Envelopes whose retry deadline elapsed, partitioned by whether they
/// should be retransmitted again or have exhausted their budget.
pub struct DueEnvelopes {
    pub retransmit: Vec<Envelope>,
    pub exhausted: Vec<Envelope>,
}

/// Outstanding outbound envelopes awaiting application-level
/// acknowledgment (a reply, or a later `seq` from the peer).
#[derive(Default)]
pub struct RetryQueue {
    entries: HashMap<String, RetryEntry>,
}

impl RetryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Register a freshly-sent envelope for retry tracking.
    pub fn track(&mut self, envelope: Envelope, now: Instant) {
        let msg_id = envelope.msg_id.clone();
        self.entries.insert(
            msg_id,
            RetryEntry {
                envelope,
                first_sent_at: now,
                next_deadline: now + backoff_for_attempt(1),
                attempts: 1,
            },
        );
    }

    /// Drop the entry for `msg_id`: a reply was observed, or a later
    /// `seq` from the peer made this retransmission moot.
    pub fn resolve(&mut self, msg_id: &str) {
        self.entries.remove(msg_id);
    }

    /// Drop every tracked entry: any inbound envelope from the peer is
    /// proof the medium is carrying traffic and the peer has moved
    /// past whatever we were retrying (spec §4.7 "any envelope with
    /// `seq > outbound.seq` from the peer is observed" — approximated
    /// here as "any forward progress from the peer resolves every
    /// outstanding retry", since this protocol's request/reply and PTY
    /// streaming traffic doesn't correlate individual outbound/inbound
    /// envelopes beyond that).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Advance time to `now`, returning every envelope whose deadline
    /// elapsed. Retransmitted envelopes are rescheduled in place;
    /// exhausted ones are removed from the queue.
    pub fn due(&mut self, now: Instant) -> DueEnvelopes {
        let mut retransmit = Vec::new();
        let mut exhausted = Vec::new();
        let mut to_remove = Vec::new();

        for (msg_id, entry) in &mut self.entries {
            if entry.next_deadline > now {
                continue;
            }
            if entry.attempts >= RETRY_MAX_ATTEMPTS {
                exhausted.push(entry.envelope.clone());
                to_remove.push(msg_id.clone());
                continue;
            }
            entry.attempts += 1;
            entry.next_deadline = now + backoff_for_attempt(entry.attempts);
            retransmit.push(entry.envelope.clone());
        }

        for msg_id in to_remove {
            self.entries.remove(&msg_id);
        }

        DueEnvelopes { retransmit, exhausted }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    let index = (attempt.saturating_sub(1) as usize).min(RETRY_BACKOFF_SCHEDULE_MS.len() - 1);
    Duration::from_millis(RETRY_BACKOFF_SCHEDULE_MS[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::envelope::{Kind, Protocol, Role};

    fn sample_envelope(msg_id: &str) -> Envelope {
        let mut envelope = Envelope::new(Protocol::ClipsshV1, Kind::Cmd { text: "echo hi".into() }, "s1".into(), 0, Role::Client);
        envelope.msg_id = msg_id.to_string();
        envelope
    }

    #[test]
    fn freshly_tracked_entry_is_not_due_immediately() {
        let mut queue = RetryQueue::new();
        let now = Instant::now();
        queue.track(sample_envelope("m1"), now);
        let due = queue.due(now);
        assert!(due.retransmit.is_empty());
        assert!(due.exhausted.is_empty());
    }

    #[test]
    fn entry_becomes_due_after_its_backoff_elapses() {
        let mut queue = RetryQueue::new();
        let now = Instant::now();
        queue.track(sample_envelope("m1"), now);
        let later = now + Duration::from_millis(RETRY_BACKOFF_SCHEDULE_MS[0] + 1);
        let due = queue.due(later);
        assert_eq!(due.retransmit.len(), 1);
        assert_eq!(due.retransmit[0].msg_id, "m1");
    }

    #[test]
    fn resolve_removes_the_entry() {
        let mut queue = RetryQueue::new();
        let now = Instant::now();
        queue.track(sample_envelope("m1"), now);
        queue.resolve("m1");
        assert!(queue.is_empty());
        let due = queue.due(now + Duration::from_secs(10));
        assert!(due.retransmit.is_empty());
    }

    #[test]
    fn clear_drops_every_tracked_entry() {
        let mut queue = RetryQueue::new();
        let now = Instant::now();
        queue.track(sample_envelope("m1"), now);
        queue.track(sample_envelope("m2"), now);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let mut queue = RetryQueue::new();
        let mut now = Instant::now();
        queue.track(sample_envelope("m1"), now);

        for _ in 0..crate::constants::RETRY_MAX_ATTEMPTS - 1 {
            now += Duration::from_secs(60);
            let due = queue.due(now);
            assert_eq!(due.exhausted.len(), 0);
        }

        now += Duration::from_secs(60);
        let due = queue.due(now);
        assert_eq!(due.exhausted.len(), 1);
        assert!(queue.is_empty());
    }
}
