//! Receiver-side `seq` reassembly for streamed output over
//! clipboard/git/drive (spec §4.7/§5): "L3 reassembles by `seq` if
//! out-of-order arrivals occur ...; late arrivals beyond a reorder
//! window (e.g. 32) are dropped."
//!
//! Serial/audio are strictly ordered by L1 and never touch this — it
//! only guards the client-side `stdout`/`stderr`/`pty_output` streams,
//! where a best-effort transport can hand back two in-flight envelopes
//! in the wrong order (e.g. a clipboard retransmission racing the
//! original).

use crate::constants::REORDER_WINDOW;
use crate::session::envelope::Envelope;
use std::collections::BTreeMap;

/// Reassembles one peer's envelope stream into `seq` order.
///
/// The first envelope seen establishes the delivery cursor (there is
/// nothing earlier to wait for); after that, arrivals behind the
/// cursor are stale duplicates and are dropped, arrivals at or ahead of
/// it are held until the gap closes, and a gap that outlives
/// [`REORDER_WINDOW`] is abandoned by jumping the cursor forward to the
/// oldest envelope still buffered.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    next_expected: Option<u64>,
    pending: BTreeMap<u64, Envelope>,
}

impl ReorderBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one arrival, returning every envelope now ready for
    /// delivery, in order. Usually zero or one envelope; more than one
    /// if this arrival closed a gap that had envelopes buffered behind
    /// it.
    pub fn accept(&mut self, envelope: Envelope) -> Vec<Envelope> {
        let seq = envelope.seq;
        let next_expected = *self.next_expected.get_or_insert(seq);
        if seq < next_expected {
            return Vec::new();
        }
        self.pending.insert(seq, envelope);

        if let Some(&oldest) = self.pending.keys().next() {
            if oldest.saturating_sub(next_expected) > REORDER_WINDOW {
                self.next_expected = Some(oldest);
            }
        }

        let mut ready = Vec::new();
        while let Some(seq) = self.next_expected {
            match self.pending.remove(&seq) {
                Some(entry) => {
                    ready.push(entry);
                    self.next_expected = Some(seq + 1);
                }
                None => break,
            }
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::envelope::{Kind, Protocol, Role};

    fn envelope(seq: u64) -> Envelope {
        Envelope::new(Protocol::GitsshV2, Kind::PtyOutput { data: vec![seq as u8] }, "sess-1".to_string(), seq, Role::Server)
    }

    #[test]
    fn in_order_arrivals_deliver_immediately() {
        let mut buffer = ReorderBuffer::new();
        assert_eq!(buffer.accept(envelope(0)).len(), 1);
        assert_eq!(buffer.accept(envelope(1)).len(), 1);
        assert_eq!(buffer.accept(envelope(2)).len(), 1);
    }

    #[test]
    fn out_of_order_arrival_is_held_until_the_gap_closes() {
        let mut buffer = ReorderBuffer::new();
        assert_eq!(buffer.accept(envelope(0)).len(), 1);

        let held = buffer.accept(envelope(2));
        assert!(held.is_empty(), "seq 2 must wait for seq 1");

        let released = buffer.accept(envelope(1));
        let seqs: Vec<u64> = released.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2], "closing the gap releases both in order");
    }

    #[test]
    fn stale_arrival_behind_the_cursor_is_dropped() {
        let mut buffer = ReorderBuffer::new();
        assert_eq!(buffer.accept(envelope(0)).len(), 1);
        assert_eq!(buffer.accept(envelope(1)).len(), 1);

        let stale = buffer.accept(envelope(0));
        assert!(stale.is_empty(), "a retransmitted duplicate of an already-delivered seq is dropped");
    }

    #[test]
    fn gap_wider_than_the_window_is_abandoned() {
        let mut buffer = ReorderBuffer::new();
        assert_eq!(buffer.accept(envelope(0)).len(), 1);

        // seq 1 never arrives (lost forever); once the gap exceeds
        // REORDER_WINDOW, delivery resumes from whatever did arrive
        // rather than buffering indefinitely.
        let far = envelope(REORDER_WINDOW + 5);
        let released = buffer.accept(far);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].seq, REORDER_WINDOW + 5);
    }

    #[test]
    fn first_arrival_establishes_the_cursor_rather_than_assuming_zero() {
        // A reply stream doesn't necessarily start at seq 0 (e.g. the
        // session's seq_gen already advanced past the handshake).
        let mut buffer = ReorderBuffer::new();
        let ready = buffer.accept(envelope(5));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].seq, 5);
        assert_eq!(buffer.accept(envelope(6)).len(), 1);
    }
}
