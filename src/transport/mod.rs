//! L0/L1 transport adapters: one per medium (spec §4.1-§4.6).
//!
//! Every adapter implements [`Transport`]. `send`/`recv` are the only
//! operations the session layer depends on; everything medium-specific
//! (clipboard backend probing, git sync loops, Drive CAS, serial
//! framing, audio modulation) is private to its adapter module.

pub mod audio;
pub mod clipboard;
pub mod drive;
pub mod git;
pub mod registry;
pub mod serial;

use crate::session::envelope::Envelope;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Transport-level failure taxonomy (spec §4.1/§7).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The medium couldn't be opened at all (missing tool, bad path,
    /// auth failure).
    #[error("transport setup failed: {0}")]
    TransportSetup(String),

    /// The medium was open but has become unusable mid-run (upstream
    /// repo vanished, serial fd EIO, audio device gone).
    #[error("transport broken: {0}")]
    TransportBroken(String),

    /// Bytes were received but couldn't be parsed as an envelope.
    /// Logged and dropped by the transport itself; this variant exists
    /// for the transport's internal bookkeeping and tests, and must
    /// never propagate out of `recv`.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// `recv`'s deadline elapsed with nothing to deliver. Distinct from
    /// `TransportBroken`: the medium is fine, there was just nothing
    /// there yet.
    #[error("timed out waiting for an envelope: {0}")]
    Timeout(String),
}

/// Duplex, best-effort envelope transport (spec §4.1).
///
/// `send` attempts delivery without guaranteeing it. `recv` returns at
/// most one envelope per call, already deduped by `msg_id` for the
/// lifetime of the transport; ordering beyond that is whatever the
/// medium naturally provides; L3's [`crate::session::dedup::DedupWindow`]
/// and reorder window are the backstop, not this trait.
#[async_trait]
pub trait Transport: Send {
    /// Best-effort send. `Ok(())` only means the envelope was handed
    /// to the medium, not that the peer received it.
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next envelope. Returns
    /// `Err(TransportError::Timeout)` if nothing arrives in time (spec
    /// §4.1: timeout is a `recv`-only error, not `TransportBroken`).
    async fn recv(&mut self, timeout: Duration) -> Result<Envelope, TransportError>;

    /// Release the medium's resources (child processes, file handles,
    /// device streams). Best-effort; errors are logged, not returned.
    async fn close(&mut self);
}
