//! L1 link framing shared by the serial and audio-modem transports.
//!
//! [`cobs`] is the pure byte-stuffing codec; [`frame`] layers the
//! marker-delimited, typed, CRC32-checked frame format on top of it
//! (spec §4.5/§4.6).

pub mod cobs;
pub mod frame;

pub use frame::{FrameDecoder, LinkFrame, FRAME_TYPE_ACK, FRAME_TYPE_DATA};
