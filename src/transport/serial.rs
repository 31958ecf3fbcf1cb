//! USB-serial transport (spec §4.5): link-framed envelopes over a
//! configured serial port, L1 ACK/retry authoritative (no L3 retry on
//! top of this one).
//!
//! The port itself is blocking I/O (`serialport` has no async story),
//! so every read/write is pushed through `spawn_blocking`, matching the
//! pattern used for [`crate::transport::git`].

use crate::link::{FrameDecoder, LinkFrame};
use crate::session::envelope::Envelope;
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Tunable serial link parameters (spec §6 `--serial-*` / link-layer
/// flags).
#[derive(Debug, Clone)]
pub struct SerialTransportConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub marker_byte: u8,
    pub marker_run: usize,
    pub ack_timeout: Duration,
    pub max_retries: u32,
}

impl SerialTransportConfig {
    #[must_use]
    pub fn new(port_name: String) -> Self {
        Self {
            port_name,
            baud_rate: crate::constants::SERIAL_DEFAULT_BAUD,
            marker_byte: crate::constants::MARKER_BYTE,
            marker_run: crate::constants::DEFAULT_MARKER_RUN,
            ack_timeout: crate::constants::SERIAL_ACK_TIMEOUT,
            max_retries: crate::constants::SERIAL_MAX_RETRIES,
        }
    }
}

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    config: SerialTransportConfig,
    decoder: FrameDecoder,
    next_frame_seq: u32,
    pending_data: Vec<Vec<u8>>,
}

impl SerialTransport {
    pub fn open(config: SerialTransportConfig) -> Result<Self, TransportError> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| TransportError::TransportSetup(format!("failed to open serial port {}: {e}", config.port_name)))?;

        let decoder = FrameDecoder::new(config.marker_byte, config.marker_run);
        Ok(Self {
            port,
            config,
            decoder,
            next_frame_seq: 0,
            pending_data: Vec::new(),
        })
    }

    fn write_frame(&mut self, frame: &LinkFrame) -> Result<(), TransportError> {
        let encoded = frame.encode(self.config.marker_byte, self.config.marker_run);
        self.port
            .write_all(&encoded)
            .map_err(|e| TransportError::TransportBroken(format!("serial write failed: {e}")))
    }

    /// Read whatever bytes are available right now (non-blocking beyond
    /// the port's short internal timeout) and feed them to the decoder.
    fn poll_frames(&mut self) -> Result<Vec<LinkFrame>, TransportError> {
        let mut buf = [0u8; 256];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(Vec::new()),
            Ok(n) => Ok(self.decoder.feed(&buf[..n])),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(TransportError::TransportBroken(format!("serial read failed: {e}"))),
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let json = envelope
            .encode()
            .map_err(|e| TransportError::Encoding(format!("failed to encode envelope: {e}")))?;
        let frame_seq = self.next_frame_seq;
        self.next_frame_seq = self.next_frame_seq.wrapping_add(1);
        let frame = LinkFrame::data(frame_seq, json.into_bytes());

        for attempt in 0..=self.config.max_retries {
            self.write_frame(&frame)?;
            let deadline = Instant::now() + self.config.ack_timeout;
            let mut acked = false;
            while Instant::now() < deadline {
                for decoded in self.poll_frames()? {
                    match decoded {
                        LinkFrame::Ack { frame_seq: acked_seq } if acked_seq == frame_seq => acked = true,
                        LinkFrame::Data { payload, .. } => self.pending_data.push(payload),
                        LinkFrame::Ack { .. } => {}
                    }
                }
                if acked {
                    break;
                }
            }
            if acked {
                return Ok(());
            }
            if attempt == self.config.max_retries {
                return Err(TransportError::TransportBroken(format!(
                    "serial link: no ACK for frame {frame_seq} after {} attempts",
                    self.config.max_retries + 1
                )));
            }
        }
        unreachable!("loop always returns before exhausting its range")
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Envelope, TransportError> {
        if let Some(payload) = self.pending_data.pop() {
            return decode_payload(&payload);
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            for decoded in self.poll_frames()? {
                match decoded {
                    LinkFrame::Data { frame_seq, payload } => {
                        self.write_frame(&LinkFrame::ack(frame_seq))?;
                        return decode_payload(&payload);
                    }
                    LinkFrame::Ack { .. } => {}
                }
            }
        }
        Err(TransportError::Timeout("serial link: no frame received in time".into()))
    }

    async fn close(&mut self) {}
}

fn decode_payload(payload: &[u8]) -> Result<Envelope, TransportError> {
    let json = std::str::from_utf8(payload).map_err(|e| TransportError::Encoding(format!("serial payload is not UTF-8: {e}")))?;
    Envelope::decode(json).map_err(|e| TransportError::Encoding(format!("failed to decode serial envelope: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = SerialTransportConfig::new("/dev/ttyUSB0".into());
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.marker_run, 3);
        assert_eq!(config.marker_byte, 0x00);
    }
}
