use std::io::Write;
use std::time::Duration;

use crc::{Crc, CRC_16_IBM_3740};

use super::{PixelOrder, Sink, SinkError, Submission};

/// CRC16-CCITT (poly 0x1021, init 0xFFFF).
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

const FRAME_START: u8 = 0x7E;

/// Frames the strip bytes over a serial tether to a microcontroller.
///
/// Envelope: `0x7E | u16le len | u8 channel_order | bytes... | u16le crc`
/// where `len` counts the bytes after itself excluding the CRC, and the
/// CRC covers exactly those counted bytes. The port is opened lazily
/// and reopened by the worker's backoff loop after I/O errors.
pub struct SerialSink {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
    buffer: Vec<u8>,
    order_code: u8,
    bytes_per_pixel: usize,
}

impl SerialSink {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            port: None,
            buffer: Vec::new(),
            order_code: 0,
            bytes_per_pixel: 3,
        }
    }

    fn ensure_open(&mut self) -> Result<(), SinkError> {
        if self.port.is_none() {
            let port = serialport::new(self.path.as_str(), self.baud_rate)
                .timeout(Duration::from_millis(100))
                .open()
                .map_err(|e| SinkError::Transient(format!("opening {}: {e}", self.path)))?;
            self.port = Some(port);
        }
        Ok(())
    }
}

/// Build one serial envelope around `payload`.
pub fn encode_envelope(order_code: u8, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + 1) as u16;
    let mut frame = Vec::with_capacity(payload.len() + 6);
    frame.push(FRAME_START);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.push(order_code);
    frame.extend_from_slice(payload);
    let crc = CRC16.checksum(&frame[3..]);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

impl Sink for SerialSink {
    fn configure(&mut self, order: PixelOrder, led_count: usize) -> Result<(), SinkError> {
        self.order_code = order.code();
        self.bytes_per_pixel = order.bytes_per_pixel();
        self.buffer = vec![0u8; led_count * self.bytes_per_pixel];
        Ok(())
    }

    fn submit(&mut self, submission: &Submission) -> Result<(), SinkError> {
        for range in &submission.ranges {
            let start = range.offset_px * self.bytes_per_pixel;
            let end = start + range.bytes.len();
            if end > self.buffer.len() {
                return Err(SinkError::Fatal(format!(
                    "submission exceeds strip buffer ({end} > {})",
                    self.buffer.len()
                )));
            }
            self.buffer[start..end].copy_from_slice(&range.bytes);
        }
        self.ensure_open()?;
        let frame = encode_envelope(self.order_code, &self.buffer);
        let port = self.port.as_mut().expect("port opened above");
        if let Err(e) = port.write_all(&frame).and_then(|_| port.flush()) {
            // Drop the handle so the next attempt reconnects.
            self.port = None;
            return Err(SinkError::Transient(format!(
                "writing {}: {e}",
                self.path
            )));
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.port = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_layout() {
        let frame = encode_envelope(2, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(frame[0], FRAME_START);
        // len counts order byte + payload
        assert_eq!(u16::from_le_bytes([frame[1], frame[2]]), 4);
        assert_eq!(frame[3], 2);
        assert_eq!(&frame[4..7], &[0xAA, 0xBB, 0xCC]);
        assert_eq!(frame.len(), 1 + 2 + 1 + 3 + 2);
    }

    #[test]
    fn crc_covers_counted_bytes() {
        let frame = encode_envelope(0, &[0x01, 0x02]);
        let crc = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
        assert_eq!(crc, CRC16.checksum(&[0x00, 0x01, 0x02]));
    }

    #[test]
    fn crc16_ccitt_known_vector() {
        // Standard CCITT-FALSE check value for "123456789".
        assert_eq!(CRC16.checksum(b"123456789"), 0x29B1);
    }

    #[test]
    fn corrupted_byte_breaks_crc() {
        let mut frame = encode_envelope(0, &[0x01, 0x02, 0x03]);
        let crc = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
        frame[4] ^= 0xFF;
        assert_ne!(CRC16.checksum(&frame[3..frame.len() - 2]), crc);
    }
}
