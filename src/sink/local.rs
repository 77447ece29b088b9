use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::error::EngineError;

use super::{PixelOrder, Sink, SinkError, Submission};

/// Writes the pixel byte stream to a local LED driver device.
///
/// The device is expected to consume raw bytes per pixel in the
/// configured order (SPI-attached WS2812/SK6812 style). The full strip
/// buffer is kept here so partial submissions leave untouched LEDs at
/// their previous values.
#[derive(Debug)]
pub struct LocalDriver {
    path: PathBuf,
    device: File,
    buffer: Vec<u8>,
    bytes_per_pixel: usize,
}

impl LocalDriver {
    /// Open the device eagerly; a missing or unwritable device is a
    /// hardware error at startup, not a runtime fault.
    pub fn open(path: PathBuf) -> Result<Self, EngineError> {
        let device = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| EngineError::Hardware(format!("{}: {e}", path.display())))?;
        Ok(Self {
            path,
            device,
            buffer: Vec::new(),
            bytes_per_pixel: 3,
        })
    }

    fn reopen(&mut self) -> Result<(), SinkError> {
        match OpenOptions::new().write(true).open(&self.path) {
            Ok(device) => {
                self.device = device;
                Ok(())
            }
            Err(e) => Err(SinkError::Transient(format!(
                "reopening {}: {e}",
                self.path.display()
            ))),
        }
    }
}

impl Sink for LocalDriver {
    fn configure(&mut self, order: PixelOrder, led_count: usize) -> Result<(), SinkError> {
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
        match self.device.write_all(&self.buffer).and_then(|_| self.device.flush()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SinkError::Fatal(
                format!("{} disappeared: {e}", self.path.display()),
            )),
            Err(e) => {
                // Try a reopen on the next frame.
                self.reopen()?;
                Err(SinkError::Transient(format!(
                    "writing {}: {e}",
                    self.path.display()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RangeData;
    use std::str::FromStr;

    #[test]
    fn writes_full_strip_buffer() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("ledvibe-local-{}", std::process::id()));
        File::create(&path).unwrap();

        let mut driver = LocalDriver::open(path.clone()).unwrap();
        driver
            .configure(PixelOrder::from_str("RGB").unwrap(), 3)
            .unwrap();
        driver
            .submit(&Submission {
                seq: 1,
                ranges: vec![RangeData {
                    offset_px: 1,
                    bytes: vec![1, 2, 3],
                }],
            })
            .unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, vec![0, 0, 0, 1, 2, 3, 0, 0, 0]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_device_is_a_hardware_error() {
        let err = LocalDriver::open(PathBuf::from("/definitely/not/a/device")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn oversized_submission_is_fatal() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("ledvibe-local-big-{}", std::process::id()));
        File::create(&path).unwrap();

        let mut driver = LocalDriver::open(path.clone()).unwrap();
        driver
            .configure(PixelOrder::from_str("RGB").unwrap(), 1)
            .unwrap();
        let result = driver.submit(&Submission {
            seq: 1,
            ranges: vec![RangeData {
                offset_px: 0,
                bytes: vec![0; 6],
            }],
        });
        assert!(matches!(result, Err(SinkError::Fatal(_))));
        std::fs::remove_file(&path).unwrap();
    }
}
