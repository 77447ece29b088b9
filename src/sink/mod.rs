//! Output sinks and their workers.
//!
//! A sink accepts byte-encoded frame data. Each sink is serviced by its
//! own worker thread behind a single-slot mailbox: the render loop
//! overwrites the slot (latest wins, an occupied slot counts as a drop)
//! and never blocks on slow hardware. Submissions are ordered per sink
//! by frame sequence number; drops are expected under backpressure,
//! reorders never happen.

mod local;
mod serial;
mod udp;

pub use local::LocalDriver;
pub use serial::SerialSink;
pub use udp::{UdpSink, DEFAULT_MTU};

use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::stats::Stats;

/// Wire order of color channels for one pixel.
///
/// Any permutation of R, G and B, optionally followed by W. The
/// canonical set matches the strip types the WS281x/SK6812 drivers
/// accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelOrder {
    channels: [u8; 4],
    len: usize,
}

impl PixelOrder {
    pub const GRB: PixelOrder = PixelOrder {
        channels: [1, 0, 2, 0],
        len: 3,
    };

    pub fn bytes_per_pixel(&self) -> usize {
        self.len
    }

    pub fn has_white(&self) -> bool {
        self.len == 4
    }

    /// Write one RGBW pixel into `out` in wire order.
    #[inline]
    pub fn encode(&self, rgbw: [u8; 4], out: &mut [u8]) {
        for (slot, &ch) in out[..self.len].iter_mut().zip(&self.channels) {
            *slot = rgbw[ch as usize];
        }
    }

    /// Stable one-byte code used by the serial envelope.
    pub fn code(&self) -> u8 {
        const CANON: [&str; 12] = [
            "RGB", "RBG", "GRB", "GBR", "BRG", "BGR", "RGBW", "RBGW", "GRBW", "GBRW", "BRGW",
            "BGRW",
        ];
        CANON
            .iter()
            .position(|s| PixelOrder::from_str(s).unwrap() == *self)
            .unwrap_or(2) as u8
    }
}

impl FromStr for PixelOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        let len = upper.len();
        if !(len == 3 || len == 4) {
            return Err(format!("invalid pixel order '{s}'"));
        }
        let mut channels = [0u8; 4];
        let mut seen = [false; 4];
        for (i, c) in upper.chars().enumerate() {
            let ch = match c {
                'R' => 0,
                'G' => 1,
                'B' => 2,
                'W' if i == 3 => 3,
                _ => return Err(format!("invalid pixel order '{s}'")),
            };
            if seen[ch as usize] {
                return Err(format!("invalid pixel order '{s}'"));
            }
            seen[ch as usize] = true;
            channels[i] = ch;
        }
        if !(seen[0] && seen[1] && seen[2]) {
            return Err(format!("invalid pixel order '{s}'"));
        }
        Ok(PixelOrder { channels, len })
    }
}

/// One contiguous run of encoded pixels.
#[derive(Debug, Clone)]
pub struct RangeData {
    /// First LED index of the run.
    pub offset_px: usize,
    pub bytes: Vec<u8>,
}

/// Everything a sink receives for one tick.
#[derive(Debug, Clone)]
pub struct Submission {
    pub seq: u32,
    pub ranges: Vec<RangeData>,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Worth retrying after the next frame; the worker backs off and
    /// reconnects.
    #[error("transient sink error: {0}")]
    Transient(String),
    /// The device is gone for good; the sink is disabled.
    #[error("fatal sink error: {0}")]
    Fatal(String),
}

/// An output endpoint that accepts byte-encoded frames.
pub trait Sink: Send {
    fn configure(&mut self, order: PixelOrder, led_count: usize) -> Result<(), SinkError>;
    fn submit(&mut self, submission: &Submission) -> Result<(), SinkError>;
    fn shutdown(&mut self) {}
}

struct Mailbox {
    slot: Mutex<SlotState>,
    available: Condvar,
}

struct SlotState {
    job: Option<Submission>,
    closed: bool,
}

/// Handle owned by the render loop for one sink worker.
pub struct SinkHandle {
    name: String,
    mailbox: Arc<Mailbox>,
    worker: Option<JoinHandle<()>>,
}

const BACKOFF_MIN: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

impl SinkHandle {
    pub fn spawn(name: String, mut sink: Box<dyn Sink>, stats: Arc<Stats>) -> SinkHandle {
        let mailbox = Arc::new(Mailbox {
            slot: Mutex::new(SlotState {
                job: None,
                closed: false,
            }),
            available: Condvar::new(),
        });
        let worker_mailbox = Arc::clone(&mailbox);
        let worker_name = name.clone();
        let worker = std::thread::Builder::new()
            .name(format!("sink-{name}"))
            .spawn(move || {
                worker_loop(&worker_name, sink.as_mut(), &worker_mailbox, &stats);
                sink.shutdown();
            })
            .expect("spawning sink worker");
        info!(sink = %name, "sink worker started");
        SinkHandle {
            name,
            mailbox,
            worker: Some(worker),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand a submission to the worker without blocking. An unconsumed
    /// previous submission is replaced and counted as a drop.
    pub fn submit(&self, submission: Submission, stats: &Stats) {
        let mut slot = self.mailbox.slot.lock().unwrap();
        if slot.closed {
            return;
        }
        if slot.job.replace(submission).is_some() {
            stats.sink_drop(&self.name);
        }
        drop(slot);
        self.mailbox.available.notify_one();
    }

    /// Stop the worker. A pending submission is flushed best-effort.
    pub fn shutdown(mut self) {
        {
            let mut slot = self.mailbox.slot.lock().unwrap();
            slot.closed = true;
        }
        self.mailbox.available.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        info!(sink = %self.name, "sink worker stopped");
    }
}

fn worker_loop(name: &str, sink: &mut dyn Sink, mailbox: &Mailbox, stats: &Stats) {
    let mut backoff = BACKOFF_MIN;
    let mut disabled = false;
    loop {
        let job = {
            let mut slot = mailbox.slot.lock().unwrap();
            loop {
                if let Some(job) = slot.job.take() {
                    break Some(job);
                }
                if slot.closed {
                    break None;
                }
                slot = mailbox.available.wait(slot).unwrap();
            }
        };
        let Some(job) = job else {
            return;
        };
        if disabled {
            // Keep draining so the mailbox never wedges the render loop.
            stats.sink_drop(name);
            continue;
        }
        match sink.submit(&job) {
            Ok(()) => backoff = BACKOFF_MIN,
            Err(SinkError::Transient(msg)) => {
                warn!(sink = name, "{msg}; retrying in {backoff:?}");
                stats.sink_drop(name);
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
            Err(SinkError::Fatal(msg)) => {
                error!(sink = name, "{msg}; sink disabled");
                disabled = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn pixel_order_parses_and_encodes() {
        let grb = PixelOrder::from_str("GRB").unwrap();
        assert_eq!(grb.bytes_per_pixel(), 3);
        assert!(!grb.has_white());
        let mut out = [0u8; 3];
        grb.encode([10, 20, 30, 40], &mut out);
        assert_eq!(out, [20, 10, 30]);

        let grbw = PixelOrder::from_str("grbw").unwrap();
        assert_eq!(grbw.bytes_per_pixel(), 4);
        let mut out = [0u8; 4];
        grbw.encode([10, 20, 30, 40], &mut out);
        assert_eq!(out, [20, 10, 30, 40]);
    }

    #[test]
    fn pixel_order_rejects_nonsense() {
        assert!(PixelOrder::from_str("RGX").is_err());
        assert!(PixelOrder::from_str("RR B").is_err());
        assert!(PixelOrder::from_str("WRGB").is_err());
        assert!(PixelOrder::from_str("RGBWW").is_err());
        assert!(PixelOrder::from_str("RGW").is_err());
    }

    #[test]
    fn pixel_order_codes_are_stable() {
        assert_eq!(PixelOrder::from_str("RGB").unwrap().code(), 0);
        assert_eq!(PixelOrder::from_str("GRB").unwrap().code(), 2);
        assert_eq!(PixelOrder::from_str("GRBW").unwrap().code(), 8);
    }

    struct CountingSink {
        submitted: Arc<AtomicU32>,
        delay: Duration,
    }

    impl Sink for CountingSink {
        fn configure(&mut self, _: PixelOrder, _: usize) -> Result<(), SinkError> {
            Ok(())
        }
        fn submit(&mut self, _: &Submission) -> Result<(), SinkError> {
            std::thread::sleep(self.delay);
            self.submitted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn submission(seq: u32) -> Submission {
        Submission {
            seq,
            ranges: vec![RangeData {
                offset_px: 0,
                bytes: vec![0; 3],
            }],
        }
    }

    #[test]
    fn worker_consumes_submissions() {
        let submitted = Arc::new(AtomicU32::new(0));
        let stats = Arc::new(Stats::default());
        let handle = SinkHandle::spawn(
            "test".into(),
            Box::new(CountingSink {
                submitted: Arc::clone(&submitted),
                delay: Duration::ZERO,
            }),
            Arc::clone(&stats),
        );
        handle.submit(submission(1), &stats);
        std::thread::sleep(Duration::from_millis(50));
        handle.shutdown();
        assert_eq!(submitted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slow_sink_drops_intermediate_frames() {
        let submitted = Arc::new(AtomicU32::new(0));
        let stats = Arc::new(Stats::default());
        let handle = SinkHandle::spawn(
            "slow".into(),
            Box::new(CountingSink {
                submitted: Arc::clone(&submitted),
                delay: Duration::from_millis(30),
            }),
            Arc::clone(&stats),
        );
        for seq in 0..10 {
            handle.submit(submission(seq), &stats);
            std::thread::sleep(Duration::from_millis(2));
        }
        handle.shutdown();
        let consumed = submitted.load(Ordering::SeqCst);
        let dropped = stats.snapshot().sink_drops_total.get("slow").copied().unwrap_or(0);
        assert!(consumed < 10, "slow sink consumed everything");
        assert!(dropped > 0, "drops were not counted");
    }

    #[test]
    fn pending_submission_is_flushed_on_shutdown() {
        let submitted = Arc::new(AtomicU32::new(0));
        let stats = Arc::new(Stats::default());
        let handle = SinkHandle::spawn(
            "flush".into(),
            Box::new(CountingSink {
                submitted: Arc::clone(&submitted),
                delay: Duration::ZERO,
            }),
            Arc::clone(&stats),
        );
        handle.submit(submission(1), &stats);
        handle.shutdown();
        assert_eq!(submitted.load(Ordering::SeqCst), 1);
    }
}
