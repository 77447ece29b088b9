//! Engine counters and last-error state.
//!
//! Everything the render loop touches per tick is a relaxed atomic so
//! the hot path never blocks; the string fields sit behind a mutex and
//! are only written on faults.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Stats {
    pub ticks_total: AtomicU64,
    pub overruns_total: AtomicU64,
    pub artnet_packets_total: AtomicU64,
    pub artnet_drops_total: AtomicU64,
    pub pattern_errors_total: Mutex<HashMap<String, u64>>,
    pub sink_drops_total: Mutex<HashMap<String, u64>>,
    last_group_error: Mutex<HashMap<String, String>>,
    last_sync: Mutex<Option<SystemTime>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub ticks_total: u64,
    pub overruns_total: u64,
    pub artnet_packets_total: u64,
    pub artnet_drops_total: u64,
    pub pattern_errors_total: HashMap<String, u64>,
    pub sink_drops_total: HashMap<String, u64>,
    pub last_group_error: HashMap<String, String>,
    pub last_sync: Option<SystemTime>,
}

impl Stats {
    pub fn tick(&self) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn overrun(&self) {
        self.overruns_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn artnet_packet(&self) {
        self.artnet_packets_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn artnet_drop(&self) {
        self.artnet_drops_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pattern_error(&self, group: &str, message: impl Into<String>) {
        let mut counts = self.pattern_errors_total.lock().unwrap();
        *counts.entry(group.to_string()).or_default() += 1;
        drop(counts);
        self.last_group_error
            .lock()
            .unwrap()
            .insert(group.to_string(), message.into());
    }

    pub fn sink_drop(&self, sink: &str) {
        let mut counts = self.sink_drops_total.lock().unwrap();
        *counts.entry(sink.to_string()).or_default() += 1;
    }

    pub fn sync_received(&self) {
        *self.last_sync.lock().unwrap() = Some(SystemTime::now());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            overruns_total: self.overruns_total.load(Ordering::Relaxed),
            artnet_packets_total: self.artnet_packets_total.load(Ordering::Relaxed),
            artnet_drops_total: self.artnet_drops_total.load(Ordering::Relaxed),
            pattern_errors_total: self.pattern_errors_total.lock().unwrap().clone(),
            sink_drops_total: self.sink_drops_total.lock().unwrap().clone(),
            last_group_error: self.last_group_error.lock().unwrap().clone(),
            last_sync: *self.last_sync.lock().unwrap(),
        }
    }
}
