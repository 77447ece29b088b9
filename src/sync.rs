//! Cross-node animation time base.
//!
//! A master broadcasts its animation clock over UDP; slaves follow it
//! with a first-order correction filter. With sync disabled the time
//! base is simply the monotonic clock since startup. Alignment is
//! coarse by design: slaves may step by up to half a broadcast period
//! on resync and patterns are expected to tolerate that.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::stats::Stats;
use std::sync::Arc;

pub const SYNC_PORT: u16 = 6455;
pub const PACKET_LEN: usize = 24;

const MAGIC: &[u8; 4] = b"LCTS";
const VERSION: u16 = 1;

/// Weight of the received time versus the local prediction when a
/// slave resyncs.
const CORRECTION_GAIN: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Off,
    Master,
    Slave,
}

/// Anchor of the animation clock: the animation time observed at a
/// particular instant. The clock advances at wall rate from there.
#[derive(Debug, Clone, Copy)]
pub struct TimeEstimate {
    pub anim_time: f64,
    pub at: Instant,
}

impl TimeEstimate {
    pub fn anim_time_at(&self, now: Instant) -> f64 {
        self.anim_time + now.saturating_duration_since(self.at).as_secs_f64()
    }
}

/// Read handle for the shared animation clock.
#[derive(Debug, Clone)]
pub struct TimeBase {
    rx: watch::Receiver<TimeEstimate>,
}

impl TimeBase {
    /// Clock anchored at startup; used for the off and master modes,
    /// and as the slave's starting point before the first packet.
    pub fn new() -> (watch::Sender<TimeEstimate>, TimeBase) {
        let (tx, rx) = watch::channel(TimeEstimate {
            anim_time: 0.0,
            at: Instant::now(),
        });
        (tx, TimeBase { rx })
    }

    pub fn anim_time(&self) -> f64 {
        self.rx.borrow().anim_time_at(Instant::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncPacket {
    pub flags: u16,
    pub master_wall_ns: i64,
    pub anim_time_s: f64,
}

pub fn encode_packet(p: &SyncPacket) -> [u8; PACKET_LEN] {
    let mut buf = [0u8; PACKET_LEN];
    buf[0..4].copy_from_slice(MAGIC);
    buf[4..6].copy_from_slice(&VERSION.to_le_bytes());
    buf[6..8].copy_from_slice(&p.flags.to_le_bytes());
    buf[8..16].copy_from_slice(&p.master_wall_ns.to_le_bytes());
    buf[16..24].copy_from_slice(&p.anim_time_s.to_le_bytes());
    buf
}

pub fn decode_packet(buf: &[u8]) -> Option<SyncPacket> {
    if buf.len() < PACKET_LEN || &buf[0..4] != MAGIC {
        return None;
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version != VERSION {
        return None;
    }
    Some(SyncPacket {
        flags: u16::from_le_bytes([buf[6], buf[7]]),
        master_wall_ns: i64::from_le_bytes(buf[8..16].try_into().ok()?),
        anim_time_s: f64::from_le_bytes(buf[16..24].try_into().ok()?),
    })
}

/// Broadcast the local animation clock every `interval_s` seconds.
pub async fn run_master(interval_s: f64, time: TimeBase) -> Result<()> {
    let interval = interval_s.clamp(0.1, 5.0);
    let socket = UdpSocket::bind(("0.0.0.0", 0))
        .await
        .context("binding sync master socket")?;
    socket
        .set_broadcast(true)
        .context("enabling sync broadcast")?;
    info!(interval, "time sync master broadcasting on {SYNC_PORT}");

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(interval));
    loop {
        ticker.tick().await;
        let wall_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        let packet = encode_packet(&SyncPacket {
            flags: 0,
            master_wall_ns: wall_ns,
            anim_time_s: time.anim_time(),
        });
        if let Err(e) = socket
            .send_to(&packet, ("255.255.255.255", SYNC_PORT))
            .await
        {
            warn!("sync broadcast failed: {e}");
        }
    }
}

/// Follow the first master seen after enabling. Each packet nudges the
/// local clock toward the received time.
pub async fn run_slave(
    tx: watch::Sender<TimeEstimate>,
    stats: Arc<Stats>,
) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", SYNC_PORT))
        .await
        .context("binding sync slave socket")?;
    info!("time sync slave listening on {SYNC_PORT}");

    let mut master: Option<std::net::SocketAddr> = None;
    let mut synced = false;
    let mut buf = [0u8; 64];
    loop {
        let (len, addr) = socket.recv_from(&mut buf).await?;
        let Some(packet) = decode_packet(&buf[..len]) else {
            debug!(%addr, "ignoring malformed sync packet");
            continue;
        };
        match master {
            None => {
                master = Some(addr);
                info!(%addr, "following time sync master");
            }
            Some(m) if m != addr => continue,
            Some(_) => {}
        }

        let now = Instant::now();
        let estimate = if !synced {
            synced = true;
            TimeEstimate {
                anim_time: packet.anim_time_s,
                at: now,
            }
        } else {
            let predicted = tx.borrow().anim_time_at(now);
            TimeEstimate {
                anim_time: predicted
                    + CORRECTION_GAIN * (packet.anim_time_s - predicted),
                at: now,
            }
        };
        let _ = tx.send(estimate);
        stats.sync_received();
        debug!(anim_time = estimate.anim_time, "sync update");
    }
}
