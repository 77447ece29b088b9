//! ArtNet and sACN (E1.31) DMX ingestion.
//!
//! Each receiver runs as its own task, decodes matching packets into a
//! full-strip RGBW frame and publishes it latest-wins through a watch
//! channel. The render loop reads the channel without blocking; frames
//! older than the staleness timeout are ignored by the reader.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::color::Rgbw;
use crate::stats::Stats;

pub const ARTNET_PORT: u16 = 6454;
pub const SACN_PORT: u16 = 5568;

/// Published frames older than this are treated as stale; the render
/// loop then freezes on the last frame it saw.
pub const STALE_AFTER: Duration = Duration::from_secs(3);

const ARTNET_HEADER: &[u8] = b"Art-Net\0";
const OPCODE_ART_DMX: u16 = 0x5000;

const SACN_ROOT_VECTOR: u32 = 0x0000_0004;
const SACN_FRAMING_VECTOR: u32 = 0x0000_0002;

#[derive(Debug, Clone, Copy)]
pub struct DmxSettings {
    pub universe: u16,
    pub channel_offset: usize,
    /// Consecutive LEDs driven by one DMX pixel.
    pub group_size: usize,
    pub led_count: usize,
}

impl DmxSettings {
    /// DMX pixels carried for this strip.
    pub fn dmx_pixels(&self) -> usize {
        self.led_count.div_ceil(self.group_size.max(1))
    }
}

/// One decoded DMX frame covering the whole strip.
#[derive(Debug, Clone)]
pub struct DmxFrame {
    pub seq: u64,
    pub received: Instant,
    pub pixels: Vec<Rgbw>,
}

impl DmxFrame {
    pub fn is_stale(&self) -> bool {
        self.received.elapsed() > STALE_AFTER
    }
}

pub type DmxReceiver = watch::Receiver<Option<Arc<DmxFrame>>>;

/// Shared publication point for the ArtNet and sACN tasks.
pub struct DmxPublisher {
    tx: watch::Sender<Option<Arc<DmxFrame>>>,
    seq: AtomicU64,
}

impl DmxPublisher {
    pub fn channel() -> (Arc<Self>, DmxReceiver) {
        let (tx, rx) = watch::channel(None);
        (
            Arc::new(Self {
                tx,
                seq: AtomicU64::new(0),
            }),
            rx,
        )
    }

    pub fn publish(&self, pixels: Vec<Rgbw>) {
        let frame = DmxFrame {
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            received: Instant::now(),
            pixels,
        };
        // Send only fails when the render loop is gone; nothing to do then.
        let _ = self.tx.send(Some(Arc::new(frame)));
    }
}

/// Listen for ArtNet OpDmx packets on UDP 6454.
pub async fn run_artnet(
    settings: DmxSettings,
    publisher: Arc<DmxPublisher>,
    stats: Arc<Stats>,
) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", ARTNET_PORT))
        .await
        .context("binding ArtNet socket")?;
    info!(
        universe = settings.universe,
        offset = settings.channel_offset,
        "ArtNet receiver listening on {ARTNET_PORT}"
    );

    let mut buf = [0u8; 1024];
    loop {
        let (len, addr) = socket.recv_from(&mut buf).await?;
        match decode_artnet(&buf[..len], &settings) {
            Decode::Frame(pixels) => {
                stats.artnet_packet();
                publisher.publish(pixels);
            }
            Decode::OtherUniverse => {}
            Decode::Malformed => {
                stats.artnet_drop();
                debug!(%addr, len, "dropping malformed ArtNet packet");
            }
        }
    }
}

/// Listen for sACN (E1.31) packets on the per-universe multicast group.
pub async fn run_sacn(
    settings: DmxSettings,
    publisher: Arc<DmxPublisher>,
    stats: Arc<Stats>,
) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", SACN_PORT))
        .await
        .context("binding sACN socket")?;
    let group = sacn_multicast_group(settings.universe);
    socket
        .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
        .with_context(|| format!("joining sACN multicast group {group}"))?;
    info!(universe = settings.universe, %group, "sACN receiver listening on {SACN_PORT}");

    let mut buf = [0u8; 1024];
    loop {
        let (len, addr) = socket.recv_from(&mut buf).await?;
        match decode_sacn(&buf[..len], &settings) {
            Decode::Frame(pixels) => {
                stats.artnet_packet();
                publisher.publish(pixels);
            }
            Decode::OtherUniverse => {}
            Decode::Malformed => {
                stats.artnet_drop();
                debug!(%addr, len, "dropping malformed sACN packet");
            }
        }
    }
}

/// Multicast group for an sACN universe: 239.255.<hi>.<lo>.
pub fn sacn_multicast_group(universe: u16) -> Ipv4Addr {
    let [hi, lo] = universe.to_be_bytes();
    Ipv4Addr::new(239, 255, hi, lo)
}

enum Decode {
    Frame(Vec<Rgbw>),
    OtherUniverse,
    Malformed,
}

fn decode_artnet(pkt: &[u8], settings: &DmxSettings) -> Decode {
    if pkt.len() < 18 || &pkt[..8] != ARTNET_HEADER {
        return Decode::Malformed;
    }
    let opcode = u16::from_le_bytes([pkt[8], pkt[9]]);
    if opcode != OPCODE_ART_DMX {
        return Decode::Malformed;
    }
    let universe = u16::from_le_bytes([pkt[14], pkt[15]]);
    if universe != settings.universe {
        return Decode::OtherUniverse;
    }
    let length = u16::from_be_bytes([pkt[16], pkt[17]]) as usize;
    if length < 2 || length > 512 || pkt.len() < 18 + length {
        return Decode::Malformed;
    }
    Decode::Frame(pixels_from_dmx(&pkt[18..18 + length], settings))
}

fn decode_sacn(pkt: &[u8], settings: &DmxSettings) -> Decode {
    if pkt.len() < 126 {
        return Decode::Malformed;
    }
    let root_vector = u32::from_be_bytes([pkt[18], pkt[19], pkt[20], pkt[21]]);
    if root_vector != SACN_ROOT_VECTOR {
        return Decode::Malformed;
    }
    let framing_vector = u32::from_be_bytes([pkt[40], pkt[41], pkt[42], pkt[43]]);
    if framing_vector != SACN_FRAMING_VECTOR {
        return Decode::Malformed;
    }
    let universe = u16::from_be_bytes([pkt[113], pkt[114]]);
    if universe != settings.universe {
        return Decode::OtherUniverse;
    }
    // Property value count includes the DMX start code.
    let count = u16::from_be_bytes([pkt[123], pkt[124]]) as usize;
    if count == 0 || pkt.len() < 125 + count {
        return Decode::Malformed;
    }
    let start_code = pkt[125];
    if start_code != 0 {
        // Non-dimmer data; not an error, but nothing for us.
        return Decode::OtherUniverse;
    }
    Decode::Frame(pixels_from_dmx(&pkt[126..125 + count], settings))
}

/// Expand a DMX payload into a full-strip RGBW frame. Each 4-byte DMX
/// pixel is replicated across `group_size` consecutive LEDs; channels
/// beyond the payload stay black.
fn pixels_from_dmx(data: &[u8], settings: &DmxSettings) -> Vec<Rgbw> {
    let group_size = settings.group_size.max(1);
    let mut pixels = vec![Rgbw::BLACK; settings.led_count];
    for k in 0..settings.dmx_pixels() {
        let base = settings.channel_offset + k * 4;
        if base + 4 > data.len() {
            break;
        }
        let pixel = Rgbw::new(
            data[base] as f32 / 255.0,
            data[base + 1] as f32 / 255.0,
            data[base + 2] as f32 / 255.0,
            data[base + 3] as f32 / 255.0,
        );
        let start = k * group_size;
        for led in start..(start + group_size).min(settings.led_count) {
            pixels[led] = pixel;
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DmxSettings {
        DmxSettings {
            universe: 0,
            channel_offset: 0,
            group_size: 1,
            led_count: 4,
        }
    }

    fn artnet_packet(universe: u16, data: &[u8]) -> Vec<u8> {
        let mut pkt = Vec::new();
        pkt.extend_from_slice(ARTNET_HEADER);
        pkt.extend_from_slice(&OPCODE_ART_DMX.to_le_bytes());
        pkt.extend_from_slice(&[0, 14]); // protocol version
        pkt.push(0); // sequence
        pkt.push(0); // physical
        pkt.extend_from_slice(&universe.to_le_bytes());
        pkt.extend_from_slice(&(data.len() as u16).to_be_bytes());
        pkt.extend_from_slice(data);
        pkt
    }

    #[test]
    fn decodes_rgbw_pixels_exactly() {
        let data: Vec<u8> = vec![
            0xFF, 0x00, 0x00, 0x00, //
            0x00, 0xFF, 0x00, 0x00, //
            0x00, 0x00, 0xFF, 0x00, //
            0x00, 0x00, 0x00, 0xFF,
        ];
        let pkt = artnet_packet(0, &data);
        let pixels = match decode_artnet(&pkt, &settings()) {
            Decode::Frame(p) => p,
            _ => panic!("expected a frame"),
        };
        assert_eq!(pixels[0], Rgbw::new(1.0, 0.0, 0.0, 0.0));
        assert_eq!(pixels[1], Rgbw::new(0.0, 1.0, 0.0, 0.0));
        assert_eq!(pixels[2], Rgbw::new(0.0, 0.0, 1.0, 0.0));
        assert_eq!(pixels[3], Rgbw::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn group_size_replicates_pixels() {
        let s = DmxSettings {
            group_size: 2,
            ..settings()
        };
        let data = vec![0xFF, 0, 0, 0, 0, 0xFF, 0, 0];
        let pixels = pixels_from_dmx(&data, &s);
        assert_eq!(pixels[0], pixels[1]);
        assert_eq!(pixels[2], pixels[3]);
        assert_eq!(pixels[0].r, 1.0);
        assert_eq!(pixels[2].g, 1.0);
    }

    #[test]
    fn channel_offset_skips_leading_channels() {
        let s = DmxSettings {
            channel_offset: 2,
            led_count: 1,
            ..settings()
        };
        let data = vec![9, 9, 0x80, 0x40, 0x20, 0x10];
        let pixels = pixels_from_dmx(&data, &s);
        assert!((pixels[0].r - 128.0 / 255.0).abs() < 1e-6);
        assert!((pixels[0].w - 16.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn short_payload_leaves_tail_black() {
        let data = vec![0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let pixels = pixels_from_dmx(&data, &settings());
        assert_eq!(pixels[0].r, 1.0);
        assert_eq!(pixels[1], Rgbw::BLACK);
        assert_eq!(pixels.len(), 4);
    }

    #[test]
    fn wrong_universe_is_ignored_not_dropped() {
        let pkt = artnet_packet(3, &[0; 8]);
        assert!(matches!(
            decode_artnet(&pkt, &settings()),
            Decode::OtherUniverse
        ));
    }

    #[test]
    fn malformed_packets_are_rejected() {
        assert!(matches!(decode_artnet(b"nope", &settings()), Decode::Malformed));
        let mut pkt = artnet_packet(0, &[0; 8]);
        pkt[8] = 0x99; // wrong opcode
        assert!(matches!(decode_artnet(&pkt, &settings()), Decode::Malformed));
        let mut pkt = artnet_packet(0, &[0; 8]);
        pkt.truncate(20); // length field now lies
        assert!(matches!(decode_artnet(&pkt, &settings()), Decode::Malformed));
    }

    fn sacn_packet(universe: u16, data: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0u8; 126 + data.len()];
        pkt[0] = 0x00;
        pkt[1] = 0x10; // preamble size
        pkt[4..16].copy_from_slice(b"ASC-E1.17\0\0\0");
        pkt[18..22].copy_from_slice(&SACN_ROOT_VECTOR.to_be_bytes());
        pkt[40..44].copy_from_slice(&SACN_FRAMING_VECTOR.to_be_bytes());
        pkt[113..115].copy_from_slice(&universe.to_be_bytes());
        pkt[123..125].copy_from_slice(&((data.len() + 1) as u16).to_be_bytes());
        pkt[125] = 0; // DMX start code
        pkt[126..].copy_from_slice(data);
        pkt
    }

    #[test]
    fn sacn_decodes_matching_universe() {
        let data = vec![0xFF, 0, 0, 0];
        let s = DmxSettings {
            led_count: 1,
            ..settings()
        };
        let pixels = match decode_sacn(&sacn_packet(0, &data), &s) {
            Decode::Frame(p) => p,
            _ => panic!("expected a frame"),
        };
        assert_eq!(pixels[0].r, 1.0);
    }

    #[test]
    fn sacn_rejects_wrong_vectors_and_start_code() {
        let data = vec![0xFF, 0, 0, 0];
        let mut pkt = sacn_packet(0, &data);
        pkt[21] = 9;
        assert!(matches!(decode_sacn(&pkt, &settings()), Decode::Malformed));

        let mut pkt = sacn_packet(0, &data);
        pkt[43] = 9;
        assert!(matches!(decode_sacn(&pkt, &settings()), Decode::Malformed));

        let mut pkt = sacn_packet(0, &data);
        pkt[125] = 0x01; // alternate start code: ignored, not an error
        assert!(matches!(decode_sacn(&pkt, &settings()), Decode::OtherUniverse));
    }

    #[test]
    fn multicast_group_follows_universe_bytes() {
        assert_eq!(sacn_multicast_group(1), Ipv4Addr::new(239, 255, 0, 1));
        assert_eq!(sacn_multicast_group(0x1234), Ipv4Addr::new(239, 255, 0x12, 0x34));
    }
}
