//! End-to-end scenarios across module boundaries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ledvibe::color::{blackbody_to_rgb, rgbw_legacy, to_u8, AdvancedRgbw, Hsv, Palette, Rgb, Rgbw};
use ledvibe::mapping::PixelMapper;
use ledvibe::pattern::Pattern;
use ledvibe::render::{
    EngineCommand, GlobalPipeline, GroupOutcome, GroupSpec, RenderConfig, RenderLoop,
    RgbwAlgorithm, SmoothingParams,
};
use ledvibe::smoothing::{FrameMode, SmoothingFilter, SpatialMode};
use ledvibe::stats::Stats;
use ledvibe::sync::TimeBase;

fn red_green_palette() -> Arc<Palette> {
    Arc::new(Palette::new(
        "red-green",
        vec![Hsv::new(0.0, 1.0, 1.0), Hsv::new(1.0 / 3.0, 1.0, 1.0)],
        false,
    ))
}

fn neutral_pipeline() -> GlobalPipeline {
    GlobalPipeline {
        saturation: 1.0,
        brightness: 1.0,
        correction: Rgb::WHITE,
        gamma: 1.0,
        use_white_channel: false,
        algorithm: RgbwAlgorithm::Legacy,
        advanced: AdvancedRgbw::new(6500.0, 5000.0),
    }
}

/// Palette cycle over four LEDs at t = 0.25: every stage of the group
/// path (mapping, pattern eval, wraparound palette sampling with
/// shortest-arc hue, HSV conversion, quantization) pinned to bytes.
#[test]
fn palette_cycle_frame_at_quarter_second() {
    let spec = GroupSpec {
        name: "main".into(),
        range: 0..4,
        brightness: 1.0,
        saturation: 1.0,
        speed: 1.0,
        scale: 1.0,
        pattern: Arc::new(Pattern::from_source("cycle", "palette(t + x)", true).unwrap()),
        palette: red_green_palette(),
        sink: "local".into(),
    };
    let mapper = PixelMapper::line(4);
    let mut out = vec![Rgb::BLACK; 4];
    let outcome = ledvibe::render::evaluate_group(
        &spec,
        0.25,
        &mapper,
        &mut out,
        Instant::now() + Duration::from_secs(1),
    );
    assert_eq!(outcome, GroupOutcome::Rendered);

    let bytes: Vec<[u8; 3]> = out
        .iter()
        .map(|p| [to_u8(p.r), to_u8(p.g), to_u8(p.b)])
        .collect();
    // x = i/3; p = frac(0.25 + x); two stops sampled with wraparound:
    //   p=0.25   -> f=0.5 between red and green -> hue 60    (255,255,0)
    //   p=0.5833 -> f=1/6 back from green to red -> hue 100  (85,255,0)
    //   p=0.9167 -> f=5/6 back from green to red -> hue 20   (255,85,0)
    //   p=0.25 (x wrapped) -> same as pixel 0
    assert_eq!(bytes[0], [255, 255, 0]);
    assert_eq!(bytes[1], [85, 255, 0]);
    assert_eq!(bytes[2], [255, 85, 0]);
    assert_eq!(bytes[3], [255, 255, 0]);
}

/// Advanced RGBW on pure white with a warm white LED: the white channel
/// maxes out at the neutral strength and total emitted light beats the
/// legacy algorithm.
#[test]
fn advanced_rgbw_white_extraction_beats_legacy() {
    let conv = AdvancedRgbw::new(6500.0, 5000.0);
    let out = conv.convert(Rgb::WHITE, 1.0);

    // desired equals the 6500K target; its red channel caps w at 1.
    assert!((out.w - 1.0).abs() < 1e-6);
    assert!(out.r >= 0.0 && out.g >= 0.0 && out.b >= 0.0);

    let target = blackbody_to_rgb(6500.0);
    let white = conv.white_spectrum();
    for (residual, (t, w)) in [
        (out.r, (target.r, white.r)),
        (out.g, (target.g, white.g)),
        (out.b, (target.b, white.b)),
    ] {
        assert!((residual + out.w * w - t).abs() <= 1.0 / 255.0);
    }

    let legacy = rgbw_legacy(Rgb::WHITE, true);
    let total_advanced = out.r + out.g + out.b + out.w;
    let total_legacy = legacy.r + legacy.g + legacy.b + legacy.w;
    assert!(total_advanced > total_legacy);
}

/// ArtNet over a real socket: the packet from the spec lands as four
/// exact RGBW pixels before the global pipeline touches them.
#[tokio::test]
async fn artnet_packet_decodes_over_udp() {
    use ledvibe::artnet::{self, DmxPublisher, DmxSettings, ARTNET_PORT};

    let settings = DmxSettings {
        universe: 0,
        channel_offset: 0,
        group_size: 1,
        led_count: 4,
    };
    let (publisher, mut rx) = DmxPublisher::channel();
    let stats = Arc::new(Stats::default());
    let receiver = tokio::spawn(artnet::run_artnet(settings, publisher, Arc::clone(&stats)));

    // Give the receiver a moment to bind.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut packet = Vec::new();
    packet.extend_from_slice(b"Art-Net\0");
    packet.extend_from_slice(&0x5000u16.to_le_bytes());
    packet.extend_from_slice(&[0, 14, 0, 0]); // protocol version, seq, physical
    packet.extend_from_slice(&0u16.to_le_bytes()); // universe
    let payload: &[u8] = &[
        0xFF, 0x00, 0x00, 0x00, //
        0x00, 0xFF, 0x00, 0x00, //
        0x00, 0x00, 0xFF, 0x00, //
        0x00, 0x00, 0x00, 0xFF,
    ];
    packet.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    packet.extend_from_slice(payload);

    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender
        .send_to(&packet, ("127.0.0.1", ARTNET_PORT))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), rx.changed())
        .await
        .expect("no frame published")
        .unwrap();
    let frame = rx.borrow().clone().expect("frame present");
    assert_eq!(frame.pixels[0], Rgbw::new(1.0, 0.0, 0.0, 0.0));
    assert_eq!(frame.pixels[1], Rgbw::new(0.0, 1.0, 0.0, 0.0));
    assert_eq!(frame.pixels[2], Rgbw::new(0.0, 0.0, 1.0, 0.0));
    assert_eq!(frame.pixels[3], Rgbw::new(0.0, 0.0, 0.0, 1.0));
    assert_eq!(stats.snapshot().artnet_packets_total, 1);

    receiver.abort();
}

/// Gaussian spatial smoothing of an impulse: symmetric spread, energy
/// centered on the middle pixel.
#[test]
fn gaussian_smoothing_impulse_is_symmetric() {
    let mut filter = SmoothingFilter::new(FrameMode::None, 1, SpatialMode::Gaussian, 3, 3);
    let input = [
        Rgbw::new(0.0, 0.0, 0.0, 0.0),
        Rgbw::new(1.0, 0.0, 0.0, 0.0),
        Rgbw::new(0.0, 0.0, 0.0, 0.0),
    ];
    let out = filter.apply(&input).to_vec();
    assert!((out[0].r - out[2].r).abs() < 1e-6);
    assert!(out[1].r > out[0].r);
    assert!(out[0].r > 0.0);
}

/// Time sync over a real socket: a slave that received anim_time=10.0
/// predicts ~10.5 half a second later with no further packets.
#[tokio::test]
async fn sync_slave_predicts_between_packets() {
    use ledvibe::sync::{self, encode_packet, SyncPacket, SYNC_PORT};

    let (tx, base) = TimeBase::new();
    let stats = Arc::new(Stats::default());
    let slave = tokio::spawn(sync::run_slave(tx, Arc::clone(&stats)));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let packet = encode_packet(&SyncPacket {
        flags: 0,
        master_wall_ns: 0,
        anim_time_s: 10.0,
    });
    let sent_at = Instant::now();
    sender
        .send_to(&packet, ("127.0.0.1", SYNC_PORT))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let predicted = base.anim_time();
    let expected = 10.0 + sent_at.elapsed().as_secs_f64();
    assert!(
        (predicted - expected).abs() < 0.05,
        "predicted {predicted}, expected about {expected}"
    );
    assert!(stats.snapshot().last_sync.is_some());

    slave.abort();
}

/// The loop holds cadence: at 100 fps for half a second the tick count
/// lands near 50 and a clean shutdown stops the loop.
#[test]
fn render_loop_holds_cadence() {
    let cfg = RenderConfig {
        led_count: 8,
        target_fps: 100.0,
        on: true,
        calibration: false,
        pipeline: neutral_pipeline(),
        groups: vec![GroupSpec {
            name: "main".into(),
            range: 0..8,
            brightness: 1.0,
            saturation: 1.0,
            speed: 1.0,
            scale: 1.0,
            pattern: Arc::new(Pattern::from_source("cycle", "palette(t + x)", true).unwrap()),
            palette: red_green_palette(),
            sink: "local".into(),
        }],
        mapper: Arc::new(PixelMapper::line(8)),
        artnet_enabled: false,
        smoothing: SmoothingParams {
            frame_mode: FrameMode::None,
            frame_window: 1,
            spatial_mode: SpatialMode::None,
            spatial_window: 1,
        },
        order: "GRB".parse().unwrap(),
    };

    let (tx, rx) = tokio::sync::mpsc::channel(4);
    let (_sync_tx, time) = TimeBase::new();
    let stats = Arc::new(Stats::default());
    let handle = RenderLoop::new(
        Arc::new(cfg),
        rx,
        time,
        None,
        HashMap::new(),
        Arc::clone(&stats),
    )
    .spawn();

    std::thread::sleep(Duration::from_millis(500));
    tx.blocking_send(EngineCommand::Shutdown).unwrap();
    handle.join().unwrap();

    let ticks = stats.snapshot().ticks_total;
    assert!(
        (30..=70).contains(&ticks),
        "expected about 50 ticks, got {ticks}"
    );
}
