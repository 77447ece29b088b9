//! The fixed-rate render loop.
//!
//! One dedicated thread owns the frame buffers and drives the tick:
//! snapshot configuration, fan group evaluation out to the worker pool,
//! overlay DMX data, run the global color pipeline and hand encoded
//! bytes to the sink workers. The loop never blocks on the network or
//! on sinks; everything it reads arrives through latest-wins channels.

mod group;
mod pipeline;

pub use group::{evaluate_group, GroupOutcome, GroupSpec};
pub use pipeline::{GlobalPipeline, RgbwAlgorithm};

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::artnet::DmxReceiver;
use crate::color::{to_u8, Rgb, Rgbw};
use crate::mapping::PixelMapper;
use crate::sink::{PixelOrder, RangeData, SinkHandle, Submission};
use crate::smoothing::{FrameMode, SmoothingFilter, SpatialMode};
use crate::stats::Stats;
use crate::sync::TimeBase;

/// Fraction of the tick period a group may spend evaluating before its
/// output is abandoned for the tick.
const GROUP_DEADLINE_FRACTION: f64 = 0.8;

const HEALTH_INTERVAL: Duration = Duration::from_secs(10);

/// Smoothing parameters for the DMX overlay.
#[derive(Debug, Clone, Copy)]
pub struct SmoothingParams {
    pub frame_mode: FrameMode,
    pub frame_window: usize,
    pub spatial_mode: SpatialMode,
    pub spatial_window: usize,
}

impl SmoothingParams {
    pub fn build(&self, led_count: usize) -> SmoothingFilter {
        SmoothingFilter::new(
            self.frame_mode,
            self.frame_window,
            self.spatial_mode,
            self.spatial_window,
            led_count,
        )
    }
}

/// Immutable configuration snapshot. The applier builds one of these
/// per accepted change; the loop swaps it in at a tick boundary, so a
/// tick never sees a mixture of old and new parameters.
pub struct RenderConfig {
    pub led_count: usize,
    pub target_fps: f64,
    pub on: bool,
    pub calibration: bool,
    pub pipeline: GlobalPipeline,
    pub groups: Vec<GroupSpec>,
    pub mapper: Arc<PixelMapper>,
    pub artnet_enabled: bool,
    pub smoothing: SmoothingParams,
    pub order: PixelOrder,
}

pub enum EngineCommand {
    /// Swap in a validated configuration snapshot.
    Apply(Arc<RenderConfig>),
    Shutdown,
}

pub struct RenderLoop {
    cfg: Arc<RenderConfig>,
    commands: mpsc::Receiver<EngineCommand>,
    time: TimeBase,
    dmx: Option<DmxReceiver>,
    sinks: HashMap<String, SinkHandle>,
    pool: rayon::ThreadPool,
    stats: Arc<Stats>,

    smoothing: SmoothingFilter,
    scratch: Vec<Vec<Rgb>>,
    frame: Vec<Rgbw>,
    dmx_out: Vec<Rgbw>,
    seen_dmx: bool,
    last_dmx_seq: u64,
    seq: u32,
}

impl RenderLoop {
    pub fn new(
        cfg: Arc<RenderConfig>,
        commands: mpsc::Receiver<EngineCommand>,
        time: TimeBase,
        dmx: Option<DmxReceiver>,
        sinks: HashMap<String, SinkHandle>,
        stats: Arc<Stats>,
    ) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_cpus::get_physical().max(1))
            .thread_name(|i| format!("group-worker-{i}"))
            .build()
            .expect("building group worker pool");
        let led_count = cfg.led_count;
        let smoothing = cfg.smoothing.build(led_count);
        let scratch = cfg
            .groups
            .iter()
            .map(|g| vec![Rgb::BLACK; g.range.len()])
            .collect();
        Self {
            cfg,
            commands,
            time,
            dmx,
            sinks,
            pool,
            stats,
            smoothing,
            scratch,
            frame: vec![Rgbw::BLACK; led_count],
            dmx_out: vec![Rgbw::BLACK; led_count],
            seen_dmx: false,
            last_dmx_seq: 0,
            seq: 0,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("render".into())
            .spawn(move || self.run())
            .expect("spawning render thread")
    }

    pub fn run(mut self) {
        info!(
            fps = self.cfg.target_fps,
            leds = self.cfg.led_count,
            groups = self.cfg.groups.len(),
            "render loop started"
        );
        let mut period = Duration::from_secs_f64(1.0 / self.cfg.target_fps);
        let mut next = Instant::now() + period;
        let mut last_health = Instant::now();

        loop {
            // Pending configuration becomes visible here, never mid-tick.
            let mut shutdown = false;
            while let Ok(command) = self.commands.try_recv() {
                match command {
                    EngineCommand::Apply(cfg) => {
                        self.apply(cfg);
                        period = Duration::from_secs_f64(1.0 / self.cfg.target_fps);
                    }
                    EngineCommand::Shutdown => shutdown = true,
                }
            }
            if shutdown {
                break;
            }

            let tick_start = Instant::now();
            self.tick(tick_start, period);

            let now = Instant::now();
            if now < next {
                std::thread::sleep(next - now);
            } else {
                let behind = now - next;
                if behind > period {
                    // No catch-up: drop to the next aligned slot.
                    let missed = (behind.as_nanos() / period.as_nanos()) as u32;
                    next += period * missed;
                    self.stats.overrun();
                    warn!(missed, "tick overran the frame period");
                }
            }
            next += period;

            if last_health.elapsed() > HEALTH_INTERVAL {
                let snap = self.stats.snapshot();
                debug!(
                    ticks = snap.ticks_total,
                    overruns = snap.overruns_total,
                    "render loop health"
                );
                last_health = Instant::now();
            }
        }

        // Sink workers flush their pending frame on the way out.
        for (_, sink) in self.sinks.drain() {
            sink.shutdown();
        }
        info!("render loop stopped");
    }

    fn apply(&mut self, cfg: Arc<RenderConfig>) {
        self.scratch = cfg
            .groups
            .iter()
            .map(|g| vec![Rgb::BLACK; g.range.len()])
            .collect();
        self.smoothing = cfg.smoothing.build(cfg.led_count);
        self.cfg = cfg;
        info!(groups = self.cfg.groups.len(), "configuration applied");
    }

    fn tick(&mut self, tick_start: Instant, period: Duration) {
        self.stats.tick();
        let cfg = Arc::clone(&self.cfg);

        if cfg.calibration {
            self.frame.fill(cfg.pipeline.calibration_pixel());
        } else if !cfg.on {
            self.frame.fill(Rgbw::BLACK);
        } else if cfg.artnet_enabled {
            self.overlay_dmx(&cfg);
        } else {
            self.render_groups(&cfg, tick_start, period);
        }

        self.submit(&cfg);
    }

    fn render_groups(&mut self, cfg: &RenderConfig, tick_start: Instant, period: Duration) {
        let anim_time = self.time.anim_time();
        let deadline = tick_start + period.mul_f64(GROUP_DEADLINE_FRACTION);

        // Fan out one task per group and join before continuing: all
        // groups see the same anim_time and snapshot, and nothing
        // outlives the tick.
        let scratch = &mut self.scratch;
        let outcomes: Vec<GroupOutcome> = self.pool.install(|| {
            cfg.groups
                .par_iter()
                .zip(scratch.par_iter_mut())
                .map(|(spec, buf)| {
                    buf.fill(Rgb::BLACK);
                    evaluate_group(spec, anim_time, &cfg.mapper, buf, deadline)
                })
                .collect()
        });

        for (spec, outcome) in cfg.groups.iter().zip(&outcomes) {
            match outcome {
                GroupOutcome::Rendered => {}
                GroupOutcome::TimedOut => {
                    self.stats
                        .pattern_error(&spec.name, "pattern evaluation timed out");
                }
                GroupOutcome::NoPattern => {
                    self.stats
                        .pattern_error(&spec.name, "pattern has no compiled form");
                }
            }
        }

        self.frame.fill(Rgbw::BLACK);
        for (spec, buf) in cfg.groups.iter().zip(&self.scratch) {
            for (offset, rgb) in buf.iter().enumerate() {
                self.frame[spec.range.start + offset] = cfg.pipeline.process_rgb(*rgb);
            }
        }
    }

    fn overlay_dmx(&mut self, cfg: &RenderConfig) {
        if let Some(rx) = &self.dmx {
            let latest = rx.borrow().clone();
            if let Some(frame) = latest {
                if !frame.is_stale() && frame.seq != self.last_dmx_seq {
                    self.last_dmx_seq = frame.seq;
                    let smoothed = self.smoothing.apply(&frame.pixels);
                    self.dmx_out.copy_from_slice(smoothed);
                    self.seen_dmx = true;
                }
            }
        }
        if self.seen_dmx {
            // On staleness the last received frame is held.
            for (out, px) in self.frame.iter_mut().zip(&self.dmx_out) {
                *out = cfg.pipeline.process_rgbw(*px);
            }
        } else {
            self.frame.fill(Rgbw::BLACK);
        }
    }

    fn submit(&mut self, cfg: &RenderConfig) {
        self.seq = self.seq.wrapping_add(1);
        let bpp = cfg.order.bytes_per_pixel();

        let mut per_sink: HashMap<&str, Vec<RangeData>> = HashMap::new();
        for spec in &cfg.groups {
            let mut bytes = vec![0u8; spec.range.len() * bpp];
            for (j, index) in spec.range.clone().enumerate() {
                let px = self.frame[index];
                let quantized = [to_u8(px.r), to_u8(px.g), to_u8(px.b), to_u8(px.w)];
                cfg.order.encode(quantized, &mut bytes[j * bpp..(j + 1) * bpp]);
            }
            per_sink
                .entry(spec.sink.as_str())
                .or_default()
                .push(RangeData {
                    offset_px: spec.range.start,
                    bytes,
                });
        }

        for (name, ranges) in per_sink {
            if let Some(handle) = self.sinks.get(name) {
                handle.submit(
                    Submission {
                        seq: self.seq,
                        ranges,
                    },
                    &self.stats,
                );
            }
        }
    }
}
