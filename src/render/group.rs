use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use crate::color::{Palette, Rgb};
use crate::mapping::PixelMapper;
use crate::pattern::{Pattern, PatternValue, PixelCtx};

/// A contiguous LED range with its own animation parameters, pattern,
/// palette and sink binding. Frozen for the duration of one tick.
#[derive(Clone)]
pub struct GroupSpec {
    pub name: String,
    pub range: Range<usize>,
    pub brightness: f32,
    pub saturation: f32,
    pub speed: f32,
    pub scale: f32,
    pub pattern: Arc<Pattern>,
    pub palette: Arc<Palette>,
    pub sink: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    Rendered,
    /// The pattern has no runnable compiled form.
    NoPattern,
    /// Evaluation blew the soft deadline; the slice was blacked out.
    TimedOut,
}

/// Evaluate one group into its slice of the frame.
///
/// The pattern is invoked exactly once per pixel. The whole slice turns
/// black when the pattern is not runnable or when the soft deadline
/// passes mid-evaluation; the caller raises the group error flag.
pub fn evaluate_group(
    spec: &GroupSpec,
    anim_time: f64,
    mapper: &PixelMapper,
    out: &mut [Rgb],
    deadline: Instant,
) -> GroupOutcome {
    debug_assert_eq!(out.len(), spec.range.len());
    if !spec.pattern.is_runnable() {
        out.fill(Rgb::BLACK);
        return GroupOutcome::NoPattern;
    }

    let t = (anim_time * spec.speed as f64) as f32;
    for index in spec.range.clone() {
        if Instant::now() > deadline {
            // Cadence beats completeness: substitute black for the tick.
            out.fill(Rgb::BLACK);
            return GroupOutcome::TimedOut;
        }
        let slot = &mut out[index - spec.range.start];
        let x = mapper.coord(index) * spec.scale;
        let ctx = PixelCtx {
            t,
            x,
            prev: *slot,
        };
        match spec.pattern.eval(&ctx) {
            Some(value) => *slot = resolve(value, spec),
            None => {
                out.fill(Rgb::BLACK);
                return GroupOutcome::NoPattern;
            }
        }
    }
    GroupOutcome::Rendered
}

fn resolve(value: PatternValue, spec: &GroupSpec) -> Rgb {
    match value {
        PatternValue::PalettePos(p) => {
            let mut hsv = spec.palette.sample(p);
            hsv.s *= spec.saturation;
            hsv.v *= spec.brightness;
            hsv.to_rgb()
        }
        PatternValue::Hsv(mut hsv) => {
            hsv.s *= spec.saturation;
            hsv.v *= spec.brightness;
            hsv.to_rgb()
        }
        PatternValue::Rgb(rgb) => {
            rgb.clamped()
                .with_saturation_brightness(spec.saturation, spec.brightness)
        }
    }
}
