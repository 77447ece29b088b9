//! Temporal and spatial smoothing for overlaid DMX frames.
//!
//! Both stages are pure functions of the input frame, the history ring
//! and the configured parameters. Buffers are sized when the filter is
//! built; the steady state does not allocate.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::color::Rgbw;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameMode {
    #[default]
    None,
    Average,
    Lerp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialMode {
    #[default]
    None,
    Average,
    Lerp,
    Gaussian,
}

#[derive(Debug)]
pub struct SmoothingFilter {
    frame_mode: FrameMode,
    frame_window: usize,
    spatial_mode: SpatialMode,
    kernel: Vec<f32>,
    ring: VecDeque<Vec<Rgbw>>,
    temporal: Vec<Rgbw>,
    output: Vec<Rgbw>,
}

impl SmoothingFilter {
    pub fn new(
        frame_mode: FrameMode,
        frame_window: usize,
        spatial_mode: SpatialMode,
        spatial_window: usize,
        led_count: usize,
    ) -> Self {
        let frame_window = frame_window.max(1);
        // Kernel length is forced odd so it centers on the pixel.
        let spatial_window = spatial_window.max(1) | 1;
        Self {
            frame_mode,
            frame_window,
            spatial_mode,
            kernel: build_kernel(spatial_mode, spatial_window),
            ring: VecDeque::with_capacity(frame_window),
            temporal: vec![Rgbw::BLACK; led_count],
            output: vec![Rgbw::BLACK; led_count],
        }
    }

    /// Push one input frame and return the smoothed result.
    pub fn apply(&mut self, frame: &[Rgbw]) -> &[Rgbw] {
        self.push(frame);
        self.temporal_pass();
        self.spatial_pass();
        &self.output
    }

    /// Most recent smoothed result without advancing the ring.
    pub fn last(&self) -> &[Rgbw] {
        &self.output
    }

    fn push(&mut self, frame: &[Rgbw]) {
        // Recycle the oldest buffer once the ring is full.
        let mut buf = if self.ring.len() == self.frame_window {
            self.ring.pop_front().unwrap()
        } else {
            vec![Rgbw::BLACK; self.temporal.len()]
        };
        buf.clear();
        buf.extend_from_slice(frame);
        buf.resize(self.temporal.len(), Rgbw::BLACK);
        self.ring.push_back(buf);
    }

    fn temporal_pass(&mut self) {
        let current = self.ring.back().expect("ring is never empty after push");
        match self.frame_mode {
            FrameMode::None => self.temporal.copy_from_slice(current),
            FrameMode::Average => {
                let scale = 1.0 / self.ring.len() as f32;
                for (i, out) in self.temporal.iter_mut().enumerate() {
                    let mut acc = Rgbw::BLACK;
                    for frame in &self.ring {
                        let p = frame[i];
                        acc.r += p.r;
                        acc.g += p.g;
                        acc.b += p.b;
                        acc.w += p.w;
                    }
                    *out = Rgbw::new(acc.r * scale, acc.g * scale, acc.b * scale, acc.w * scale);
                }
            }
            FrameMode::Lerp => {
                let alpha = 1.0 / self.frame_window as f32;
                let oldest = self.ring.front().expect("ring is never empty after push");
                for (i, out) in self.temporal.iter_mut().enumerate() {
                    let old = oldest[i];
                    let new = current[i];
                    *out = Rgbw::new(
                        old.r + (new.r - old.r) * alpha,
                        old.g + (new.g - old.g) * alpha,
                        old.b + (new.b - old.b) * alpha,
                        old.w + (new.w - old.w) * alpha,
                    );
                }
            }
        }
    }

    fn spatial_pass(&mut self) {
        if self.spatial_mode == SpatialMode::None || self.kernel.len() == 1 {
            self.output.copy_from_slice(&self.temporal);
            return;
        }
        let half = (self.kernel.len() / 2) as isize;
        let n = self.temporal.len() as isize;
        for i in 0..n {
            let mut acc = Rgbw::BLACK;
            let mut weight = 0.0;
            for (k, &kw) in self.kernel.iter().enumerate() {
                let j = i + k as isize - half;
                if j < 0 || j >= n {
                    continue;
                }
                let p = self.temporal[j as usize];
                acc.r += p.r * kw;
                acc.g += p.g * kw;
                acc.b += p.b * kw;
                acc.w += p.w * kw;
                weight += kw;
            }
            // Weights renormalize over the in-range subset at the edges.
            let inv = if weight > 0.0 { 1.0 / weight } else { 0.0 };
            self.output[i as usize] =
                Rgbw::new(acc.r * inv, acc.g * inv, acc.b * inv, acc.w * inv);
        }
    }
}

fn build_kernel(mode: SpatialMode, window: usize) -> Vec<f32> {
    let weights: Vec<f32> = match mode {
        SpatialMode::None => vec![1.0],
        SpatialMode::Average => vec![1.0; window],
        SpatialMode::Lerp => {
            let half = (window / 2) as f32;
            (0..window)
                .map(|i| half + 1.0 - (i as f32 - half).abs())
                .collect()
        }
        SpatialMode::Gaussian => {
            let sigma = (window as f32 / 4.0).max(1.0);
            let half = (window / 2) as f32;
            (0..window)
                .map(|i| {
                    let d = i as f32 - half;
                    (-d * d / (2.0 * sigma * sigma)).exp()
                })
                .collect()
        }
    };
    let total: f32 = weights.iter().sum();
    weights.iter().map(|w| w / total).collect()
}
