use serde::{Deserialize, Serialize};

use crate::color::{self, AdvancedRgbw, Rgb, Rgbw};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RgbwAlgorithm {
    #[default]
    Legacy,
    Advanced,
}

/// Global color pipeline applied to the full frame each tick.
///
/// Stage order: global saturation, white extraction (when the strip has
/// a white channel), global brightness, channel-correction gains on
/// RGB, then gamma on every channel. Gamma runs after all color mixing
/// and before quantization; the correction gains deliberately leave the
/// white channel alone.
#[derive(Debug, Clone)]
pub struct GlobalPipeline {
    pub saturation: f32,
    pub brightness: f32,
    pub correction: Rgb,
    pub gamma: f32,
    pub use_white_channel: bool,
    pub algorithm: RgbwAlgorithm,
    pub advanced: AdvancedRgbw,
}

impl GlobalPipeline {
    /// Pattern-produced RGB to final pre-quantization RGBW.
    pub fn process_rgb(&self, rgb: Rgb) -> Rgbw {
        let extracted = if self.use_white_channel {
            match self.algorithm {
                RgbwAlgorithm::Legacy => {
                    let rgb = rgb.clamped().with_saturation_brightness(self.saturation, 1.0);
                    color::rgbw_legacy(rgb, true)
                }
                // The advanced extraction folds saturation in itself.
                RgbwAlgorithm::Advanced => self.advanced.convert(rgb, self.saturation),
            }
        } else {
            Rgbw::from_rgb(
                rgb.clamped()
                    .with_saturation_brightness(self.saturation, 1.0),
            )
        };
        self.finish(extracted)
    }

    /// Externally supplied RGBW (DMX overlay): the white channel is
    /// already decided, so extraction is skipped.
    pub fn process_rgbw(&self, px: Rgbw) -> Rgbw {
        let rgb = Rgb::new(px.r, px.g, px.b)
            .clamped()
            .with_saturation_brightness(self.saturation, 1.0);
        self.finish(Rgbw::new(rgb.r, rgb.g, rgb.b, px.w.clamp(0.0, 1.0)))
    }

    /// Flat neutral white at full brightness through the correction
    /// gains, with gamma bypassed, so the operator can tune the gains
    /// against a known reference.
    pub fn calibration_pixel(&self) -> Rgbw {
        Rgbw::new(self.correction.r, self.correction.g, self.correction.b, 0.0)
    }

    fn finish(&self, px: Rgbw) -> Rgbw {
        Rgbw {
            r: color::gamma_correct(px.r * self.brightness * self.correction.r, self.gamma),
            g: color::gamma_correct(px.g * self.brightness * self.correction.g, self.gamma),
            b: color::gamma_correct(px.b * self.brightness * self.correction.b, self.gamma),
            w: color::gamma_correct(px.w * self.brightness, self.gamma),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> GlobalPipeline {
        GlobalPipeline {
            saturation: 1.0,
            brightness: 1.0,
            correction: Rgb::WHITE,
            gamma: 2.2,
            use_white_channel: false,
            algorithm: RgbwAlgorithm::Legacy,
            advanced: AdvancedRgbw::new(6500.0, 5000.0),
        }
    }

    #[test]
    fn neutral_pipeline_only_applies_gamma() {
        let out = pipeline().process_rgb(Rgb::new(0.5, 1.0, 0.0));
        assert!((out.r - 0.5f32.powf(2.2)).abs() < 1e-6);
        assert!((out.g - 1.0).abs() < 1e-6);
        assert!(out.b.abs() < 1e-6);
        assert_eq!(out.w, 0.0);
    }

    #[test]
    fn brightness_scales_before_gamma() {
        let mut p = pipeline();
        p.brightness = 0.5;
        let out = p.process_rgb(Rgb::WHITE);
        assert!((out.r - 0.5f32.powf(2.2)).abs() < 1e-6);
    }

    #[test]
    fn correction_gains_skip_white() {
        let mut p = pipeline();
        p.use_white_channel = true;
        p.correction = Rgb::new(0.5, 1.0, 1.0);
        let out = p.process_rgbw(Rgbw::new(1.0, 1.0, 1.0, 1.0));
        assert!(out.r < out.g);
        assert!((out.w - 1.0).abs() < 1e-6);
    }

    #[test]
    fn legacy_extraction_engages_with_white_channel() {
        let mut p = pipeline();
        p.use_white_channel = true;
        let out = p.process_rgb(Rgb::new(0.5, 0.5, 0.5));
        assert!(out.w > 0.0);
        assert!(out.r.abs() < 1e-6);
    }

    #[test]
    fn desaturation_collapses_to_gray() {
        let mut p = pipeline();
        p.saturation = 0.0;
        let out = p.process_rgb(Rgb::new(1.0, 0.0, 0.0));
        assert!((out.r - out.g).abs() < 1e-6);
        assert!((out.g - out.b).abs() < 1e-6);
    }

    #[test]
    fn calibration_pixel_carries_raw_gains() {
        let mut p = pipeline();
        p.correction = Rgb::new(1.0, 0.8, 0.6);
        let px = p.calibration_pixel();
        assert_eq!(px.r, 1.0);
        assert_eq!(px.g, 0.8);
        assert_eq!(px.b, 0.6);
        assert_eq!(px.w, 0.0);
    }

    #[test]
    fn output_stays_normalized() {
        let p = pipeline();
        let out = p.process_rgb(Rgb::new(7.0, -2.0, 0.5));
        for v in [out.r, out.g, out.b, out.w] {
            assert!((0.0..=1.0).contains(&v));
        }
    }
}
