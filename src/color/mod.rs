pub mod palette;
pub mod waveform;

pub use palette::{default_palettes, lerp_hsv, Palette};

use serde::{Deserialize, Serialize};

use ::palette::{FromColor, Hsv as PaletteHsv, Srgb};

/// RGB color with normalized channels in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

/// RGBW color with normalized channels in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rgbw {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub w: f32,
}

/// HSV color. Hue is normalized to [0, 1) and wraps.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Hsv {
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0.0, g: 0.0, b: 0.0 };
    pub const WHITE: Rgb = Rgb { r: 1.0, g: 1.0, b: 1.0 };

    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn max_channel(self) -> f32 {
        self.r.max(self.g).max(self.b)
    }

    pub fn min_channel(self) -> f32 {
        self.r.min(self.g).min(self.b)
    }

    pub fn clamped(self) -> Self {
        Self {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
        }
    }

    pub fn scaled(self, k: f32) -> Self {
        Self {
            r: self.r * k,
            g: self.g * k,
            b: self.b * k,
        }
    }

    pub fn to_hsv(self) -> Hsv {
        let c = self.clamped();
        let hsv = PaletteHsv::from_color(Srgb::new(c.r, c.g, c.b));
        Hsv {
            h: hsv.hue.into_positive_degrees() / 360.0,
            s: hsv.saturation,
            v: hsv.value,
        }
    }

    /// Desaturate toward the channel average, then scale by brightness.
    pub fn with_saturation_brightness(self, saturation: f32, brightness: f32) -> Rgb {
        let avg = (self.r + self.g + self.b) / 3.0;
        Rgb {
            r: (avg + (self.r - avg) * saturation) * brightness,
            g: (avg + (self.g - avg) * saturation) * brightness,
            b: (avg + (self.b - avg) * saturation) * brightness,
        }
    }
}

impl Rgbw {
    pub const BLACK: Rgbw = Rgbw { r: 0.0, g: 0.0, b: 0.0, w: 0.0 };

    pub fn new(r: f32, g: f32, b: f32, w: f32) -> Self {
        Self { r, g, b, w }
    }

    pub fn from_rgb(rgb: Rgb) -> Self {
        Self { r: rgb.r, g: rgb.g, b: rgb.b, w: 0.0 }
    }

    pub fn clamped(self) -> Self {
        Self {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
            w: self.w.clamp(0.0, 1.0),
        }
    }
}

impl Hsv {
    pub fn new(h: f32, s: f32, v: f32) -> Self {
        Self { h, s, v }
    }

    pub fn to_rgb(self) -> Rgb {
        let h = self.h.rem_euclid(1.0) * 360.0;
        let hsv = PaletteHsv::new_srgb(h, self.s.clamp(0.0, 1.0), self.v.clamp(0.0, 1.0));
        let rgb = Srgb::from_color(hsv);
        Rgb {
            r: rgb.red,
            g: rgb.green,
            b: rgb.blue,
        }
    }
}

/// Color temperature in Kelvin to normalized RGB, peak channel scaled to 1.0.
///
/// Uses the Tanner-Helland piecewise log/power curves. A zero or negative
/// input is undefined and yields neutral white.
pub fn blackbody_to_rgb(kelvin: f32) -> Rgb {
    if kelvin <= 0.0 {
        return Rgb::WHITE;
    }
    let t = kelvin / 100.0;

    let r = if t <= 66.0 {
        255.0
    } else {
        (329.698_73 * (t - 60.0).powf(-0.133_204_76)).clamp(0.0, 255.0)
    };

    let g = if t <= 66.0 {
        (99.470_8 * t.ln() - 161.119_57).clamp(0.0, 255.0)
    } else {
        (288.122_2 * (t - 60.0).powf(-0.075_514_85)).clamp(0.0, 255.0)
    };

    let b = if t >= 66.0 {
        255.0
    } else if t <= 19.0 {
        0.0
    } else {
        (138.517_73 * (t - 10.0).ln() - 305.044_8).clamp(0.0, 255.0)
    };

    let max = r.max(g).max(b);
    if max > 0.0 {
        Rgb {
            r: r / max,
            g: g / max,
            b: b / max,
        }
    } else {
        Rgb::WHITE
    }
}

/// Desaturation-based white extraction: the white channel takes the
/// common (gray) component of the RGB triple.
pub fn rgbw_legacy(rgb: Rgb, use_white: bool) -> Rgbw {
    let rgb = rgb.clamped();
    let w = if use_white { rgb.min_channel() } else { 0.0 };
    Rgbw {
        r: (rgb.r - w).clamp(0.0, 1.0),
        g: (rgb.g - w).clamp(0.0, 1.0),
        b: (rgb.b - w).clamp(0.0, 1.0),
        w,
    }
}

/// Temperature-aware white extraction, precomputed for a target color
/// temperature and the spectrum of the hardware white LED.
///
/// The input is split into a chroma component and a neutral component;
/// the neutral part is mapped to the target temperature and as much of
/// the result as possible is shifted onto the white channel, accounting
/// for the white LED not being pure white.
#[derive(Debug, Clone, Copy)]
pub struct AdvancedRgbw {
    target: Rgb,
    white: Rgb,
}

impl AdvancedRgbw {
    pub fn new(target_temp: f32, white_led_temp: f32) -> Self {
        Self {
            target: blackbody_to_rgb(target_temp),
            white: blackbody_to_rgb(white_led_temp),
        }
    }

    pub fn convert(&self, rgb: Rgb, sat_factor: f32) -> Rgbw {
        let rgb = rgb.clamped();
        let max = rgb.max_channel();
        if max <= 0.0 {
            return Rgbw::BLACK;
        }

        let min = rgb.min_channel();
        let chroma = max - min;

        // Chroma component keeps the hue; neutral strength grows as
        // saturation drops.
        let color_r = (rgb.r - min) * sat_factor;
        let color_g = (rgb.g - min) * sat_factor;
        let color_b = (rgb.b - min) * sat_factor;
        let neutral = min + (1.0 - sat_factor) * chroma;

        let desired_r = color_r + self.target.r * neutral;
        let desired_g = color_g + self.target.g * neutral;
        let desired_b = color_b + self.target.b * neutral;

        // Largest white amount that stays within the desired light when
        // scaled by the white LED spectrum.
        let mut w = neutral;
        if self.white.r > 0.0 {
            w = w.min(desired_r / self.white.r);
        }
        if self.white.g > 0.0 {
            w = w.min(desired_g / self.white.g);
        }
        if self.white.b > 0.0 {
            w = w.min(desired_b / self.white.b);
        }
        let w = w.clamp(0.0, neutral);

        Rgbw {
            r: (desired_r - w * self.white.r).max(0.0),
            g: (desired_g - w * self.white.g).max(0.0),
            b: (desired_b - w * self.white.b).max(0.0),
            w,
        }
    }

    pub fn white_spectrum(&self) -> Rgb {
        self.white
    }
}

/// Per-channel power-law gamma correction. Applied after all color
/// mixing and before quantization.
pub fn gamma_correct(value: f32, gamma: f32) -> f32 {
    value.clamp(0.0, 1.0).powf(gamma)
}

/// Quantize a normalized channel to 8 bits.
pub fn to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}
