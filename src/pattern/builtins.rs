//! Built-in pattern library, registered at startup.
//!
//! Every default is expressed in the same expression language user
//! patterns use, so the compiler is exercised on every boot.

use super::Pattern;

const DEFAULTS: &[(u32, &str, &str)] = &[
    (0, "Static Palette", "palette(x)"),
    (1, "Palette Cycle", "palette(t + x)"),
    (2, "Palette Cycle Quantized", "palette(floor((t + x) * 8) / 8)"),
    (3, "Hue Cycle", "hsv(t + x, 1, 1)"),
    (4, "Palette Waves", "palette(x + sine(t) * 0.2)"),
    (5, "Value Pulse", "hsv(t * 0.2, 1, pulse(t + x, 0.3))"),
    (6, "Breathe", "hsv(t * 0.1, 1, cubic(t * 0.5))"),
    (
        7,
        "Plasma",
        "palette(plasma(x * 4, 0, t, 1, 0.5, 0.5, 1) / 8 + 0.5)",
    ),
    (
        8,
        "Plasma Octaves",
        "palette(frac(plasma_octave(x * 2, 0, t, 3, 2, 0.5)))",
    ),
    (9, "Perlin Ripples", "palette(noise(x * 4, 0, t))"),
    (10, "Fractal Noise", "palette(fbm(x * 4, 0, t, 4, 2, 0.5))"),
];

pub fn default_patterns() -> Vec<(u32, Pattern)> {
    DEFAULTS
        .iter()
        .map(|(id, name, source)| {
            let pattern = Pattern::from_source(*name, *source, true)
                .unwrap_or_else(|e| panic!("built-in pattern '{name}' failed to compile: {e:?}"));
            (*id, pattern)
        })
        .collect()
}
