use super::Hsv;

/// Ordered list of HSV color stops sampled by continuous position.
///
/// Sampling wraps: the segment after the last stop interpolates back
/// to the first, so a palette tiles seamlessly over [0, 1).
#[derive(Debug, Clone)]
pub struct Palette {
    pub name: String,
    pub stops: Vec<Hsv>,
    pub default: bool,
}

impl Palette {
    pub fn new(name: impl Into<String>, stops: Vec<Hsv>, default: bool) -> Self {
        Self {
            name: name.into(),
            stops,
            default,
        }
    }

    /// Sample the palette at position `p`, reduced modulo 1 into [0, 1).
    pub fn sample(&self, p: f32) -> Hsv {
        let n = self.stops.len();
        match n {
            0 => Hsv::default(),
            1 => self.stops[0],
            _ => {
                let p = p.rem_euclid(1.0);
                let scaled = p * n as f32;
                let s = (scaled as usize).min(n - 1);
                let f = scaled - s as f32;
                lerp_hsv(self.stops[s], self.stops[(s + 1) % n], f)
            }
        }
    }
}

/// Componentwise HSV interpolation; hue takes the shortest arc around
/// the wheel.
pub fn lerp_hsv(a: Hsv, b: Hsv, f: f32) -> Hsv {
    let mut dh = (b.h - a.h).rem_euclid(1.0);
    if dh > 0.5 {
        dh -= 1.0;
    }
    Hsv {
        h: (a.h + dh * f).rem_euclid(1.0),
        s: a.s + (b.s - a.s) * f,
        v: a.v + (b.v - a.v) * f,
    }
}

fn hsv(h: f32, s: f32, v: f32) -> Hsv {
    Hsv::new(h, s, v)
}

/// Built-in palettes, registered at startup. These are immutable.
pub fn default_palettes() -> Vec<(u32, Palette)> {
    vec![
        (
            0,
            Palette::new(
                "Spectrum",
                vec![hsv(0.0, 1.0, 1.0), hsv(1.0 / 3.0, 1.0, 1.0), hsv(2.0 / 3.0, 1.0, 1.0)],
                true,
            ),
        ),
        (
            1,
            Palette::new(
                "Fire",
                vec![
                    hsv(0.0, 1.0, 1.0),
                    hsv(0.05, 1.0, 1.0),
                    hsv(0.1, 0.9, 1.0),
                    hsv(0.16, 0.7, 1.0),
                ],
                true,
            ),
        ),
        (
            2,
            Palette::new(
                "Ocean",
                vec![hsv(0.55, 1.0, 0.8), hsv(0.62, 0.9, 1.0), hsv(0.5, 0.7, 1.0)],
                true,
            ),
        ),
        (
            3,
            Palette::new(
                "Forest",
                vec![hsv(0.3, 1.0, 0.7), hsv(0.38, 0.8, 1.0), hsv(0.22, 0.9, 0.9)],
                true,
            ),
        ),
        (
            4,
            Palette::new(
                "Sunset",
                vec![
                    hsv(0.95, 0.9, 1.0),
                    hsv(0.02, 1.0, 1.0),
                    hsv(0.08, 0.9, 1.0),
                    hsv(0.75, 0.8, 0.7),
                ],
                true,
            ),
        ),
        (
            5,
            Palette::new(
                "Warm White",
                vec![hsv(0.09, 0.35, 1.0), hsv(0.11, 0.2, 1.0)],
                true,
            ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stop() -> Palette {
        Palette::new(
            "test",
            vec![Hsv::new(0.0, 1.0, 1.0), Hsv::new(1.0 / 3.0, 1.0, 1.0)],
            false,
        )
    }

    #[test]
    fn sample_at_zero_is_stop_zero_exactly() {
        let p = two_stop();
        assert_eq!(p.sample(0.0), p.stops[0]);
    }

    #[test]
    fn sample_near_stop_stays_near_stop() {
        let p = two_stop();
        let eps = 1e-3;
        // Just past stop k the sample is within eps of stop k, scaled by
        // the stop distance.
        let near = p.sample(eps / 2.0);
        assert!((near.h - p.stops[0].h).abs() <= eps * (1.0 / 3.0) * 1.05);

        let near1 = p.sample(0.5 + eps / 2.0);
        assert!((near1.h - p.stops[1].h).abs() <= eps * (1.0 / 3.0) * 1.05);
    }

    #[test]
    fn sample_wraps_from_last_to_first() {
        let p = two_stop();
        // Position 0.75 sits halfway through the wrap segment.
        let mid = p.sample(0.75);
        assert!((mid.h - 1.0 / 6.0).abs() < 1e-6);

        // Position reduced modulo 1.
        assert_eq!(p.sample(1.0), p.sample(0.0));
        assert_eq!(p.sample(-0.25), p.sample(0.75));
    }

    #[test]
    fn hue_takes_shortest_arc() {
        // 0.9 -> 0.1 should pass through 0.0, not 0.5.
        let mid = lerp_hsv(Hsv::new(0.9, 1.0, 1.0), Hsv::new(0.1, 1.0, 1.0), 0.5);
        assert!((mid.h - 0.0).abs() < 1e-6 || (mid.h - 1.0).abs() < 1e-6);

        let q = lerp_hsv(Hsv::new(0.9, 1.0, 1.0), Hsv::new(0.1, 1.0, 1.0), 0.25);
        assert!((q.h - 0.95).abs() < 1e-6);
    }

    #[test]
    fn single_stop_is_constant() {
        let p = Palette::new("solid", vec![Hsv::new(0.4, 0.5, 0.6)], false);
        assert_eq!(p.sample(0.0), p.sample(0.73));
    }

    #[test]
    fn default_palettes_are_immutable_and_plural() {
        for (_, p) in default_palettes() {
            assert!(p.default);
            assert!(p.stops.len() >= 2);
        }
    }
}
