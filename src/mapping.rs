use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

/// Maps each physical LED index to its normalized coordinate in [0, 1].
///
/// The mapping is fixed for the lifetime of a configured strip; patterns
/// receive coordinates, never indices.
#[derive(Debug, Clone)]
pub enum PixelMapper {
    /// Evenly spaced 1-D strip: x = i / (led_count - 1).
    Line { led_count: usize },
    /// Explicit per-LED coordinates loaded from a mapping file.
    Table { coords: Vec<f32> },
}

impl PixelMapper {
    pub fn line(led_count: usize) -> Self {
        Self::Line { led_count }
    }

    /// Load a mapping from a JSON array. Entries may be bare numbers or
    /// coordinate arrays, in which case the first component is used.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading pixel mapping {}", path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing pixel mapping {}", path.display()))?;
        let entries = value
            .as_array()
            .context("pixel mapping must be a JSON array")?;
        let mut coords = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let coord = match entry {
                Value::Number(n) => n.as_f64(),
                Value::Array(parts) => parts.first().and_then(Value::as_f64),
                _ => None,
            };
            let coord =
                coord.with_context(|| format!("pixel mapping entry {i} is not a coordinate"))?;
            coords.push(coord as f32);
        }
        anyhow::ensure!(!coords.is_empty(), "pixel mapping is empty");
        Ok(Self::Table { coords })
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Line { led_count } => *led_count,
            Self::Table { coords } => coords.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn coord(&self, index: usize) -> f32 {
        match self {
            Self::Line { led_count } => {
                if *led_count <= 1 {
                    0.0
                } else {
                    index as f32 / (*led_count - 1) as f32
                }
            }
            Self::Table { coords } => coords.get(index).copied().unwrap_or(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_spans_unit_interval() {
        let m = PixelMapper::line(5);
        assert_eq!(m.coord(0), 0.0);
        assert_eq!(m.coord(4), 1.0);
        assert!((m.coord(2) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn single_led_maps_to_origin() {
        let m = PixelMapper::line(1);
        assert_eq!(m.coord(0), 0.0);
    }

    #[test]
    fn mapping_is_invariant() {
        let m = PixelMapper::line(10);
        let first: Vec<f32> = (0..10).map(|i| m.coord(i)).collect();
        let second: Vec<f32> = (0..10).map(|i| m.coord(i)).collect();
        assert_eq!(first, second);
    }
}
