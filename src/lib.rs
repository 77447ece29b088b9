//! Real-time animation engine for addressable LED strips.
//!
//! The engine evaluates pattern expressions against time and per-pixel
//! coordinates at a fixed frame rate, runs the result through a color
//! pipeline (palette lookup, saturation, color temperature, gamma,
//! RGBW extraction, calibration), optionally overlays ArtNet/sACN DMX
//! data with temporal and spatial smoothing, and pushes byte-encoded
//! frames to local, serial or UDP sinks. An optional UDP time base
//! keeps animation clocks loosely aligned across cooperating nodes.

pub mod artnet;
pub mod color;
pub mod config;
pub mod error;
pub mod mapping;
pub mod pattern;
pub mod render;
pub mod sink;
pub mod smoothing;
pub mod stats;
pub mod sync;

pub use error::{EngineError, Result};
