//! Configuration document and snapshot building.
//!
//! The document is consumed, never produced: an external UI/API owns
//! persistence. Loading is permissive (unknown keys ignored, legacy
//! aliases accepted) but building a render snapshot validates hard
//! invariants; a failed build leaves the previous snapshot active.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::artnet::DmxSettings;
use crate::color::{default_palettes, AdvancedRgbw, Hsv, Palette, Rgb};
use crate::error::{EngineError, Result};
use crate::mapping::PixelMapper;
use crate::pattern::PatternRegistry;
use crate::render::{
    GlobalPipeline, GroupSpec, RenderConfig, RgbwAlgorithm, SmoothingParams,
};
use crate::smoothing::{FrameMode, SpatialMode};
use crate::sink::PixelOrder;
use crate::sync::SyncMode;

fn default_true() -> bool {
    true
}
fn default_one() -> f32 {
    1.0
}
fn default_gain() -> f32 {
    255.0
}
fn default_color_temp() -> f32 {
    6500.0
}
fn default_white_temp() -> f32 {
    5000.0
}
fn default_gamma() -> f32 {
    2.2
}
fn default_speed() -> f32 {
    0.2
}
fn default_function() -> u32 {
    1
}
fn default_group_size() -> usize {
    1
}
fn default_interp_size() -> usize {
    2
}
fn default_spatial_size() -> usize {
    1
}
fn default_sync_interval() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Local,
    Serial,
    Udp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub range_start: usize,
    pub range_end: usize,
    #[serde(default = "default_one")]
    pub brightness: f32,
    #[serde(default = "default_one")]
    pub saturation: f32,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_one")]
    pub scale: f32,
    #[serde(default = "default_function")]
    pub function: u32,
    #[serde(default)]
    pub palette: u32,
    #[serde(default)]
    pub render_mode: RenderMode,
    #[serde(default)]
    pub render_target: String,
}

impl GroupConfig {
    /// Key identifying the sink this group drives.
    pub fn sink_binding(&self) -> String {
        match self.render_mode {
            RenderMode::Local => "local".to_string(),
            RenderMode::Serial => format!("serial:{}", self.render_target),
            RenderMode::Udp => format!("udp:{}", self.render_target),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaletteConfig {
    pub name: String,
    /// HSV stops as [h, s, v] triples.
    pub colors: Vec<[f32; 3]>,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub default: bool,
}

/// The configuration document, flat keys per the external contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(default = "default_true")]
    pub on: bool,
    #[serde(default = "default_one")]
    pub global_brightness: f32,
    #[serde(default = "default_one")]
    pub global_saturation: f32,
    #[serde(default = "default_color_temp")]
    pub global_color_temp: f32,
    /// Channel correction gains, 0..255.
    #[serde(default = "default_gain")]
    pub global_color_r: f32,
    #[serde(default = "default_gain")]
    pub global_color_g: f32,
    #[serde(default = "default_gain")]
    pub global_color_b: f32,
    #[serde(default)]
    pub use_white_channel: bool,
    #[serde(default)]
    pub rgbw_algorithm: RgbwAlgorithm,
    #[serde(default = "default_white_temp")]
    pub white_led_temperature: f32,
    #[serde(default = "default_gamma")]
    pub gamma: f32,
    #[serde(default)]
    pub calibration: u8,

    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,
    #[serde(default)]
    pub palettes: BTreeMap<String, PaletteConfig>,
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionConfig>,

    #[serde(default)]
    pub enable_artnet: bool,
    #[serde(default)]
    pub artnet_universe: u16,
    #[serde(default)]
    pub artnet_channel_offset: usize,
    #[serde(default = "default_group_size")]
    pub artnet_group_size: usize,
    #[serde(default)]
    pub artnet_frame_interpolation: FrameMode,
    #[serde(default = "default_interp_size")]
    pub artnet_frame_interp_size: usize,
    #[serde(default)]
    pub artnet_spatial_smoothing: SpatialMode,
    #[serde(default = "default_spatial_size")]
    pub artnet_spatial_size: usize,
    // Aliases from adjacent document versions; folded in normalized().
    #[serde(default, skip_serializing)]
    artnet_smoothing: Option<FrameMode>,
    #[serde(default, skip_serializing)]
    artnet_filter_size: Option<usize>,

    #[serde(default)]
    pub enable_sync: bool,
    #[serde(default)]
    pub sync_master_mode: bool,
    #[serde(default = "default_sync_interval")]
    pub sync_interval: f64,
}

impl Default for Document {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty document deserializes")
    }
}

impl Document {
    /// Load a document, tolerating a missing file (an unconfigured node
    /// runs on defaults) but not a malformed one.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("no configuration at {}; using defaults", path.display());
                return Ok(Self::default().normalized());
            }
            Err(e) => return Err(e.into()),
        };
        let document: Document = serde_json::from_str(&text)
            .map_err(|e| EngineError::config(format!("{}: {e}", path.display())))?;
        Ok(document.normalized())
    }

    /// Fold legacy aliases, clamp soft parameters and force calibration
    /// off: a reboot never lands in calibration mode.
    pub fn normalized(mut self) -> Self {
        if let Some(mode) = self.artnet_smoothing.take() {
            self.artnet_frame_interpolation = mode;
        }
        if let Some(size) = self.artnet_filter_size.take() {
            self.artnet_frame_interp_size = size;
        }
        self.calibration = 0;
        self.global_brightness = self.global_brightness.clamp(0.0, 1.0);
        self.global_saturation = self.global_saturation.clamp(0.0, 1.0);
        self.artnet_group_size = self.artnet_group_size.max(1);
        self.artnet_frame_interp_size = self.artnet_frame_interp_size.max(1);
        self.artnet_spatial_size = self.artnet_spatial_size.max(1);
        self.sync_interval = self.sync_interval.clamp(0.1, 5.0);
        self
    }

    pub fn sync_mode(&self) -> SyncMode {
        if !self.enable_sync {
            SyncMode::Off
        } else if self.sync_master_mode {
            SyncMode::Master
        } else {
            SyncMode::Slave
        }
    }

    pub fn artnet_settings(&self, led_count: usize) -> DmxSettings {
        DmxSettings {
            universe: self.artnet_universe,
            channel_offset: self.artnet_channel_offset,
            group_size: self.artnet_group_size,
            led_count,
        }
    }

    /// Build the palette table: immutable defaults overlaid with the
    /// document's entries.
    pub fn build_palettes(&self) -> Result<BTreeMap<u32, Arc<Palette>>> {
        let mut palettes: BTreeMap<u32, Arc<Palette>> = default_palettes()
            .into_iter()
            .map(|(id, p)| (id, Arc::new(p)))
            .collect();
        for (key, config) in &self.palettes {
            let id: u32 = key
                .parse()
                .map_err(|_| EngineError::config(format!("palette key '{key}' is not an id")))?;
            if config.default {
                continue;
            }
            // Built-in slots are immutable regardless of what the entry
            // claims about itself.
            if palettes.get(&id).is_some_and(|p| p.default) {
                return Err(EngineError::config(format!(
                    "palette '{}' would replace built-in palette {id}",
                    config.name
                )));
            }
            if config.colors.len() < 2 {
                return Err(EngineError::config(format!(
                    "palette '{}' needs at least 2 stops",
                    config.name
                )));
            }
            let stops = config
                .colors
                .iter()
                .map(|&[h, s, v]| Hsv::new(h, s.clamp(0.0, 1.0), v.clamp(0.0, 1.0)))
                .collect();
            palettes.insert(id, Arc::new(Palette::new(config.name.clone(), stops, false)));
        }
        Ok(palettes)
    }

    /// Build the pattern registry: built-ins plus the document's
    /// functions. A function that fails to compile still occupies its
    /// id — groups referencing it render black and carry the error
    /// flag; the apply as a whole does not fail.
    pub fn build_patterns(&self) -> Result<PatternRegistry> {
        let mut registry = PatternRegistry::with_defaults();
        for (key, config) in &self.functions {
            let id: u32 = key
                .parse()
                .map_err(|_| EngineError::config(format!("function key '{key}' is not an id")))?;
            if config.default {
                continue;
            }
            // Built-in slots are immutable regardless of what the entry
            // claims about itself.
            if registry.get(id).is_some_and(|p| p.default) {
                return Err(EngineError::config(format!(
                    "function '{}' would replace built-in pattern {id}",
                    config.name
                )));
            }
            if let Err(errors) = registry.set_source(id, &config.name, &config.source) {
                warn!(
                    "function '{}' failed to compile: {}",
                    config.name,
                    errors
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ")
                );
            }
        }
        Ok(registry)
    }

    /// Sink bindings referenced by the configured groups.
    pub fn sink_bindings(&self, led_count: usize) -> BTreeSet<(RenderMode, String)> {
        self.effective_groups(led_count)
            .values()
            .map(|g| (g.render_mode, g.render_target.clone()))
            .collect()
    }

    /// Groups as configured, or the implicit full-strip group when the
    /// document has none.
    fn effective_groups(&self, led_count: usize) -> BTreeMap<String, GroupConfig> {
        if !self.groups.is_empty() {
            return self.groups.clone();
        }
        let mut groups = BTreeMap::new();
        groups.insert(
            "main".to_string(),
            GroupConfig {
                range_start: 0,
                range_end: led_count,
                brightness: 1.0,
                saturation: 1.0,
                speed: default_speed(),
                scale: 1.0,
                function: default_function(),
                palette: 0,
                render_mode: RenderMode::Local,
                render_target: String::new(),
            },
        );
        groups
    }

    /// Validate everything and assemble an immutable render snapshot.
    pub fn build_render_config(
        &self,
        mapper: Arc<PixelMapper>,
        order: PixelOrder,
        target_fps: f64,
        brightness_limit: f32,
    ) -> Result<RenderConfig> {
        let led_count = mapper.len();
        if led_count == 0 {
            return Err(EngineError::config("led_count must be positive"));
        }
        if !(target_fps.is_finite() && target_fps > 0.0) {
            return Err(EngineError::config("target_fps must be positive"));
        }

        let palettes = self.build_palettes()?;
        let registry = self.build_patterns()?;

        let mut groups = Vec::new();
        for (name, config) in self.effective_groups(led_count) {
            if config.range_start >= config.range_end {
                return Err(EngineError::config(format!(
                    "group '{name}': range_start must be below range_end"
                )));
            }
            if config.range_end > led_count {
                return Err(EngineError::config(format!(
                    "group '{name}': range_end {} exceeds led_count {led_count}",
                    config.range_end
                )));
            }
            let pattern = registry
                .get(config.function)
                .ok_or_else(|| {
                    EngineError::config(format!(
                        "group '{name}': unknown pattern id {}",
                        config.function
                    ))
                })?
                .clone();
            let palette = palettes
                .get(&config.palette)
                .ok_or_else(|| {
                    EngineError::config(format!(
                        "group '{name}': unknown palette id {}",
                        config.palette
                    ))
                })?
                .clone();
            groups.push(GroupSpec {
                name,
                range: config.range_start..config.range_end,
                brightness: config.brightness.clamp(0.0, 1.0),
                saturation: config.saturation.clamp(0.0, 1.0),
                speed: config.speed,
                scale: config.scale,
                pattern,
                palette,
                sink: config.sink_binding(),
            });
        }

        groups.sort_by_key(|g| g.range.start);
        for pair in groups.windows(2) {
            if pair[0].range.end > pair[1].range.start {
                return Err(EngineError::config(format!(
                    "groups '{}' and '{}' overlap",
                    pair[0].name, pair[1].name
                )));
            }
        }

        if self.enable_artnet {
            let settings = self.artnet_settings(led_count);
            // LEDs one universe can physically carry at this offset and
            // grouping; anything beyond it would stay dark.
            let max_dmx_pixels = 512usize.saturating_sub(self.artnet_channel_offset) / 4;
            let capacity = max_dmx_pixels * settings.group_size.max(1);
            if led_count > capacity {
                warn!(
                    led_count,
                    capacity,
                    universe = self.artnet_universe,
                    offset = self.artnet_channel_offset,
                    "LED count exceeds DMX universe capacity"
                );
            }
            let needed = self.artnet_channel_offset + 4 * settings.dmx_pixels();
            if needed > 512 {
                return Err(EngineError::config(format!(
                    "ArtNet needs {needed} channels; a universe has 512"
                )));
            }
        }

        let gains = Rgb::new(
            (self.global_color_r / 255.0).clamp(0.0, 1.0),
            (self.global_color_g / 255.0).clamp(0.0, 1.0),
            (self.global_color_b / 255.0).clamp(0.0, 1.0),
        );

        Ok(RenderConfig {
            led_count,
            target_fps,
            on: self.on,
            calibration: self.calibration != 0,
            pipeline: GlobalPipeline {
                saturation: self.global_saturation.clamp(0.0, 1.0),
                brightness: self
                    .global_brightness
                    .clamp(0.0, 1.0)
                    .min(brightness_limit.clamp(0.0, 1.0)),
                correction: gains,
                gamma: self.gamma,
                use_white_channel: self.use_white_channel,
                algorithm: self.rgbw_algorithm,
                advanced: AdvancedRgbw::new(self.global_color_temp, self.white_led_temperature),
            },
            groups,
            mapper,
            artnet_enabled: self.enable_artnet,
            smoothing: SmoothingParams {
                frame_mode: self.artnet_frame_interpolation,
                frame_window: self.artnet_frame_interp_size,
                spatial_mode: self.artnet_spatial_smoothing,
                spatial_window: self.artnet_spatial_size,
            },
            order,
        })
    }
}
