//! Configuration for interaction and export.
//!
//! Settings can be loaded from a JSON file, overridden from environment
//! variables, or built programmatically with the `with_*` methods.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Tunables of the interaction state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    /// Smallest width/height a box may have, in percent of the page
    pub min_size_percent: f32,
    /// Size given to a box whose creation drag collapsed below the minimum
    pub default_box_width_percent: f32,
    pub default_box_height_percent: f32,
    /// Freehand strokes with fewer samples are treated as taps
    pub min_freehand_points: usize,
    /// Touch hold duration that starts an area selection
    pub long_press_ms: u64,
    /// Touch movement tolerated before a long press is abandoned
    pub touch_slop_px: f32,
    /// On-screen size of resize handles, independent of zoom
    pub handle_size_px: f32,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            min_size_percent: 1.0,
            default_box_width_percent: 20.0,
            default_box_height_percent: 10.0,
            min_freehand_points: 3,
            long_press_ms: 500,
            touch_slop_px: 10.0,
            handle_size_px: crate::geometry::HANDLE_SIZE_PX,
        }
    }
}

impl InteractionConfig {
    pub fn with_min_size_percent(mut self, percent: f32) -> Self {
        self.min_size_percent = percent;
        self
    }

    pub fn with_default_box_size(mut self, width_percent: f32, height_percent: f32) -> Self {
        self.default_box_width_percent = width_percent;
        self.default_box_height_percent = height_percent;
        self
    }

    pub fn with_long_press_ms(mut self, ms: u64) -> Self {
        self.long_press_ms = ms;
        self
    }

    pub fn with_touch_slop_px(mut self, px: f32) -> Self {
        self.touch_slop_px = px;
        self
    }

    pub fn with_handle_size_px(mut self, px: f32) -> Self {
        self.handle_size_px = px;
        self
    }
}

/// Tunables of the baking pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Oversampling factor for rasterized text and math
    pub supersample: f32,
    /// Fill opacity for highlights whose own opacity is zero or fully opaque
    pub highlight_opacity: f32,
    /// Edge length of the comment marker, in points
    pub comment_marker_pt: f32,
    /// Font size of the comment excerpt, in points
    pub comment_font_pt: f32,
    /// Maximum characters of comment text drawn next to the marker
    pub comment_excerpt_chars: usize,
    /// Upper bound for either side of a rasterized bitmap
    pub max_raster_px: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            supersample: 2.0,
            highlight_opacity: doc_model::DEFAULT_HIGHLIGHT_OPACITY,
            comment_marker_pt: 14.0,
            comment_font_pt: 9.0,
            comment_excerpt_chars: 80,
            max_raster_px: 4096,
        }
    }
}

impl ExportConfig {
    pub fn with_supersample(mut self, factor: f32) -> Self {
        self.supersample = factor;
        self
    }

    pub fn with_highlight_opacity(mut self, opacity: f32) -> Self {
        self.highlight_opacity = opacity;
        self
    }

    pub fn with_comment_excerpt_chars(mut self, chars: usize) -> Self {
        self.comment_excerpt_chars = chars;
        self
    }

    pub fn with_max_raster_px(mut self, px: u32) -> Self {
        self.max_raster_px = px;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagemarkConfig {
    pub interaction: InteractionConfig,
    pub export: ExportConfig,
}

impl PagemarkConfig {
    pub fn with_interaction(mut self, interaction: InteractionConfig) -> Self {
        self.interaction = interaction;
        self
    }

    pub fn with_export(mut self, export: ExportConfig) -> Self {
        self.export = export;
        self
    }

    /// Defaults with environment overrides applied.
    ///
    /// Environment variables:
    /// - `PAGEMARK_SUPERSAMPLE`: rasterization factor (default: 2.0)
    /// - `PAGEMARK_HIGHLIGHT_OPACITY`: highlight fill opacity (default: 0.4)
    /// - `PAGEMARK_MIN_SIZE_PERCENT`: minimum box size (default: 1.0)
    /// - `PAGEMARK_LONG_PRESS_MS`: touch long press duration (default: 500)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Load a JSON file. Missing keys keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Apply `PAGEMARK_*` environment variables on top of this configuration.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_value::<f32>("PAGEMARK_SUPERSAMPLE")? {
            self.export.supersample = value;
        }
        if let Some(value) = env_value::<f32>("PAGEMARK_HIGHLIGHT_OPACITY")? {
            self.export.highlight_opacity = value;
        }
        if let Some(value) = env_value::<f32>("PAGEMARK_MIN_SIZE_PERCENT")? {
            self.interaction.min_size_percent = value;
        }
        if let Some(value) = env_value::<u64>("PAGEMARK_LONG_PRESS_MS")? {
            self.interaction.long_press_ms = value;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let check = |ok: bool, key: &str, value: String| {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue { key: key.to_owned(), value })
            }
        };

        let export = &self.export;
        check(
            (1.0..=8.0).contains(&export.supersample),
            "supersample",
            export.supersample.to_string(),
        )?;
        check(
            (0.0..=1.0).contains(&export.highlight_opacity),
            "highlight_opacity",
            export.highlight_opacity.to_string(),
        )?;
        check(export.max_raster_px >= 16, "max_raster_px", export.max_raster_px.to_string())?;

        let interaction = &self.interaction;
        check(
            interaction.min_size_percent > 0.0 && interaction.min_size_percent <= 50.0,
            "min_size_percent",
            interaction.min_size_percent.to_string(),
        )?;
        check(
            interaction.default_box_width_percent >= interaction.min_size_percent
                && interaction.default_box_height_percent >= interaction.min_size_percent,
            "default_box_size",
            format!(
                "{}x{}",
                interaction.default_box_width_percent, interaction.default_box_height_percent
            ),
        )?;
        check(
            interaction.min_freehand_points >= 2,
            "min_freehand_points",
            interaction.min_freehand_points.to_string(),
        )?;
        check(
            interaction.handle_size_px > 0.0,
            "handle_size_px",
            interaction.handle_size_px.to_string(),
        )
    }
}

fn env_value<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key: key.to_owned(), value: raw }),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
