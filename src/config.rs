//! Configuration management for GridWarp

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::session::DEFAULT_OVERLAY_COLOR;

/// Where the calibration lives and the grid size used when none is saved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Calibration JSON file, relative to the working directory
    pub file: PathBuf,
    pub rows: u32,
    pub cols: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("calibration.json"),
            rows: 2,
            cols: 2,
        }
    }
}

/// Output surface and shading settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    /// RGBA multiplier applied to every sampled texel
    pub tint: [f32; 4],
    /// Scales the tint's alpha
    pub opacity: f32,
    /// RGBA color of the calibration overlay lines
    pub overlay_color: [f32; 4],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            tint: [1.0, 1.0, 1.0, 1.0],
            opacity: 1.0,
            overlay_color: DEFAULT_OVERLAY_COLOR,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default)]
    pub render: RenderConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        Ok(())
    }
}
