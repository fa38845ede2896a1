// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every key is optional. A missing file gives the defaults; a malformed one
// is reported and the defaults are used instead.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::frame::pool::MIN_FRAMES_IN_FLIGHT;
use crate::frame::swapchain::PREFERRED_SURFACE_FORMAT;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub assets: AssetsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Number of frame slots; the CPU runs at most this many frames ahead
    pub max_frames_in_flight: usize,
    pub clear_color: [f32; 4],
    /// Prefer an sRGB swapchain format when the surface offers one
    pub prefer_srgb: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 2,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            prefer_srgb: true,
        }
    }
}

/// Compiled shader locations, relative to the working directory
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("shaders/quad.vert.spv"),
            fragment_shader: PathBuf::from("shaders/quad.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            show_fps: true,
        }
    }
}

/// How `Config::load` got its values.
///
/// Loading happens before the logger exists, so the result is reported
/// separately once logging is up.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(PathBuf),
    Missing(PathBuf),
    Invalid(PathBuf, anyhow::Error),
}

impl LoadOutcome {
    pub fn log(&self) {
        match self {
            LoadOutcome::Loaded(path) => log::info!("Loaded configuration from {:?}", path),
            LoadOutcome::Missing(path) => {
                log::info!("Config file not found at {:?}, using defaults", path)
            }
            LoadOutcome::Invalid(path, e) => {
                log::warn!("Failed to load {:?}: {:#}. Using defaults.", path, e)
            }
        }
    }
}

impl Config {
    /// Load config.toml, falling back to defaults if missing or invalid
    pub fn load() -> (Self, LoadOutcome) {
        Self::load_or_default("config.toml")
    }

    fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, LoadOutcome) {
        let path = path.as_ref().to_path_buf();
        match Self::load_from_path(&path) {
            Ok(Some(config)) => (config, LoadOutcome::Loaded(path)),
            Ok(None) => (Config::default(), LoadOutcome::Missing(path)),
            Err(e) => (Config::default(), LoadOutcome::Invalid(path, e)),
        }
    }

    /// Load configuration from a specific path; `None` if the file is absent
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(Some(config))
    }

    fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the renderer cannot start with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.graphics.max_frames_in_flight >= MIN_FRAMES_IN_FLIGHT,
            "graphics.max_frames_in_flight must be at least {}, got {}",
            MIN_FRAMES_IN_FLIGHT,
            self.graphics.max_frames_in_flight
        );
        anyhow::ensure!(
            self.window.width > 0 && self.window.height > 0,
            "window size must be non-zero, got {}x{}",
            self.window.width,
            self.window.height
        );
        Ok(())
    }

    /// Surface format to look for first, if any
    pub fn preferred_surface_format(&self) -> Option<vk::SurfaceFormatKHR> {
        self.graphics.prefer_srgb.then_some(PREFERRED_SURFACE_FORMAT)
    }

    /// Log level from `debug.log_level`; unknown names fall back to info
    pub fn log_level(&self) -> log::LevelFilter {
        match self.debug.log_level.parse() {
            Ok(level) => level,
            Err(_) => {
                // Logger isn't up yet when this runs
                eprintln!(
                    "Unknown log level '{}', defaulting to info",
                    self.debug.log_level
                );
                log::LevelFilter::Info
            }
        }
    }
}
