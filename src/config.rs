//! Configuration management for rigstream
//!
//! Provides loading, saving and validation of stream geometry, stabilisation
//! parameters, sharpness scoring and depth-map scan settings.

use crate::errors::RigError;
use crate::sharpness::SharpnessMetric;
use crate::stabilise::EngineKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    pub stream: StreamConfig,
    pub stabilisation: StabilisationConfig,
    pub sharpness: SharpnessConfig,
    pub depth_map: DepthMapConfig,
}

/// Frame geometry and worker lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Frame width fixed for the session
    pub frame_width: u32,
    /// Frame height fixed for the session
    pub frame_height: u32,
    /// Queue capacity; 0 means unbounded
    pub queue_capacity: usize,
    /// How long stop waits for each worker to exit (ms)
    pub join_timeout_ms: u64,
}

/// Stabilisation engine parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilisationConfig {
    /// Stabilise when streaming starts
    pub enabled: bool,
    /// Engine used at start-up
    pub engine: EngineKind,
    /// Phase correlation downsampling block (pixels)
    pub phase_block_size: u32,
    /// Phase correlation blend factor; 1.0 replaces the running offset
    pub phase_blend_factor: f64,
    /// Correlation search radius (pixels)
    pub correlation_search_radius: u32,
    /// Weight of the newest frame when updating the correlation template
    pub correlation_template_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharpnessConfig {
    pub metric: SharpnessMetric,
}

/// Depth-map raster scan parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthMapConfig {
    /// Grid columns
    pub grid_width: u32,
    /// Grid rows
    pub grid_height: u32,
    /// First focus position of each cell's sweep
    pub focus_start: f64,
    /// Last focus position of each cell's sweep
    pub focus_end: f64,
    /// Focus positions sampled per cell
    pub focus_steps: u32,
    /// Largest accepted |achieved - commanded| before a move counts as unsettled
    pub settle_tolerance: f64,
    /// How long to wait for a settled frame before treating the source as lost (ms)
    pub frame_timeout_ms: u64,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig {
                frame_width: 640,
                frame_height: 480,
                queue_capacity: 8,
                join_timeout_ms: 2000,
            },
            stabilisation: StabilisationConfig {
                enabled: false,
                engine: EngineKind::PhaseCorrelation,
                phase_block_size: 8,
                phase_blend_factor: 1.0,
                correlation_search_radius: 16,
                correlation_template_weight: 1.0,
            },
            sharpness: SharpnessConfig {
                metric: SharpnessMetric::VarianceOfLaplacian,
            },
            depth_map: DepthMapConfig {
                grid_width: 8,
                grid_height: 6,
                focus_start: 0.0,
                focus_end: 1.0,
                focus_steps: 5,
                settle_tolerance: 0.05,
                frame_timeout_ms: 2000,
            },
        }
    }
}

impl RigConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, RigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| RigError::Config(format!("Failed to read config file: {}", e)))?;

        let config: RigConfig = toml::from_str(&contents)
            .map_err(|e| RigError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), RigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| RigError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("rigstream.toml")
    }

    /// Load from default location, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), RigError> {
        let invalid = |msg: &str| Err(RigError::InvalidConfig(msg.to_string()));

        if self.stream.frame_width == 0 || self.stream.frame_height == 0 {
            return invalid("Frame dimensions must be non-zero");
        }

        let s = &self.stabilisation;
        // Phase correlation needs at least a 2x2 grid of blocks
        if s.phase_block_size == 0
            || s.phase_block_size as u64 * 2
                > self.stream.frame_width.min(self.stream.frame_height) as u64
        {
            return invalid("Phase block size must be between 1 and half the smaller frame dimension");
        }
        if !(s.phase_blend_factor > 0.0 && s.phase_blend_factor <= 1.0) {
            return invalid("Phase blend factor must be in (0.0, 1.0]");
        }
        if s.correlation_search_radius == 0 {
            return invalid("Correlation search radius must be at least 1");
        }
        if !(s.correlation_template_weight > 0.0 && s.correlation_template_weight <= 1.0) {
            return invalid("Correlation template weight must be in (0.0, 1.0]");
        }

        let d = &self.depth_map;
        if d.grid_width == 0 || d.grid_height == 0 {
            return invalid("Depth map grid must be at least 1x1");
        }
        if d.grid_width > self.stream.frame_width || d.grid_height > self.stream.frame_height {
            return invalid("Depth map grid cannot be finer than one pixel per cell");
        }
        if d.focus_steps == 0 {
            return invalid("Focus steps must be at least 1");
        }
        if !d.focus_start.is_finite() || !d.focus_end.is_finite() {
            return invalid("Focus range must be finite");
        }
        if !(d.settle_tolerance >= 0.0) {
            return invalid("Settle tolerance must be non-negative");
        }
        if d.frame_timeout_ms == 0 {
            return invalid("Settled frame timeout must be non-zero");
        }

        Ok(())
    }
}
