//! Configuration management for reelcam
//!
//! Provides loading, saving, and validation of engine settings: capture
//! timing, encoder bitrates, output location and pipeline sizing.

use crate::errors::CameraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub capture: CaptureConfig,
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub output: OutputConfig,
    pub pipeline: PipelineConfig,
}

/// Device and preview settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Frames per second requested from the device
    pub frame_rate: u32,
    /// Upper bound applied to every device's maximum zoom factor
    pub max_zoom_cap: f64,
    /// How long start-recording waits for the encoder to record its first frame
    pub start_timeout_ms: u64,
}

/// Video track settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Keyframe spacing hint in seconds
    pub keyframe_interval_secs: u32,
}

/// Audio track settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Target bitrate in bits per second
    pub bitrate: u32,
}

/// Where recordings land
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory; empty means the system temp directory
    pub directory: String,
    /// File name prefix, followed by a timestamp and a short id
    pub file_prefix: String,
}

/// Encoder hand-off sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Video frames that may wait for the encoder before late ones are dropped
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                frame_rate: 30,
                max_zoom_cap: 10.0,
                start_timeout_ms: 3000,
            },
            video: VideoConfig {
                bitrate: 6_000_000,
                keyframe_interval_secs: 1,
            },
            audio: AudioConfig {
                sample_rate: 48_000,
                channels: 1,
                bitrate: 64_000,
            },
            output: OutputConfig {
                directory: String::new(),
                file_prefix: "VID_".to_string(),
            },
            pipeline: PipelineConfig { queue_capacity: 8 },
        }
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            CameraError::InvalidArgument(format!("Failed to read config file: {}", e))
        })?;

        let config: EngineConfig = toml::from_str(&contents).map_err(|e| {
            CameraError::InvalidArgument(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::InvalidArgument(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            CameraError::InvalidArgument(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string).map_err(|e| {
            CameraError::InvalidArgument(format!("Failed to write config file: {}", e))
        })?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("reelcam.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Resolved output directory
    pub fn output_directory(&self) -> PathBuf {
        if self.output.directory.is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(&self.output.directory)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), CameraError> {
        let invalid = |msg: &str| Err(CameraError::InvalidArgument(msg.to_string()));

        if self.capture.frame_rate == 0 || self.capture.frame_rate > 240 {
            return invalid("Frame rate must be between 1 and 240");
        }
        if !self.capture.max_zoom_cap.is_finite() || self.capture.max_zoom_cap < 1.0 {
            return invalid("Max zoom cap must be at least 1.0");
        }
        if self.capture.start_timeout_ms == 0 {
            return invalid("Start timeout must be positive");
        }
        if self.video.bitrate == 0 {
            return invalid("Video bitrate must be positive");
        }
        if self.audio.sample_rate == 0 || self.audio.bitrate == 0 {
            return invalid("Audio sample rate and bitrate must be positive");
        }
        if self.audio.channels != 1 && self.audio.channels != 2 {
            return invalid("Audio channels must be 1 or 2");
        }
        if self.pipeline.queue_capacity == 0 {
            return invalid("Pipeline queue capacity must be positive");
        }
        Ok(())
    }
}
