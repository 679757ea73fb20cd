//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory where saved session metadata is stored.
    pub sessions_dir: PathBuf,

    /// Recording and encoder settings.
    pub recording: RecordingDefaults,

    /// Compositor render loop settings.
    pub compositor: CompositorDefaults,

    /// Audio mixer settings.
    pub audio: AudioDefaults,

    /// How long a transient warning stays visible to the caller.
    pub transient_message_secs: f64,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Encoding quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    #[default]
    High,
}

impl Quality {
    /// Target video bitrate for a given pixel count and frame rate.
    pub fn video_bitrate_bps(&self, width: u32, height: u32, fps: u32) -> u64 {
        let bits_per_pixel = match self {
            Quality::Low => 0.05,
            Quality::Medium => 0.08,
            Quality::High => 0.12,
        };
        (width as f64 * height as f64 * fps as f64 * bits_per_pixel) as u64
    }
}

/// Output resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD_720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes needed for one RGBA frame at this resolution.
    pub fn rgba_frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Output resolution.
    pub resolution: Resolution,

    /// Output frame rate.
    pub fps: u32,

    /// Encoding quality preset.
    pub quality: Quality,

    /// Interval between chunk flushes from the encoder.
    pub chunk_interval_ms: u64,

    /// Interval between telemetry log lines.
    pub stats_interval_ms: u64,

    /// Shortest recording that may be finalized.
    pub min_duration_secs: f64,

    /// Smallest artifact that may be finalized.
    pub min_artifact_bytes: u64,

    /// Audio sample rate of the mixed track.
    pub audio_sample_rate: u32,
}

/// Compositor render loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorDefaults {
    /// Duration of smooth layout transitions.
    pub transition_ms: u64,

    /// Upper bound on how long a newly added source is gated.
    pub source_ready_timeout_ms: u64,

    /// Poll interval while waiting for a source's first frame.
    pub source_ready_poll_ms: u64,

    /// Background colour as RGBA.
    pub background: [u8; 4],
}

/// Audio mixer parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDefaults {
    /// Interval between level monitoring callbacks.
    pub level_interval_ms: u64,

    /// Fade-out applied to a channel after its source is removed.
    pub fade_out_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "lectern=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            recording: RecordingDefaults::default(),
            compositor: CompositorDefaults::default(),
            audio: AudioDefaults::default(),
            transient_message_secs: 5.0,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            resolution: Resolution::HD_720,
            fps: 30,
            quality: Quality::High,
            chunk_interval_ms: 1000,
            stats_interval_ms: 3000,
            min_duration_secs: 0.5,
            min_artifact_bytes: 1024,
            audio_sample_rate: 48000,
        }
    }
}

impl Default for CompositorDefaults {
    fn default() -> Self {
        Self {
            transition_ms: 400,
            source_ready_timeout_ms: 1500,
            source_ready_poll_ms: 16,
            background: [16, 16, 20, 255],
        }
    }
}

impl Default for AudioDefaults {
    fn default() -> Self {
        Self {
            level_interval_ms: 100,
            fade_out_ms: 150,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl RecordingDefaults {
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms.max(1))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(1))
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

impl CompositorDefaults {
    pub fn transition(&self) -> Duration {
        Duration::from_millis(self.transition_ms)
    }

    pub fn source_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.source_ready_timeout_ms)
    }

    pub fn source_ready_poll(&self) -> Duration {
        Duration::from_millis(self.source_ready_poll_ms.max(1))
    }
}

impl AudioDefaults {
    pub fn level_interval(&self) -> Duration {
        Duration::from_millis(self.level_interval_ms.max(1))
    }

    pub fn fade_out(&self) -> Duration {
        Duration::from_millis(self.fade_out_ms)
    }
}

impl EngineConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, crate::error::LecternError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), crate::error::LecternError> {
        let rec = &self.recording;
        if rec.fps == 0 || rec.fps > 240 {
            return Err(crate::error::LecternError::Config {
                message: format!("fps must be within 1..=240, got {}", rec.fps),
            });
        }
        if rec.resolution.width < 16 || rec.resolution.height < 16 {
            return Err(crate::error::LecternError::Config {
                message: format!("resolution {} is too small", rec.resolution),
            });
        }
        if rec.audio_sample_rate == 0 {
            return Err(crate::error::LecternError::Config {
                message: "audio_sample_rate must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("lectern").join("config.json")
}

/// Default saved-session directory.
fn default_sessions_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("lectern").join("sessions")
}
