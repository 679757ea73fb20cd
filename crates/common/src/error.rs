//! Error types shared across Lectern crates.

use std::path::PathBuf;

/// Top-level error type for Lectern operations.
#[derive(Debug, thiserror::Error)]
pub enum LecternError {
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Device not found: {message}")]
    DeviceNotFound { message: String },

    #[error("Unsupported platform: {message}")]
    UnsupportedPlatform { message: String },

    #[error("Audio unavailable: {message}")]
    AudioUnavailable { message: String },

    #[error("No active video source; add a camera or screen before recording")]
    NoActiveSource,

    #[error("{source_name} stopped unexpectedly")]
    SourceLost { source_name: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Recording too short: {duration_secs:.2}s (minimum {min_secs:.2}s)")]
    RecordingTooShort { duration_secs: f64, min_secs: f64 },

    #[error("Recording too small: {bytes} bytes, {video_frames} video frames (minimum {min_bytes} bytes and one frame)")]
    RecordingTooSmall {
        bytes: u64,
        min_bytes: u64,
        video_frames: u64,
    },

    #[error("Invalid layout: {name}")]
    InvalidLayout { name: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Session error: {message}")]
    Session { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timed out: {message}")]
    Timeout { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using LecternError.
pub type LecternResult<T> = Result<T, LecternError>;

impl LecternError {
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: msg.into(),
        }
    }

    pub fn device_not_found(msg: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedPlatform {
            message: msg.into(),
        }
    }

    pub fn audio_unavailable(msg: impl Into<String>) -> Self {
        Self::AudioUnavailable {
            message: msg.into(),
        }
    }

    pub fn source_lost(name: impl Into<String>) -> Self {
        Self::SourceLost {
            source_name: name.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn invalid_layout(name: impl Into<String>) -> Self {
        Self::InvalidLayout { name: name.into() }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session {
            message: msg.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout {
            message: msg.into(),
        }
    }

    /// Whether the caller can keep using the engine after this error
    /// without an explicit reset.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. }
                | Self::DeviceNotFound { .. }
                | Self::AudioUnavailable { .. }
                | Self::SourceLost { .. }
                | Self::InvalidLayout { .. }
                | Self::InvalidState { .. }
                | Self::Cancelled
                | Self::Timeout { .. }
                | Self::NoActiveSource
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_carry_thresholds_in_message() {
        let err = LecternError::RecordingTooShort {
            duration_secs: 0.25,
            min_secs: 0.5,
        };
        assert_eq!(
            err.to_string(),
            "Recording too short: 0.25s (minimum 0.50s)"
        );

        let err = LecternError::RecordingTooSmall {
            bytes: 12,
            min_bytes: 1024,
            video_frames: 3,
        };
        assert!(err.to_string().contains("12 bytes"));
    }

    #[test]
    fn source_loss_is_recoverable_but_encoder_failure_is_not() {
        assert!(LecternError::source_lost("Screen sharing").is_recoverable());
        assert!(!LecternError::encoder("muxer died").is_recoverable());
        assert!(!LecternError::unsupported("no compositing").is_recoverable());
    }
}
