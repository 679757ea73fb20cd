//! Capture source kinds.

use serde::{Deserialize, Serialize};

/// The closed set of live capture devices the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Camera,
    Screen,
    Microphone,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Camera, SourceKind::Screen, SourceKind::Microphone];

    /// Whether this kind normally contributes a video track.
    pub fn is_visual(&self) -> bool {
        matches!(self, SourceKind::Camera | SourceKind::Screen)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Camera => "camera",
            SourceKind::Screen => "screen",
            SourceKind::Microphone => "microphone",
        }
    }

    /// Human-readable label used in user-facing messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            SourceKind::Camera => "Camera",
            SourceKind::Screen => "Screen sharing",
            SourceKind::Microphone => "Microphone",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = lectern_common::LecternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "camera" | "webcam" => Ok(SourceKind::Camera),
            "screen" | "display" => Ok(SourceKind::Screen),
            "microphone" | "mic" => Ok(SourceKind::Microphone),
            other => Err(lectern_common::LecternError::device_not_found(format!(
                "unknown source kind '{other}'"
            ))),
        }
    }
}

/// Media type of a single track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}
