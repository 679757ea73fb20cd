//! Capture device contract.

use serde::{Deserialize, Serialize};

use lectern_common::LecternResult;
use lectern_session_model::{SourceKind, TrackKind};

use crate::track::MediaTrack;

/// Requested capture format. Providers treat every field as a hint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
    /// Preferred audio sample rate, Hz.
    pub sample_rate: Option<u32>,
    /// Backend-specific device identifier.
    pub device_id: Option<String>,
}

/// What to open and which media types to include.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRequest {
    pub kind: SourceKind,
    pub video: bool,
    pub audio: bool,
    pub constraints: CaptureConstraints,
}

impl DeviceRequest {
    /// Default media types per kind: camera is video-only, screen asks
    /// for video plus system audio, microphone is audio-only.
    pub fn for_kind(kind: SourceKind, constraints: CaptureConstraints) -> Self {
        let (video, audio) = match kind {
            SourceKind::Camera => (true, false),
            SourceKind::Screen => (true, true),
            SourceKind::Microphone => (false, true),
        };
        Self {
            kind,
            video,
            audio,
            constraints,
        }
    }

    pub fn without_audio(mut self) -> Self {
        self.audio = false;
        self
    }
}

/// Device-side control. Stopping ends every track the device produced.
pub trait DeviceControl: Send + Sync {
    fn stop(&mut self);
}

/// An opened device: its tracks plus the control that can stop it.
pub struct DeviceStream {
    pub tracks: Vec<MediaTrack>,
    pub control: Box<dyn DeviceControl>,
}

impl DeviceStream {
    pub fn track_count(&self, kind: TrackKind) -> usize {
        self.tracks.iter().filter(|t| t.kind() == kind).count()
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStream")
            .field("tracks", &self.tracks)
            .finish_non_exhaustive()
    }
}

/// Abstract interface for a platform capture backend.
///
/// `open` may suspend while the platform asks the user for permission;
/// callers cancel by dropping the future.
#[async_trait::async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Open a device.
    ///
    /// Errors: `PermissionDenied`, `DeviceNotFound`, `UnsupportedPlatform`,
    /// and `AudioUnavailable` when audio was requested alongside video but
    /// the platform cannot provide it.
    async fn open(&self, request: DeviceRequest) -> LecternResult<DeviceStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_requests_per_kind() {
        let cam = DeviceRequest::for_kind(SourceKind::Camera, CaptureConstraints::default());
        assert!(cam.video && !cam.audio);
        let screen = DeviceRequest::for_kind(SourceKind::Screen, CaptureConstraints::default());
        assert!(screen.video && screen.audio);
        assert!(!screen.without_audio().audio);
        let mic = DeviceRequest::for_kind(SourceKind::Microphone, CaptureConstraints::default());
        assert!(!mic.video && mic.audio);
    }
}
