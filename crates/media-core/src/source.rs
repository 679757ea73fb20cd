//! Acquired capture sources.

use lectern_session_model::{SourceKind, TrackKind};

use crate::track::MediaTrack;

/// One acquired device feed and its tracks.
///
/// Consumers receive `Arc<CaptureSource>` references. The device control
/// that can stop the tracks is not part of this type; it stays with the
/// source registry.
#[derive(Debug, Clone)]
pub struct CaptureSource {
    kind: SourceKind,
    tracks: Vec<MediaTrack>,
}

impl CaptureSource {
    pub fn new(kind: SourceKind, tracks: Vec<MediaTrack>) -> Self {
        Self { kind, tracks }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_track_count(&self) -> usize {
        self.video_tracks().count()
    }

    pub fn audio_track_count(&self) -> usize {
        self.audio_tracks().count()
    }

    /// First video track that is still live.
    pub fn live_video_track(&self) -> Option<&MediaTrack> {
        self.video_tracks().find(|t| t.is_live())
    }

    pub fn live_audio_track(&self) -> Option<&MediaTrack> {
        self.audio_tracks().find(|t| t.is_live())
    }

    pub fn has_live_video(&self) -> bool {
        self.live_video_track().is_some()
    }

    /// Whether any track is still live.
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }
}
