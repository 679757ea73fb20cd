//! Recording session state and metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use lectern_common::{Quality, Resolution};

use crate::layout::Layout;
use crate::source::SourceKind;

/// Lifecycle of a recording session.
///
/// ```text
/// idle → initializing → recording ⇄ paused → stopping → finalized
///   └──────────┴─────────────┴────────┴─────────┴──→ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Initializing,
    Recording,
    Paused,
    Stopping,
    Finalized,
    Failed,
}

impl SessionState {
    /// Whether the legal state graph contains an edge `self → next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Initializing) => true,
            (Initializing, Recording) => true,
            (Recording, Paused) | (Paused, Recording) => true,
            (Recording, Stopping) | (Paused, Stopping) => true,
            (Stopping, Finalized) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Recording or paused: the session owns a live encoder.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finalized | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Recording => "recording",
            SessionState::Paused => "paused",
            SessionState::Stopping => "stopping",
            SessionState::Finalized => "finalized",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Container/codec pairs the engine can encode to, listed in priority
/// order: most container-friendly first, the built-in format last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Codec {
    Mp4H264,
    WebmVp8,
    WebmVp9,
    MkvH264,
    /// Built-in length-prefixed raw container. Always available.
    Lrv,
}

impl Codec {
    pub const PRIORITY: [Codec; 5] = [
        Codec::Mp4H264,
        Codec::WebmVp8,
        Codec::WebmVp9,
        Codec::MkvH264,
        Codec::Lrv,
    ];

    /// The entry every platform can produce.
    pub const UNIVERSAL: Codec = Codec::Lrv;

    pub fn mime_type(&self) -> &'static str {
        match self {
            Codec::Mp4H264 => "video/mp4;codecs=avc1,mp4a",
            Codec::WebmVp8 => "video/webm;codecs=vp8,opus",
            Codec::WebmVp9 => "video/webm;codecs=vp9,opus",
            Codec::MkvH264 => "video/x-matroska;codecs=avc1",
            Codec::Lrv => "video/x-lectern-raw",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Mp4H264 => "mp4",
            Codec::WebmVp8 | Codec::WebmVp9 => "webm",
            Codec::MkvH264 => "mkv",
            Codec::Lrv => "lrv",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Metadata describing a recording, updated live and snapshotted into
/// the finalized artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Layout active when the metadata was last updated.
    pub layout: Option<Layout>,

    /// Source kinds contributing to the output.
    pub active_sources: Vec<SourceKind>,

    pub resolution: Resolution,

    pub quality: Quality,

    pub frame_rate: u32,

    /// Running size of the encoded output in bytes.
    pub file_size: u64,

    /// Slide index → elapsed recording seconds when the slide was shown.
    /// Stored as an ordered list of `[index, seconds]` pairs.
    #[serde(with = "slide_pairs")]
    pub slide_timestamps: BTreeMap<u32, f64>,
}

impl SessionMetadata {
    pub fn new(resolution: Resolution, quality: Quality, frame_rate: u32) -> Self {
        Self {
            layout: None,
            active_sources: Vec::new(),
            resolution,
            quality,
            frame_rate,
            file_size: 0,
            slide_timestamps: BTreeMap::new(),
        }
    }

    /// Replace the active source set, keeping it sorted and unique.
    pub fn set_active_sources(&mut self, sources: impl IntoIterator<Item = SourceKind>) {
        let mut sources: Vec<SourceKind> = sources.into_iter().collect();
        sources.sort();
        sources.dedup();
        self.active_sources = sources;
    }
}

mod slide_pairs {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(map: &BTreeMap<u32, f64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let pairs: Vec<(u32, f64)> = map.iter().map(|(k, v)| (*k, *v)).collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<u32, f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(u32, f64)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}
