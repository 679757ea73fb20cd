//! Engine event types.
//!
//! The source registry, compositor, and recording session talk to each
//! other and to the caller through these messages instead of nested
//! callbacks. Events are broadcast; slow receivers may observe
//! `Lagged` and skip ahead.

use serde::{Deserialize, Serialize};

use crate::layout::Layout;
use crate::session::SessionState;
use crate::source::SourceKind;

/// A notification emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A device was acquired and is delivering media.
    SourceAdded { kind: SourceKind },

    /// A source was released on request.
    SourceRemoved { kind: SourceKind },

    /// A source's track ended without being released (device unplugged,
    /// screen share revoked, OS-level stop).
    SourceLost { kind: SourceKind },

    /// The compositor switched to a new layout.
    LayoutApplied { layout: Layout, smooth: bool },

    /// The encoder produced a chunk of output.
    ChunkReady {
        index: u64,
        bytes: u64,
        total_bytes: u64,
    },

    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// Non-fatal condition worth surfacing to the user.
    Warning { message: String },

    /// A recording produced an artifact.
    RecordingFinalized {
        session_id: String,
        bytes: u64,
        duration_secs: f64,
    },

    Error { message: String, recoverable: bool },
}

impl EngineEvent {
    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = EngineEvent::SourceLost {
            kind: SourceKind::Screen,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"source_lost","kind":"screen"}"#);
    }
}
