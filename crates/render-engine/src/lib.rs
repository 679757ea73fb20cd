//! Lectern Render Engine
//!
//! Real-time side of the recorder: turns live capture tracks into one
//! composited video track plus one mixed audio track.
//!
//! # Pipeline Architecture
//!
//! ```text
//! camera track ──┐
//!                ├── Compositor (layout placements, z-order, opacity)
//! screen track ──┘         │
//!                          ├── OutputStream.video
//! mic / screen audio ──────┤
//!                          └── AudioMixer (gain, mute, levels)
//!                                     │
//!                                     └── OutputStream.audio
//! ```
//!
//! Layouts are resolved by the pure [`layout::resolve_layout`] and
//! animated with [`layout::LayoutTransition`]. Frame timing and health
//! are tracked by [`telemetry::FrameStats`].

pub mod canvas;
pub mod compositor;
pub mod layout;
pub mod mixer;
pub mod telemetry;

pub use compositor::{Compositor, CompositorSettings, OutputStream, SourceOptions};
pub use layout::{resolve_layout, LayoutTransition, PlacementTable};
pub use mixer::{AudioLevelData, AudioMixer};
pub use telemetry::{FrameStats, PerformanceMetrics, RecordingStats, RecordingTelemetry};
