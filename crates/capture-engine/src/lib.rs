//! Lectern Capture Engine
//!
//! Acquires capture devices, negotiates what the platform can encode and
//! drives recording sessions on top of the render engine's compositor.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   RecordingEngine                    │
//! │  ┌──────────────┐   ┌────────────┐   ┌────────────┐  │
//! │  │ Source       │──▶│ Compositor │──▶│ Recording  │  │
//! │  │ Registry     │   │ + Mixer    │   │ Session    │  │
//! │  └──────┬───────┘   └────────────┘   └─────┬──────┘  │
//! │         │ SourceLost                       │ chunks  │
//! │         ▼                                  ▼         │
//! │   EngineEvent broadcast             Encoder (lrv /   │
//! │                                     GStreamer)       │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Devices come from a [`DeviceProvider`](lectern_media_core::DeviceProvider);
//! [`synthetic::SyntheticDevices`] generates test media without hardware.

pub mod capabilities;
pub mod encoder;
pub mod engine;
#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod registry;
pub mod session;
pub mod synthetic;

pub use capabilities::*;
pub use encoder::{
    inspect_lrv, DefaultEncoderFactory, Encoder, EncoderFactory, EncoderSettings, EncoderStats,
    FramedEncoder, LrvSummary,
};
pub use engine::RecordingEngine;
pub use registry::SourceRegistry;
pub use session::*;
pub use synthetic::{SyntheticConfig, SyntheticDevices};
