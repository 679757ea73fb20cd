//! Lectern Session Model
//!
//! Defines the core data contracts shared by the capture and render
//! layers:
//! - **Sources:** closed set of capture kinds (camera, screen, microphone)
//! - **Layouts:** named arrangements and their normalized placement geometry
//! - **Events:** messages passed between registry, compositor, and session
//! - **Sessions:** recording metadata, codecs, and the on-disk session store
//!
//! All placement coordinates are normalized to `[0.0, 1.0]` relative to
//! the output canvas so they survive resolution changes.

pub mod event;
pub mod geometry;
pub mod layout;
pub mod session;
pub mod source;
pub mod store;

pub use event::*;
pub use geometry::*;
pub use layout::*;
pub use session::*;
pub use source::*;
pub use store::*;
