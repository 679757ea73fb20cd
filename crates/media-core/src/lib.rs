//! Lectern media core contracts.
//!
//! This crate contains the media data structures shared by the capture,
//! render, and encode layers without coupling to a concrete device
//! backend: decoded frames, live tracks, acquired sources, and the
//! provider trait that device backends implement.

pub mod device;
pub mod frame;
pub mod source;
pub mod track;

pub use device::*;
pub use frame::*;
pub use source::*;
pub use track::*;
