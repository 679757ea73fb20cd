//! Lectern Common Utilities
//!
//! Shared infrastructure for all Lectern crates:
//! - Error types and result aliases
//! - Recording clocks with pause accounting
//! - Cancellable task scheduling
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod schedule;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use schedule::*;
