//! Clock and timing utilities for recording sessions.
//!
//! A session clock is anchored to a monotonic epoch recorded when
//! recording starts. Paused intervals are tracked so the reported
//! duration only covers time the encoder was actually running.

use std::time::{Duration, Instant};

/// A recording clock that provides monotonic timestamps relative to
/// a fixed epoch (the moment recording started).
#[derive(Debug, Clone)]
pub struct RecordingClock {
    /// The instant recording started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,

    /// Total time spent in completed pauses.
    paused_total: Duration,

    /// Start of the pause currently in progress.
    paused_at: Option<Instant>,
}

impl RecordingClock {
    /// Create a new recording clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
            paused_total: Duration::ZERO,
            paused_at: None,
        }
    }

    /// Get nanoseconds elapsed since recording start, pauses included.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Time spent recording, excluding pauses.
    pub fn active(&self) -> Duration {
        let now = Instant::now();
        let wall = now.duration_since(self.epoch);
        let current_pause = self
            .paused_at
            .map(|at| now.duration_since(at))
            .unwrap_or_default();
        wall.saturating_sub(self.paused_total + current_pause)
    }

    /// Seconds spent recording, excluding pauses.
    pub fn active_secs(&self) -> f64 {
        self.active().as_secs_f64()
    }

    /// Mark the start of a pause. Repeated calls are ignored.
    pub fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    /// Close the current pause, if any.
    pub fn resume(&mut self) {
        if let Some(at) = self.paused_at.take() {
            self.paused_total += at.elapsed();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Wall-clock time at recording start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// Convert an elapsed nanosecond value to seconds.
    pub fn ns_to_secs(ns: u64) -> f64 {
        ns as f64 / 1_000_000_000.0
    }
}
