//! Render and recording telemetry.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Snapshot of render loop health.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PerformanceMetrics {
    /// Frames rendered over the last second.
    pub fps: f64,
    /// Frames skipped because the loop fell behind or overran its budget.
    pub dropped_frames: u64,
    /// Mean render time of recent frames, milliseconds.
    pub average_render_ms: f64,
    /// Approximate bytes held by frame buffers.
    pub memory_estimate_bytes: u64,
    pub healthy: bool,
}

const FPS_WINDOW: Duration = Duration::from_secs(1);
const RENDER_SAMPLES: usize = 60;

/// Render loop accumulator.
#[derive(Debug, Clone)]
pub struct FrameStats {
    target_fps: u32,
    frame_times: VecDeque<Instant>,
    render_times: VecDeque<Duration>,
    rendered: u64,
    dropped: u64,
}

impl FrameStats {
    pub fn new(target_fps: u32) -> Self {
        Self {
            target_fps: target_fps.max(1),
            frame_times: VecDeque::new(),
            render_times: VecDeque::with_capacity(RENDER_SAMPLES),
            rendered: 0,
            dropped: 0,
        }
    }

    /// Per-frame time budget at the target rate.
    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps as f64)
    }

    /// Record one rendered frame. A render that overruns the budget
    /// costs the next slot, which counts as a drop.
    pub fn record_frame(&mut self, finished_at: Instant, render_time: Duration) {
        self.rendered += 1;
        self.frame_times.push_back(finished_at);
        while let Some(front) = self.frame_times.front() {
            if finished_at.duration_since(*front) > FPS_WINDOW {
                self.frame_times.pop_front();
            } else {
                break;
            }
        }
        if self.render_times.len() == RENDER_SAMPLES {
            self.render_times.pop_front();
        }
        self.render_times.push_back(render_time);
        if render_time > self.frame_budget() {
            self.dropped += 1;
        }
    }

    /// Record ticks the loop missed entirely.
    pub fn record_dropped(&mut self, frames: u64) {
        self.dropped += frames;
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn metrics(&self, memory_estimate_bytes: u64) -> PerformanceMetrics {
        let fps = self.frame_times.len() as f64;
        let average_render_ms = if self.render_times.is_empty() {
            0.0
        } else {
            let total: Duration = self.render_times.iter().sum();
            total.as_secs_f64() * 1000.0 / self.render_times.len() as f64
        };
        let drop_ratio = if self.rendered + self.dropped == 0 {
            0.0
        } else {
            self.dropped as f64 / (self.rendered + self.dropped) as f64
        };
        let budget_ms = self.frame_budget().as_secs_f64() * 1000.0;
        // The fps check only applies once a full window has been rendered.
        let warmed_up = self.rendered >= self.target_fps as u64;
        let fps_ok = !warmed_up || fps >= self.target_fps as f64 * 0.8;

        PerformanceMetrics {
            fps,
            dropped_frames: self.dropped,
            average_render_ms,
            memory_estimate_bytes,
            healthy: fps_ok && average_render_ms <= budget_ms && drop_ratio < 0.05,
        }
    }
}

/// Encoder output accounting for a recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    chunks: u64,
    total_bytes: u64,
    window: VecDeque<(Instant, u64)>,
}

/// Snapshot of encoder output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RecordingStats {
    pub chunks: u64,
    pub file_size: u64,
    /// Output bitrate over the last few seconds, bits per second.
    pub bitrate_bps: f64,
}

const BITRATE_WINDOW: Duration = Duration::from_secs(5);

impl RecordingTelemetry {
    pub fn record_chunk(&mut self, at: Instant, bytes: u64) {
        self.chunks += 1;
        self.total_bytes += bytes;
        self.window.push_back((at, bytes));
        while let Some((front, _)) = self.window.front() {
            if at.duration_since(*front) > BITRATE_WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn stats(&self) -> RecordingStats {
        let bitrate_bps = match (self.window.front(), self.window.back()) {
            (Some((first, _)), Some((last, _))) if last > first => {
                // Bytes after the first sample arrived over the span.
                let bytes: u64 = self.window.iter().skip(1).map(|(_, b)| b).sum();
                bytes as f64 * 8.0 / last.duration_since(*first).as_secs_f64()
            }
            _ => 0.0,
        };
        RecordingStats {
            chunks: self.chunks,
            file_size: self.total_bytes,
            bitrate_bps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_counts_frames_in_last_second() {
        let mut stats = FrameStats::new(30);
        let start = Instant::now();
        for i in 0..45u64 {
            stats.record_frame(
                start + Duration::from_millis(i * 33),
                Duration::from_millis(2),
            );
        }
        let metrics = stats.metrics(0);
        assert!(metrics.fps >= 29.0 && metrics.fps <= 32.0, "fps {}", metrics.fps);
        assert!(metrics.healthy);
        assert_eq!(metrics.dropped_frames, 0);
    }

    #[test]
    fn over_budget_renders_count_as_drops_and_mark_unhealthy() {
        let mut stats = FrameStats::new(30);
        let start = Instant::now();
        for i in 0..10u64 {
            stats.record_frame(
                start + Duration::from_millis(i * 50),
                Duration::from_millis(50),
            );
        }
        let metrics = stats.metrics(1024);
        assert_eq!(metrics.dropped_frames, 10);
        assert!(!metrics.healthy);
        assert_eq!(metrics.memory_estimate_bytes, 1024);
    }

    #[test]
    fn bitrate_over_window() {
        let mut telemetry = RecordingTelemetry::default();
        let start = Instant::now();
        telemetry.record_chunk(start, 1000);
        telemetry.record_chunk(start + Duration::from_secs(1), 1000);
        telemetry.record_chunk(start + Duration::from_secs(2), 1000);
        let stats = telemetry.stats();
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.file_size, 3000);
        assert!((stats.bitrate_bps - 8000.0).abs() < 1.0);
    }
}
