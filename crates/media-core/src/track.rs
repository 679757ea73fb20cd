//! Live media tracks.
//!
//! A track is split into two halves:
//! - [`TrackFeed`], held by the device backend, which pushes frames and
//!   samples and is the only thing that can end the track.
//! - [`MediaTrack`], a cloneable read-only view handed to consumers
//!   (compositor, mixer, encoder). Dropping or discarding a view never
//!   affects the underlying device.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use lectern_session_model::TrackKind;

use crate::frame::VideoFrame;

/// Liveness of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct TrackShared {
    id: String,
    kind: TrackKind,
    label: String,
    sample_rate: u32,
    state: watch::Sender<TrackState>,
    latest_frame: Mutex<Option<VideoFrame>>,
    frames_delivered: AtomicU64,
    audio: Mutex<VecDeque<f32>>,
    audio_capacity: usize,
}

/// Read-only view of a live track.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    shared: Arc<TrackShared>,
}

/// Producer half of a track.
#[derive(Debug)]
pub struct TrackFeed {
    shared: Arc<TrackShared>,
}

impl MediaTrack {
    /// Create a connected feed/view pair. Audio tracks buffer up to two
    /// seconds of mono samples; older samples are discarded on overflow.
    pub fn channel(kind: TrackKind, label: impl Into<String>, sample_rate: u32) -> (TrackFeed, MediaTrack) {
        let id = format!("track-{}", NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed));
        let (state, _) = watch::channel(TrackState::Live);
        let audio_capacity = (sample_rate as usize).max(1) * 2;
        let shared = Arc::new(TrackShared {
            id,
            kind,
            label: label.into(),
            sample_rate,
            state,
            latest_frame: Mutex::new(None),
            frames_delivered: AtomicU64::new(0),
            audio: Mutex::new(VecDeque::with_capacity(audio_capacity)),
            audio_capacity,
        });
        (
            TrackFeed {
                shared: shared.clone(),
            },
            MediaTrack { shared },
        )
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn kind(&self) -> TrackKind {
        self.shared.kind
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    pub fn state(&self) -> TrackState {
        *self.shared.state.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.state() == TrackState::Live
    }

    /// Most recent frame pushed by the producer.
    pub fn latest_frame(&self) -> Option<VideoFrame> {
        self.shared.latest_frame.lock().clone()
    }

    /// Number of frames pushed so far.
    pub fn frames_delivered(&self) -> u64 {
        self.shared.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn audio_available(&self) -> usize {
        self.shared.audio.lock().len()
    }

    /// Take up to `max` buffered samples, oldest first.
    pub fn drain_audio(&self, max: usize) -> Vec<f32> {
        let mut buf = self.shared.audio.lock();
        let n = max.min(buf.len());
        buf.drain(..n).collect()
    }

    /// Subscribe to liveness changes.
    pub fn watch_state(&self) -> watch::Receiver<TrackState> {
        self.shared.state.subscribe()
    }

    /// Resolves once the track has ended.
    pub async fn ended(&self) {
        let mut rx = self.watch_state();
        let _ = rx.wait_for(|state| *state == TrackState::Ended).await;
    }

    /// Whether both views refer to the same underlying track.
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl TrackFeed {
    pub fn track(&self) -> MediaTrack {
        MediaTrack {
            shared: self.shared.clone(),
        }
    }

    pub fn is_ended(&self) -> bool {
        *self.shared.state.borrow() == TrackState::Ended
    }

    /// Publish a new frame. Ignored once the track has ended.
    pub fn push_frame(&self, frame: VideoFrame) {
        if self.is_ended() {
            return;
        }
        *self.shared.latest_frame.lock() = Some(frame);
        self.shared.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Append mono samples. Ignored once the track has ended.
    pub fn push_audio(&self, samples: &[f32]) {
        if self.is_ended() {
            return;
        }
        let mut buf = self.shared.audio.lock();
        buf.extend(samples.iter().copied());
        let overflow = buf.len().saturating_sub(self.shared.audio_capacity);
        if overflow > 0 {
            buf.drain(..overflow);
        }
    }

    /// End the track. Every consumer observes `TrackState::Ended`.
    pub fn end(&self) {
        let previous = self.shared.state.send_replace(TrackState::Ended);
        if previous == TrackState::Live {
            tracing::debug!(track = %self.shared.id, label = %self.shared.label, "Track ended");
        }
    }
}
