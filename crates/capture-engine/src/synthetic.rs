//! Synthetic capture devices.
//!
//! Generates moving test patterns and sine tones so the whole engine can
//! run without hardware. Every failure mode a real backend exhibits can
//! be switched on: denied permission, missing device, screen shares that
//! refuse audio, slow permission prompts, 2×2 placeholder frames right
//! after acquisition, and tracks that end on their own.

use std::collections::{BTreeMap, BTreeSet};
use std::f32::consts::TAU;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use lectern_common::{spawn_periodic, LecternError, LecternResult, TaskHandle};
use lectern_media_core::{
    DeviceControl, DeviceProvider, DeviceRequest, DeviceStream, MediaTrack, TrackFeed, VideoFrame,
};
use lectern_session_model::{SourceKind, TrackKind};

/// Knobs for [`SyntheticDevices`].
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Native rate, used when the request names none.
    pub sample_rate: u32,
    /// Ignore requested sample rates, like hardware with one native rate.
    pub fixed_sample_rate: bool,
    /// Kinds whose permission prompt is denied.
    pub denied: BTreeSet<SourceKind>,
    /// Kinds with no device present.
    pub missing: BTreeSet<SourceKind>,
    /// Screen shares fail when audio is requested.
    pub refuse_screen_audio: bool,
    /// Delay before `open` resolves, like a permission prompt.
    pub open_delay: Duration,
    /// Number of 2×2 frames emitted before real ones.
    pub placeholder_frames: u32,
    /// When set, no generator runs; tests push media themselves.
    pub manual: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
            fps: 30,
            sample_rate: 48000,
            fixed_sample_rate: false,
            denied: BTreeSet::new(),
            missing: BTreeSet::new(),
            refuse_screen_audio: false,
            open_delay: Duration::ZERO,
            placeholder_frames: 0,
            manual: false,
        }
    }
}

#[derive(Default)]
struct SyntheticShared {
    config: Mutex<SyntheticConfig>,
    feeds: Mutex<BTreeMap<SourceKind, Vec<Arc<TrackFeed>>>>,
    opens: Mutex<BTreeMap<SourceKind, usize>>,
    stops: Mutex<BTreeMap<SourceKind, usize>>,
}

/// In-process [`DeviceProvider`] backed by generated media.
#[derive(Clone, Default)]
pub struct SyntheticDevices {
    shared: Arc<SyntheticShared>,
}

impl std::fmt::Debug for SyntheticDevices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticDevices")
            .field("config", &*self.shared.config.lock())
            .field("opens", &*self.shared.opens.lock())
            .finish()
    }
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SyntheticConfig) -> Self {
        let devices = Self::default();
        *devices.shared.config.lock() = config;
        devices
    }

    pub fn config(&self) -> SyntheticConfig {
        self.shared.config.lock().clone()
    }

    pub fn update_config(&self, f: impl FnOnce(&mut SyntheticConfig)) {
        f(&mut self.shared.config.lock());
    }

    pub fn deny(&self, kind: SourceKind) {
        self.update_config(|c| {
            c.denied.insert(kind);
        });
    }

    pub fn remove_device(&self, kind: SourceKind) {
        self.update_config(|c| {
            c.missing.insert(kind);
        });
    }

    /// How many times a device of `kind` was successfully opened.
    pub fn open_count(&self, kind: SourceKind) -> usize {
        self.shared.opens.lock().get(&kind).copied().unwrap_or(0)
    }

    /// How many times a device of `kind` was stopped through its control.
    pub fn stop_count(&self, kind: SourceKind) -> usize {
        self.shared.stops.lock().get(&kind).copied().unwrap_or(0)
    }

    /// Whether any opened device of `kind` still has a live track.
    pub fn is_open(&self, kind: SourceKind) -> bool {
        self.shared
            .feeds
            .lock()
            .get(&kind)
            .map(|feeds| feeds.iter().any(|f| !f.is_ended()))
            .unwrap_or(false)
    }

    /// Simulate the platform ending a device's video track: unplugged
    /// camera, revoked screen share. Returns `false` if nothing was live.
    pub fn end_track(&self, kind: SourceKind) -> bool {
        let feeds = self.shared.feeds.lock();
        let mut ended = false;
        for feed in feeds.get(&kind).into_iter().flatten() {
            if !feed.is_ended() && feed.track().kind() == TrackKind::Video {
                feed.end();
                ended = true;
            }
        }
        if ended {
            tracing::info!(%kind, "Synthetic device track ended");
        }
        ended
    }

    /// Push a frame into every live video track of `kind`.
    pub fn push_frame(&self, kind: SourceKind, frame: VideoFrame) {
        for feed in self.live_feeds(kind, TrackKind::Video) {
            feed.push_frame(frame.clone());
        }
    }

    /// Push samples into every live audio track of `kind`.
    pub fn push_audio(&self, kind: SourceKind, samples: &[f32]) {
        for feed in self.live_feeds(kind, TrackKind::Audio) {
            feed.push_audio(samples);
        }
    }

    fn live_feeds(&self, kind: SourceKind, track_kind: TrackKind) -> Vec<Arc<TrackFeed>> {
        self.shared
            .feeds
            .lock()
            .get(&kind)
            .map(|feeds| {
                feeds
                    .iter()
                    .filter(|f| !f.is_ended() && f.track().kind() == track_kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl DeviceProvider for SyntheticDevices {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn open(&self, request: DeviceRequest) -> LecternResult<DeviceStream> {
        let mut config = self.config();
        if let Some(rate) = request.constraints.sample_rate.filter(|r| *r > 0) {
            if !config.fixed_sample_rate {
                config.sample_rate = rate;
            }
        }
        if !config.open_delay.is_zero() {
            tokio::time::sleep(config.open_delay).await;
        }

        let kind = request.kind;
        if config.denied.contains(&kind) {
            return Err(LecternError::permission_denied(format!(
                "{} access was denied; allow it in system settings and try again",
                kind.display_name()
            )));
        }
        if config.missing.contains(&kind) {
            return Err(LecternError::device_not_found(format!(
                "no {} device is connected",
                kind.as_str()
            )));
        }
        if kind == SourceKind::Screen && request.video && request.audio && config.refuse_screen_audio {
            return Err(LecternError::audio_unavailable(
                "the selected window cannot share audio",
            ));
        }

        let mut feeds = Vec::new();
        if request.video {
            let (feed, _) = MediaTrack::channel(TrackKind::Video, format!("{kind}-video"), config.sample_rate);
            feeds.push(Arc::new(feed));
        }
        if request.audio {
            let (feed, _) = MediaTrack::channel(TrackKind::Audio, format!("{kind}-audio"), config.sample_rate);
            feeds.push(Arc::new(feed));
        }
        if feeds.is_empty() {
            return Err(LecternError::device_not_found(format!(
                "{kind} request asked for neither audio nor video"
            )));
        }

        let mut pattern = Pattern::new(kind, &config);
        for feed in &feeds {
            if feed.track().kind() == TrackKind::Video {
                feed.push_frame(pattern.next_frame());
            }
        }

        let generator = if config.manual {
            None
        } else {
            let period = Duration::from_secs_f64(1.0 / config.fps.max(1) as f64);
            let gen_feeds = feeds.clone();
            Some(spawn_periodic(format!("synthetic-{kind}"), period, move |_| {
                if gen_feeds.iter().all(|f| f.is_ended()) {
                    return ControlFlow::Break(());
                }
                let frame = pattern.next_frame();
                let samples = pattern.next_samples();
                for feed in &gen_feeds {
                    match feed.track().kind() {
                        TrackKind::Video => feed.push_frame(frame.clone()),
                        TrackKind::Audio => feed.push_audio(&samples),
                    }
                }
                ControlFlow::Continue(())
            }))
        };

        let tracks: Vec<MediaTrack> = feeds.iter().map(|f| f.track()).collect();
        self.shared
            .feeds
            .lock()
            .entry(kind)
            .or_default()
            .extend(feeds.iter().cloned());
        *self.shared.opens.lock().entry(kind).or_insert(0) += 1;
        tracing::debug!(%kind, tracks = tracks.len(), "Synthetic device opened");

        Ok(DeviceStream {
            tracks,
            control: Box::new(SyntheticControl {
                kind,
                feeds,
                generator,
                shared: self.shared.clone(),
            }),
        })
    }
}

struct SyntheticControl {
    kind: SourceKind,
    feeds: Vec<Arc<TrackFeed>>,
    generator: Option<TaskHandle>,
    shared: Arc<SyntheticShared>,
}

impl DeviceControl for SyntheticControl {
    fn stop(&mut self) {
        if let Some(mut generator) = self.generator.take() {
            generator.cancel();
        }
        for feed in &self.feeds {
            feed.end();
        }
        let mut registered = self.shared.feeds.lock();
        if let Some(list) = registered.get_mut(&self.kind) {
            list.retain(|f| !self.feeds.iter().any(|own| Arc::ptr_eq(own, f)));
        }
        *self.shared.stops.lock().entry(self.kind).or_insert(0) += 1;
        tracing::debug!(kind = %self.kind, "Synthetic device stopped");
    }
}

/// Test-pattern generator for one device.
struct Pattern {
    width: u32,
    height: u32,
    base: [u8; 4],
    placeholders_left: u32,
    frame_index: u64,
    frame_period_ns: u64,
    samples_per_frame: usize,
    phase: f32,
    phase_step: f32,
}

impl Pattern {
    fn new(kind: SourceKind, config: &SyntheticConfig) -> Self {
        let (base, tone_hz) = match kind {
            SourceKind::Camera => ([200, 120, 80, 255], 330.0),
            SourceKind::Screen => ([40, 70, 160, 255], 440.0),
            SourceKind::Microphone => ([0, 0, 0, 255], 220.0),
        };
        let fps = config.fps.max(1);
        Self {
            width: config.width.max(4),
            height: config.height.max(4),
            base,
            placeholders_left: config.placeholder_frames,
            frame_index: 0,
            frame_period_ns: 1_000_000_000 / fps as u64,
            samples_per_frame: (config.sample_rate / fps) as usize,
            phase: 0.0,
            phase_step: TAU * tone_hz / config.sample_rate.max(1) as f32,
        }
    }

    fn next_frame(&mut self) -> VideoFrame {
        let ts = self.frame_index * self.frame_period_ns;
        self.frame_index += 1;
        if self.placeholders_left > 0 {
            self.placeholders_left -= 1;
            return VideoFrame::solid(2, 2, [0, 0, 0, 255], ts);
        }

        let (w, h) = (self.width as usize, self.height as usize);
        let bar_w = (w / 8).max(1);
        let bar_x = (self.frame_index as usize * 4) % w;
        let mut data = Vec::with_capacity(w * h * 4);
        for _y in 0..h {
            for x in 0..w {
                if x >= bar_x && x < bar_x + bar_w {
                    data.extend_from_slice(&[240, 240, 240, 255]);
                } else {
                    data.extend_from_slice(&self.base);
                }
            }
        }
        VideoFrame::from_rgba(self.width, self.height, data, ts)
            .unwrap_or_else(|| VideoFrame::solid(self.width, self.height, self.base, ts))
    }

    fn next_samples(&mut self) -> Vec<f32> {
        (0..self.samples_per_frame)
            .map(|_| {
                let s = self.phase.sin() * 0.2;
                self.phase = (self.phase + self.phase_step) % TAU;
                s
            })
            .collect()
    }
}
