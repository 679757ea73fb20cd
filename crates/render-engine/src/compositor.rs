//! Live compositor.
//!
//! Draws every visible video source into one canvas per output frame and
//! publishes the result, together with the mixer's combined audio, as an
//! [`OutputStream`]. Sources and layouts may change while the render
//! loop runs; all mutation goes through one state lock, so a frame never
//! observes a half-applied change.
//!
//! The compositor only ever holds [`MediaTrack`] views. Stopping or
//! disposing it ends its own output tracks and nothing else.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use lectern_common::{
    CompositorDefaults, LecternError, LecternResult, RecordingDefaults, Resolution, TaskHandle,
    spawn_periodic,
};
use lectern_media_core::{CaptureSource, MediaTrack, TrackFeed, VideoFrame};
use lectern_session_model::{Layout, Placement, SourceKind, TrackKind};

use crate::canvas::Canvas;
use crate::layout::{resolve_layout, LayoutTransition, PlacementTable};
use crate::mixer::AudioMixer;
use crate::telemetry::{FrameStats, PerformanceMetrics};

/// Render parameters fixed for the lifetime of a compositor.
#[derive(Debug, Clone)]
pub struct CompositorSettings {
    pub resolution: Resolution,
    pub fps: u32,
    pub sample_rate: u32,
    pub transition: Duration,
    pub source_ready_timeout: Duration,
    pub source_ready_poll: Duration,
    pub background: [u8; 4],
}

impl CompositorSettings {
    pub fn from_config(recording: &RecordingDefaults, compositor: &CompositorDefaults) -> Self {
        Self {
            resolution: recording.resolution,
            fps: recording.fps.max(1),
            sample_rate: recording.audio_sample_rate,
            transition: compositor.transition(),
            source_ready_timeout: compositor.source_ready_timeout(),
            source_ready_poll: compositor.source_ready_poll(),
            background: compositor.background,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self::from_config(&RecordingDefaults::default(), &CompositorDefaults::default())
    }
}

/// Per-source options supplied when a source is added.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceOptions {
    pub visible: bool,
    pub opacity: f64,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            visible: true,
            opacity: 1.0,
        }
    }
}

/// The compositor's output: one video track and one mixed audio track.
#[derive(Debug, Clone)]
pub struct OutputStream {
    pub video: MediaTrack,
    pub audio: MediaTrack,
}

struct OutputFeeds {
    video: TrackFeed,
    audio: TrackFeed,
    stream: OutputStream,
}

/// Visual binding of a capture source into the render graph.
#[derive(Debug)]
struct CompositorSource {
    source: Arc<CaptureSource>,
    options: SourceOptions,
    /// Set once the source has produced a real frame.
    ready: bool,
}

impl CompositorSource {
    fn current_frame(&self) -> Option<VideoFrame> {
        self.source
            .live_video_track()
            .and_then(|t| t.latest_frame())
            .filter(|f| f.is_decodable())
    }
}

/// A smooth layout change waiting for newly added sources to warm up.
#[derive(Debug)]
struct PendingLayout {
    target: PlacementTable,
    since: Instant,
}

struct State {
    canvas: Canvas,
    sources: BTreeMap<SourceKind, CompositorSource>,
    layout: Option<Layout>,
    placements: PlacementTable,
    transition: Option<LayoutTransition>,
    pending: Option<PendingLayout>,
    stats: FrameStats,
    output: Option<OutputFeeds>,
    started_at: Option<Instant>,
    /// Mixed samples published since `started_at`.
    audio_emitted: u64,
}

impl State {
    fn visual_kinds(&self) -> Vec<SourceKind> {
        self.sources
            .iter()
            .filter(|(kind, s)| kind.is_visual() && s.source.video_track_count() > 0)
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Current placements, mid-transition if one is running.
    fn placements_at(&self, now: Instant) -> PlacementTable {
        match &self.transition {
            Some(t) => t.sample(now),
            None => self.placements.clone(),
        }
    }

    fn begin_transition(&mut self, target: PlacementTable, now: Instant, duration: Duration) {
        let from = self.placements_at(now);
        self.transition = Some(LayoutTransition::new(from, target.clone(), now, duration));
        self.placements = target;
    }

    fn targets_ready(&self, target: &PlacementTable) -> bool {
        target.iter().filter(|(_, p)| p.visible).all(|(kind, _)| {
            self.sources
                .get(kind)
                .map(|s| s.ready || s.current_frame().is_some())
                .unwrap_or(true)
        })
    }

    /// Reallocate the canvas if it was released by `dispose`.
    fn ensure_canvas(&mut self, resolution: Resolution) {
        if self.canvas.width() != resolution.width || self.canvas.height() != resolution.height {
            self.canvas = Canvas::new(resolution.width, resolution.height);
        }
    }

    fn memory_estimate(&self) -> u64 {
        let frames: usize = self
            .sources
            .values()
            .filter_map(|s| s.source.live_video_track().and_then(|t| t.latest_frame()))
            .map(|f| f.byte_len())
            .sum();
        (self.canvas.byte_len() + frames) as u64
    }
}

/// Real-time multi-source compositor.
pub struct Compositor {
    settings: CompositorSettings,
    state: Arc<Mutex<State>>,
    mixer: Arc<AudioMixer>,
    render_task: Mutex<Option<TaskHandle>>,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Compositor")
            .field("resolution", &self.settings.resolution)
            .field("sources", &state.sources.keys().collect::<Vec<_>>())
            .field("layout", &state.layout)
            .field("running", &state.output.is_some())
            .finish()
    }
}

impl Compositor {
    pub fn new(settings: CompositorSettings, mixer: Arc<AudioMixer>) -> Self {
        let canvas = Canvas::new(settings.resolution.width, settings.resolution.height);
        let stats = FrameStats::new(settings.fps);
        Self {
            settings,
            state: Arc::new(Mutex::new(State {
                canvas,
                sources: BTreeMap::new(),
                layout: None,
                placements: PlacementTable::new(),
                transition: None,
                pending: None,
                stats,
                output: None,
                started_at: None,
                audio_emitted: 0,
            })),
            mixer,
            render_task: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &CompositorSettings {
        &self.settings
    }

    pub fn mixer(&self) -> &Arc<AudioMixer> {
        &self.mixer
    }

    /// Bind a source into the render graph. Its audio, if any, is routed
    /// to the mixer. The source stays hidden until a layout places it.
    /// Re-adding a kind replaces the previous binding.
    pub fn add_source(&self, kind: SourceKind, source: Arc<CaptureSource>, options: SourceOptions) {
        if let Some(audio) = source.live_audio_track() {
            self.mixer.add_channel(kind, audio.clone());
        }
        let mut state = self.state.lock();
        let binding = CompositorSource {
            source,
            options: SourceOptions {
                visible: options.visible,
                opacity: options.opacity.clamp(0.0, 1.0),
            },
            ready: false,
        };
        let has_video = binding.source.video_track_count() > 0;
        state.sources.insert(kind, binding);
        tracing::info!(%kind, has_video, "Source added to compositor");
    }

    /// Unbind a source. Its tracks are left untouched.
    pub fn remove_source(&self, kind: SourceKind) -> bool {
        self.mixer.remove_channel(kind);
        let mut state = self.state.lock();
        let removed = state.sources.remove(&kind).is_some();
        if removed {
            state.placements.remove(&kind);
            if let Some(pending) = state.pending.as_mut() {
                pending.target.remove(&kind);
            }
            tracing::info!(%kind, "Source removed from compositor");
        }
        removed
    }

    pub fn has_source(&self, kind: SourceKind) -> bool {
        self.state.lock().sources.contains_key(&kind)
    }

    /// Kinds currently bound, in stable order.
    pub fn source_kinds(&self) -> Vec<SourceKind> {
        self.state.lock().sources.keys().copied().collect()
    }

    /// Video kinds currently bound.
    pub fn visual_kinds(&self) -> Vec<SourceKind> {
        self.state.lock().visual_kinds()
    }

    pub fn layout(&self) -> Option<Layout> {
        self.state.lock().layout
    }

    /// Current steady-state placement table (the transition target if
    /// one is running).
    pub fn placements(&self) -> PlacementTable {
        self.state.lock().placements.clone()
    }

    pub fn is_transitioning(&self) -> bool {
        let state = self.state.lock();
        state.transition.is_some() || state.pending.is_some()
    }

    /// Switch layout.
    ///
    /// A layout whose required sources are not bound is rejected and the
    /// current layout is kept. With `smooth` the change is interpolated
    /// and, if it reveals a source that has not produced a real frame
    /// yet, deferred until that source is ready or the ready timeout
    /// elapses. Without `smooth` it takes effect on the next frame.
    pub fn apply_layout(&self, layout: Layout, smooth: bool) -> LecternResult<()> {
        let mut state = self.state.lock();
        let present = state.visual_kinds();
        if !layout.is_satisfied_by(&present) {
            return Err(LecternError::invalid_layout(format!(
                "{layout} needs {:?}, have {:?}",
                layout.required_sources(),
                present
            )));
        }

        let target = resolve_layout(layout, &present);
        let now = Instant::now();
        state.layout = Some(layout);

        if !smooth || self.settings.transition.is_zero() {
            state.transition = None;
            state.pending = None;
            state.placements = target;
        } else if state.targets_ready(&target) {
            state.pending = None;
            state.begin_transition(target, now, self.settings.transition);
        } else {
            tracing::debug!(%layout, "Layout deferred until new sources produce frames");
            state.pending = Some(PendingLayout { target, since: now });
        }
        tracing::info!(%layout, smooth, "Layout applied");
        Ok(())
    }

    /// Start rendering. Fails with `NoActiveSource` unless at least one
    /// bound source has a live video track. Calling `start` on a running
    /// compositor returns the existing stream.
    pub fn start(&self) -> LecternResult<OutputStream> {
        let mut task = self.render_task.lock();
        let mut state = self.state.lock();
        if let Some(output) = &state.output {
            return Ok(output.stream.clone());
        }
        if !state.sources.values().any(|s| s.source.has_live_video()) {
            return Err(LecternError::NoActiveSource);
        }

        let (video_feed, video) =
            MediaTrack::channel(TrackKind::Video, "compositor-video", self.settings.sample_rate);
        let (audio_feed, audio) =
            MediaTrack::channel(TrackKind::Audio, "compositor-audio", self.settings.sample_rate);
        let stream = OutputStream { video, audio };
        state.output = Some(OutputFeeds {
            video: video_feed,
            audio: audio_feed,
            stream: stream.clone(),
        });
        state.ensure_canvas(self.settings.resolution);
        state.started_at = Some(Instant::now());
        state.audio_emitted = 0;
        state.stats = FrameStats::new(self.settings.fps);
        drop(state);

        let shared = self.state.clone();
        let mixer = self.mixer.clone();
        let settings = self.settings.clone();
        let budget = settings.frame_interval();
        *task = Some(spawn_periodic("compositor-render", budget, move |tick| {
            let mut state = shared.lock();
            if state.output.is_none() {
                return ControlFlow::Break(());
            }
            let late = tick.lateness();
            if late > budget {
                let missed = (late.as_secs_f64() / budget.as_secs_f64()).floor() as u64;
                state.stats.record_dropped(missed);
            }
            render_into(&mut state, &settings, &mixer, Instant::now());
            ControlFlow::Continue(())
        }));

        tracing::info!(
            resolution = %self.settings.resolution,
            fps = self.settings.fps,
            "Compositor started"
        );
        Ok(stream)
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().output.is_some()
    }

    /// The output stream, if running.
    pub fn output(&self) -> Option<OutputStream> {
        self.state.lock().output.as_ref().map(|o| o.stream.clone())
    }

    /// Render one frame now. Also publishes it when the compositor is
    /// running.
    pub fn render_frame(&self) -> VideoFrame {
        let mut state = self.state.lock();
        render_into(&mut state, &self.settings, &self.mixer, Instant::now())
    }

    /// Stop the render loop and end the output tracks. Bound sources are
    /// kept, so the compositor can be started again.
    pub fn stop(&self) {
        if let Some(mut task) = self.render_task.lock().take() {
            task.cancel();
        }
        let mut state = self.state.lock();
        if let Some(output) = state.output.take() {
            output.video.end();
            output.audio.end();
            tracing::info!(frames = state.stats.rendered(), "Compositor stopped");
        }
        state.started_at = None;
    }

    /// Tear down scheduling, buffers and bindings. Capture tracks are
    /// never stopped here.
    pub fn dispose(&self) {
        self.stop();
        self.mixer.stop_level_monitoring();
        self.mixer.clear();
        let mut state = self.state.lock();
        state.sources.clear();
        state.placements.clear();
        state.transition = None;
        state.pending = None;
        state.layout = None;
        state.canvas = Canvas::new(0, 0);
        tracing::debug!("Compositor disposed");
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let state = self.state.lock();
        state.stats.metrics(state.memory_estimate())
    }

    /// Wait until `kind` produces a decodable frame.
    ///
    /// Returns `false` if the source is not bound or the timeout elapses
    /// first. Audio-only sources are ready immediately.
    pub async fn wait_for_source_ready(&self, kind: SourceKind, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock();
                let Some(binding) = state.sources.get_mut(&kind) else {
                    return false;
                };
                if binding.source.video_track_count() == 0 {
                    return true;
                }
                if binding.ready || binding.current_frame().is_some() {
                    binding.ready = true;
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(%kind, timeout_ms = timeout.as_millis() as u64, "Source not ready before timeout, proceeding");
                return false;
            }
            tokio::time::sleep(self.settings.source_ready_poll).await;
        }
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One pass of the render loop.
fn render_into(
    state: &mut State,
    settings: &CompositorSettings,
    mixer: &AudioMixer,
    now: Instant,
) -> VideoFrame {
    let render_started = Instant::now();

    state.ensure_canvas(settings.resolution);

    for (kind, binding) in state.sources.iter_mut() {
        if !binding.ready && binding.current_frame().is_some() {
            binding.ready = true;
            tracing::debug!(%kind, "Source produced first real frame");
        }
    }

    let promote = match &state.pending {
        Some(p) => {
            state.targets_ready(&p.target)
                || now.saturating_duration_since(p.since) >= settings.source_ready_timeout
        }
        None => false,
    };
    if promote {
        if let Some(pending) = state.pending.take() {
            state.begin_transition(pending.target, now, settings.transition);
        }
    }

    let placements = state.placements_at(now);
    if state
        .transition
        .as_ref()
        .map(|t| t.is_complete(now))
        .unwrap_or(false)
    {
        state.transition = None;
    }

    let mut order: Vec<(SourceKind, Placement)> = placements
        .into_iter()
        .filter(|(_, p)| p.visible && p.opacity > 0.0)
        .collect();
    order.sort_by_key(|(kind, p)| (p.z_order, *kind));

    state.canvas.clear(settings.background);
    for (kind, placement) in order {
        let Some(binding) = state.sources.get(&kind) else {
            continue;
        };
        if !binding.options.visible {
            continue;
        }
        if let Some(frame) = binding.current_frame() {
            let opacity = placement.opacity * binding.options.opacity;
            state.canvas.draw_fit(&frame, &placement.rect, opacity);
        }
    }

    let timestamp_ns = state
        .started_at
        .map(|t| now.saturating_duration_since(t).as_nanos() as u64)
        .unwrap_or(0);
    let frame = state.canvas.to_frame(timestamp_ns);
    state.stats.record_frame(Instant::now(), render_started.elapsed());

    if state.output.is_some() {
        // Audio follows the wall clock, so ticks skipped by the scheduler
        // are made up on the next one.
        let owed = (timestamp_ns as u128 * settings.sample_rate as u128 / 1_000_000_000) as u64;
        let samples = owed.saturating_sub(state.audio_emitted);
        state.audio_emitted += samples;
        let mixed = mixer.mix(samples as usize, settings.sample_rate);
        if let Some(output) = &state.output {
            output.video.push_frame(frame.clone());
            output.audio.push_audio(&mixed);
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CompositorSettings {
        CompositorSettings {
            resolution: Resolution::new(64, 36),
            fps: 30,
            sample_rate: 48000,
            transition: Duration::from_millis(40),
            source_ready_timeout: Duration::from_millis(200),
            source_ready_poll: Duration::from_millis(2),
            background: [0, 0, 0, 255],
        }
    }

    fn compositor() -> Compositor {
        Compositor::new(settings(), Arc::new(AudioMixer::new(Duration::from_millis(10))))
    }

    fn video_source(kind: SourceKind, rgba: [u8; 4]) -> (TrackFeed, Arc<CaptureSource>) {
        let (feed, track) = MediaTrack::channel(TrackKind::Video, kind.as_str(), 48000);
        feed.push_frame(VideoFrame::solid(64, 36, rgba, 0));
        (feed, Arc::new(CaptureSource::new(kind, vec![track])))
    }

    #[test]
    fn start_without_video_fails_with_no_active_source() {
        let compositor = compositor();
        assert!(matches!(compositor.start(), Err(LecternError::NoActiveSource)));

        let (_feed, track) = MediaTrack::channel(TrackKind::Audio, "mic", 48000);
        let mic = Arc::new(CaptureSource::new(SourceKind::Microphone, vec![track]));
        compositor.add_source(SourceKind::Microphone, mic, SourceOptions::default());
        assert!(matches!(compositor.start(), Err(LecternError::NoActiveSource)));
    }

    #[test]
    fn instant_layout_draws_sources_in_z_order() {
        let compositor = compositor();
        let (_s, screen) = video_source(SourceKind::Screen, [0, 0, 255, 255]);
        let (_c, camera) = video_source(SourceKind::Camera, [255, 0, 0, 255]);
        compositor.add_source(SourceKind::Screen, screen, SourceOptions::default());
        compositor.add_source(SourceKind::Camera, camera, SourceOptions::default());
        compositor.apply_layout(Layout::PictureInPicture, false).unwrap();

        let frame = compositor.render_frame();
        assert_eq!(frame.pixel(2, 2), Some([0, 0, 255, 255]));
        assert_eq!(frame.pixel(58, 32), Some([255, 0, 0, 255]));
    }

    #[test]
    fn unsatisfied_layout_is_rejected_and_current_kept() {
        let compositor = compositor();
        let (_c, camera) = video_source(SourceKind::Camera, [255, 0, 0, 255]);
        compositor.add_source(SourceKind::Camera, camera, SourceOptions::default());
        compositor.apply_layout(Layout::CameraOnly, false).unwrap();

        let err = compositor.apply_layout(Layout::SideBySide, true).unwrap_err();
        assert!(matches!(err, LecternError::InvalidLayout { .. }));
        assert_eq!(compositor.layout(), Some(Layout::CameraOnly));
    }

    #[test]
    fn placeholder_source_defers_smooth_layout() {
        let compositor = compositor();
        let (_c, camera) = video_source(SourceKind::Camera, [255, 0, 0, 255]);
        compositor.add_source(SourceKind::Camera, camera, SourceOptions::default());
        compositor.apply_layout(Layout::CameraOnly, false).unwrap();

        let (screen_feed, screen_track) = MediaTrack::channel(TrackKind::Video, "screen", 48000);
        screen_feed.push_frame(VideoFrame::solid(2, 2, [0, 0, 0, 255], 0));
        let screen = Arc::new(CaptureSource::new(SourceKind::Screen, vec![screen_track]));
        compositor.add_source(SourceKind::Screen, screen, SourceOptions::default());
        compositor.apply_layout(Layout::PictureInPicture, true).unwrap();

        compositor.render_frame();
        assert!(compositor.is_transitioning());
        assert!(compositor.placements().get(&SourceKind::Screen).is_none());

        screen_feed.push_frame(VideoFrame::solid(64, 36, [0, 0, 255, 255], 1));
        compositor.render_frame();
        assert!(compositor.placements().get(&SourceKind::Screen).is_some());

        std::thread::sleep(Duration::from_millis(60));
        let frame = compositor.render_frame();
        assert!(!compositor.is_transitioning());
        assert_eq!(frame.pixel(2, 2), Some([0, 0, 255, 255]));
    }

    #[tokio::test]
    async fn wait_for_source_ready_is_bounded() {
        let compositor = compositor();
        let (feed, track) = MediaTrack::channel(TrackKind::Video, "screen", 48000);
        feed.push_frame(VideoFrame::solid(2, 2, [0, 0, 0, 255], 0));
        let screen = Arc::new(CaptureSource::new(SourceKind::Screen, vec![track]));
        compositor.add_source(SourceKind::Screen, screen, SourceOptions::default());

        let started = std::time::Instant::now();
        assert!(!compositor.wait_for_source_ready(SourceKind::Screen, Duration::from_millis(30)).await);
        assert!(started.elapsed() >= Duration::from_millis(30));

        feed.push_frame(VideoFrame::solid(16, 9, [1, 1, 1, 255], 1));
        assert!(compositor.wait_for_source_ready(SourceKind::Screen, Duration::from_millis(30)).await);
        assert!(!compositor.wait_for_source_ready(SourceKind::Camera, Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn running_compositor_publishes_frames_and_audio() {
        let compositor = compositor();
        let (_s, screen) = video_source(SourceKind::Screen, [0, 0, 255, 255]);
        let (mic_feed, mic_track) = MediaTrack::channel(TrackKind::Audio, "mic", 48000);
        let mic = Arc::new(CaptureSource::new(SourceKind::Microphone, vec![mic_track]));
        compositor.add_source(SourceKind::Screen, screen, SourceOptions::default());
        compositor.add_source(SourceKind::Microphone, mic, SourceOptions::default());
        compositor.apply_layout(Layout::ScreenOnly, false).unwrap();

        let output = compositor.start().unwrap();
        mic_feed.push_audio(&[0.25; 4800]);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(output.video.frames_delivered() > 0);
        assert!(output.audio.audio_available() > 0);
        assert_eq!(output.video.latest_frame().unwrap().pixel(1, 1), Some([0, 0, 255, 255]));

        compositor.stop();
        assert!(!output.video.is_live());
        assert!(!compositor.is_running());
    }

    #[test]
    fn dispose_leaves_capture_tracks_live() {
        let compositor = compositor();
        let (feed, screen) = video_source(SourceKind::Screen, [0, 0, 255, 255]);
        let track = screen.tracks()[0].clone();
        compositor.add_source(SourceKind::Screen, screen, SourceOptions::default());
        compositor.dispose();

        assert!(track.is_live());
        assert!(!feed.is_ended());
        assert!(compositor.source_kinds().is_empty());
    }

    #[tokio::test]
    async fn restart_after_dispose_renders_at_full_resolution() {
        let compositor = compositor();
        let (_s, screen) = video_source(SourceKind::Screen, [0, 0, 255, 255]);
        compositor.add_source(SourceKind::Screen, screen.clone(), SourceOptions::default());
        compositor.start().unwrap();
        compositor.dispose();

        compositor.add_source(SourceKind::Screen, screen, SourceOptions::default());
        compositor.apply_layout(Layout::ScreenOnly, false).unwrap();
        let output = compositor.start().unwrap();
        let frame = compositor.render_frame();
        assert_eq!((frame.width, frame.height), (64, 36));
        assert!(frame.is_decodable());
        assert_eq!(frame.pixel(1, 1), Some([0, 0, 255, 255]));
        assert_eq!(output.video.latest_frame().map(|f| f.width), Some(64));
        compositor.stop();
    }

    #[tokio::test]
    async fn late_render_tick_catches_up_on_audio() {
        let compositor = compositor();
        let (_s, screen) = video_source(SourceKind::Screen, [0, 0, 255, 255]);
        compositor.add_source(SourceKind::Screen, screen, SourceOptions::default());
        let output = compositor.start().unwrap();

        // Current-thread runtime: the render task cannot run between these.
        {
            let mut state = compositor.state.lock();
            let started = state.started_at.unwrap();
            render_into(&mut state, &compositor.settings, &compositor.mixer, started + Duration::from_millis(500));
        }
        assert_eq!(output.audio.audio_available(), 24000);
        {
            let mut state = compositor.state.lock();
            let started = state.started_at.unwrap();
            render_into(&mut state, &compositor.settings, &compositor.mixer, started + Duration::from_millis(600));
        }
        assert_eq!(output.audio.audio_available(), 28800);
        compositor.stop();
    }

    #[test]
    fn removing_a_source_keeps_its_track_live() {
        let compositor = compositor();
        let (_feed, screen) = video_source(SourceKind::Screen, [0, 0, 255, 255]);
        let track = screen.tracks()[0].clone();
        compositor.add_source(SourceKind::Screen, screen, SourceOptions::default());
        assert!(compositor.remove_source(SourceKind::Screen));
        assert!(!compositor.remove_source(SourceKind::Screen));
        assert!(track.is_live());
    }
}
