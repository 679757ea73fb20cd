//! Recording engine facade.
//!
//! [`RecordingEngine`] is what a caller drives: it acquires sources
//! through the [`SourceRegistry`], binds them into the [`Compositor`],
//! keeps the layout consistent with whatever is present, and runs one
//! [`RecordingSession`] at a time on the compositor's output.
//!
//! Source changes during a recording only touch the compositor and the
//! mixer. The session and its encoder never see them.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use lectern_common::{CancellationToken, EngineConfig, LecternError, LecternResult};
use lectern_media_core::{CaptureConstraints, DeviceProvider};
use lectern_render_engine::{
    AudioLevelData, AudioMixer, Compositor, CompositorSettings, PerformanceMetrics, RecordingStats,
    SourceOptions,
};
use lectern_session_model::{
    Codec, EngineEvent, Layout, SavedSession, SessionState, SessionStore, SourceKind,
};

use crate::capabilities::{Capabilities, CapabilityNegotiator};
use crate::encoder::{DefaultEncoderFactory, Encoder, EncoderFactory};
use crate::registry::SourceRegistry;
use crate::session::{Artifact, RecordingSession, SessionInput, SessionSettings};

const EVENT_CAPACITY: usize = 256;

/// How the active recording is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureMode {
    /// Compositor output goes to the encoder.
    Composited,
    /// Compositing is unavailable; one raw source goes to the encoder.
    Passthrough(SourceKind),
}

struct EngineCore {
    negotiator: CapabilityNegotiator,
    factory: Arc<dyn EncoderFactory>,
    sources: BTreeSet<SourceKind>,
    /// Layout the caller picked. Dropped once the sources it needs are
    /// gone, after which the default policy applies again.
    explicit_layout: Option<Layout>,
    mode: CaptureMode,
    session: Option<RecordingSession>,
    /// Artifact produced without the caller asking (forced stop, salvage).
    artifact: Option<Artifact>,
    next_session: u64,
    surfaced_warnings: HashSet<String>,
}

impl EngineCore {
    fn active_session(&mut self) -> Option<&mut RecordingSession> {
        self.session.as_mut().filter(|s| s.state().is_active())
    }

    fn is_recording(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.state().is_active())
    }
}

#[derive(Default)]
struct Notices {
    transient: Mutex<Option<(String, Instant)>>,
    last_error: Mutex<Option<String>>,
}

struct EngineInner {
    config: EngineConfig,
    registry: SourceRegistry,
    compositor: Compositor,
    mixer: Arc<AudioMixer>,
    events: broadcast::Sender<EngineEvent>,
    store: SessionStore,
    core: Mutex<EngineCore>,
    notices: Notices,
}

/// The engine's public surface.
///
/// Construct it inside a tokio runtime; it spawns a task that reacts to
/// source loss and encoder failure.
pub struct RecordingEngine {
    inner: Arc<EngineInner>,
    watcher: JoinHandle<()>,
}

impl std::fmt::Debug for RecordingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("RecordingEngine")
            .field("sources", &core.sources)
            .field("mode", &core.mode)
            .field("session", &core.session)
            .finish()
    }
}

impl RecordingEngine {
    pub fn new(config: EngineConfig, provider: Arc<dyn DeviceProvider>) -> Self {
        Self::with_components(
            config,
            provider,
            CapabilityNegotiator::default(),
            Arc::new(DefaultEncoderFactory::new()),
        )
    }

    pub fn with_components(
        config: EngineConfig,
        provider: Arc<dyn DeviceProvider>,
        negotiator: CapabilityNegotiator,
        factory: Arc<dyn EncoderFactory>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mixer = Arc::new(AudioMixer::new(config.audio.fade_out()));
        let compositor = Compositor::new(
            CompositorSettings::from_config(&config.recording, &config.compositor),
            mixer.clone(),
        );
        let registry = SourceRegistry::new(provider, events.clone()).with_constraints(
            CaptureConstraints {
                frame_rate: Some(config.recording.fps),
                sample_rate: Some(config.recording.audio_sample_rate),
                ..CaptureConstraints::default()
            },
        );
        let store = SessionStore::new(&config.sessions_dir);

        let inner = Arc::new(EngineInner {
            config,
            registry,
            compositor,
            mixer,
            events: events.clone(),
            store,
            core: Mutex::new(EngineCore {
                negotiator,
                factory,
                sources: BTreeSet::new(),
                explicit_layout: None,
                mode: CaptureMode::Composited,
                session: None,
                artifact: None,
                next_session: 1,
                surfaced_warnings: HashSet::new(),
            }),
            notices: Notices::default(),
        });
        let watcher = spawn_event_watcher(Arc::downgrade(&inner), events.subscribe());
        Self { inner, watcher }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.inner.registry
    }

    pub fn compositor(&self) -> &Compositor {
        &self.inner.compositor
    }

    pub fn mixer(&self) -> &Arc<AudioMixer> {
        &self.inner.mixer
    }

    // ---- Sources ----

    /// Acquire `kind` and bring it into the output.
    ///
    /// Adding a kind that is already present is a no-op. During a
    /// recording the source joins the running compositor; the encoder is
    /// not touched.
    pub async fn add_source(&self, kind: SourceKind) -> LecternResult<()> {
        self.add_source_with_cancel(kind, &CancellationToken::new()).await
    }

    /// [`add_source`](Self::add_source), abandoned with `Cancelled` if
    /// `cancel` fires while the device is still being opened.
    pub async fn add_source_with_cancel(
        &self,
        kind: SourceKind,
        cancel: &CancellationToken,
    ) -> LecternResult<()> {
        let inner = &self.inner;
        {
            let mut core = inner.core.lock();
            if core.sources.contains(&kind) {
                if inner.compositor.has_source(kind) {
                    tracing::debug!(%kind, "Source already present");
                    return Ok(());
                }
                // Dropped by a direct compositor dispose.
                tracing::info!(%kind, "Rebinding source the compositor no longer holds");
                core.sources.remove(&kind);
                inner.registry.release(kind);
            }
            if core.is_recording() && matches!(core.mode, CaptureMode::Passthrough(_)) {
                return Err(LecternError::unsupported(
                    "sources cannot be added to a recording without compositing",
                ));
            }
        }

        let source = match inner.registry.acquire_with_cancel(kind, cancel).await {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!(%kind, error = %err, "Could not add source");
                return Err(err);
            }
        };

        {
            let mut core = inner.core.lock();
            if core.sources.contains(&kind) {
                inner.registry.release(kind);
                return Ok(());
            }
            core.sources.insert(kind);
            inner
                .compositor
                .add_source(kind, source, SourceOptions::default());
        }

        let mut ready = true;
        if kind.is_visual() {
            let timeout = inner.compositor.settings().source_ready_timeout;
            ready = inner.compositor.wait_for_source_ready(kind, timeout).await;
            if !ready {
                tracing::debug!(%kind, "Proceeding without a ready frame");
            }
        }

        let mut core = inner.core.lock();
        if !core.sources.contains(&kind) {
            return Err(LecternError::source_lost(kind.display_name()));
        }
        inner.sync_session_sources(&core);
        // Sources past their ready deadline are placed instantly.
        let smooth = ready && inner.compositor.is_running();
        inner.relayout(&mut core, smooth)?;
        tracing::info!(%kind, smooth, "Source added");
        let _ = inner.events.send(EngineEvent::SourceAdded { kind });
        Ok(())
    }

    /// Take `kind` out of the output and drop our reference to it.
    ///
    /// Removing the last video source of a recording stops and finalizes
    /// it; the artifact is then available from
    /// [`take_artifact`](Self::take_artifact). Returns `false` if `kind`
    /// was not present.
    pub fn remove_source(&self, kind: SourceKind) -> bool {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if !core.sources.remove(&kind) {
            return false;
        }
        inner.compositor.remove_source(kind);
        inner.sync_session_sources(&core);
        let _ = inner.events.send(EngineEvent::SourceRemoved { kind });
        tracing::info!(%kind, "Source removed");

        inner.after_source_gone(&mut core, kind);
        inner.registry.release(kind);
        true
    }

    pub fn active_sources(&self) -> Vec<SourceKind> {
        self.inner.core.lock().sources.iter().copied().collect()
    }

    // ---- Layout ----

    /// Switch layout. A layout the present sources cannot satisfy is
    /// rejected and the current one kept.
    pub fn set_layout(&self, layout: Layout) -> LecternResult<()> {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if let CaptureMode::Passthrough(kind) = core.mode {
            if Layout::solo(kind) != Some(layout) {
                return Err(LecternError::unsupported(
                    "layouts cannot change while recording without compositing",
                ));
            }
            return Ok(());
        }
        let smooth = inner.compositor.is_running();
        inner.compositor.apply_layout(layout, smooth)?;
        core.explicit_layout = Some(layout);
        if let Some(session) = core.active_session() {
            session.set_layout(Some(layout));
        }
        let _ = inner.events.send(EngineEvent::LayoutApplied { layout, smooth });
        Ok(())
    }

    /// [`set_layout`](Self::set_layout) by name, e.g. `"pip"` or
    /// `"side-by-side"`.
    pub fn set_layout_by_name(&self, name: &str) -> LecternResult<()> {
        let layout: Layout = name.parse()?;
        self.set_layout(layout)
    }

    /// The layout currently shown, if the present sources satisfy it.
    pub fn layout(&self) -> Option<Layout> {
        let core = self.inner.core.lock();
        if let CaptureMode::Passthrough(kind) = core.mode {
            return Layout::solo(kind);
        }
        let present = self.inner.compositor.visual_kinds();
        self.inner
            .compositor
            .layout()
            .filter(|layout| layout.is_satisfied_by(&present))
    }

    // ---- Audio ----

    pub fn set_audio_volume(&self, kind: SourceKind, volume: f32) -> bool {
        self.inner.mixer.set_volume(kind, volume)
    }

    pub fn set_audio_muted(&self, kind: SourceKind, muted: bool) -> bool {
        self.inner.mixer.set_muted(kind, muted)
    }

    pub fn get_audio_levels(&self) -> Vec<AudioLevelData> {
        self.inner.mixer.levels()
    }

    /// Call `callback` with every channel's level at the configured
    /// interval until [`stop_level_monitoring`](Self::stop_level_monitoring).
    pub fn start_level_monitoring<F>(&self, callback: F)
    where
        F: Fn(Vec<AudioLevelData>) + Send + 'static,
    {
        self.inner
            .mixer
            .start_level_monitoring(self.inner.config.audio.level_interval(), callback);
    }

    pub fn stop_level_monitoring(&self) {
        self.inner.mixer.stop_level_monitoring();
    }

    // ---- Recording ----

    /// Start a new recording and return its id.
    pub fn start_recording(&self) -> LecternResult<String> {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if let Some(session) = &core.session {
            let state = session.state();
            if !state.is_terminal() {
                return Err(LecternError::invalid_state(format!(
                    "a recording is already {state}"
                )));
            }
        }

        let id = format!(
            "rec-{}-{}",
            chrono::Local::now().format("%Y%m%d-%H%M%S"),
            core.next_session
        );
        core.next_session += 1;
        core.artifact = None;

        let settings = SessionSettings::from_config(&inner.config.recording);
        let mut session = RecordingSession::new(id.clone(), settings, inner.events.clone());
        session.begin()?;

        match inner.launch(&mut core, &mut session) {
            Ok(()) => {
                inner.registry.set_recording_active(true);
                core.session = Some(session);
                Ok(id)
            }
            Err(err) => {
                session.fail(&err.to_string());
                inner.end_recording(&mut core);
                if !err.is_recoverable() {
                    inner.notices.set_error(err.to_string());
                }
                core.session = Some(session);
                Err(err)
            }
        }
    }

    /// Stop the recording, flush the encoder and return the artifact.
    pub fn stop_recording(&self) -> LecternResult<Artifact> {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        let result = match core.active_session() {
            Some(session) => session.stop(),
            None => return Err(LecternError::invalid_state("no recording in progress")),
        };
        inner.end_recording(&mut core);
        if let Err(err) = &result {
            inner.notices.set_error(err.to_string());
        }
        result
    }

    pub fn pause(&self) -> LecternResult<()> {
        let mut core = self.inner.core.lock();
        match core.session.as_mut() {
            Some(session) => session.pause(),
            None => Err(LecternError::invalid_state("no recording in progress")),
        }
    }

    pub fn resume(&self) -> LecternResult<()> {
        let mut core = self.inner.core.lock();
        match core.session.as_mut() {
            Some(session) => session.resume(),
            None => Err(LecternError::invalid_state("no recording in progress")),
        }
    }

    /// Abandon any recording, clear errors and return to idle. Acquired
    /// sources stay acquired.
    pub fn reset(&self) {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if let Some(session) = core.session.as_mut() {
            session.fail("reset");
        }
        inner.end_recording(&mut core);
        core.session = None;
        core.artifact = None;
        core.explicit_layout = None;
        inner.notices.clear();
        if let Err(err) = inner.relayout(&mut core, false) {
            tracing::debug!(error = %err, "No layout after reset");
        }
        tracing::info!("Engine reset");
    }

    /// Reset, tear down the compositor and release every device.
    pub fn shutdown(&self) {
        self.reset();
        let inner = &self.inner;
        inner.compositor.dispose();
        inner.core.lock().sources.clear();
        inner.registry.release_all();
        tracing::info!("Engine shut down");
    }

    /// Mark slide `index` at the current recording time. Returns the
    /// elapsed seconds recorded for it.
    pub fn record_slide_change(&self, index: u32) -> LecternResult<f64> {
        let mut core = self.inner.core.lock();
        match core.session.as_mut() {
            Some(session) => session.record_slide(index),
            None => Err(LecternError::invalid_state("no recording in progress")),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner
            .core
            .lock()
            .session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or_default()
    }

    pub fn session_id(&self) -> Option<String> {
        let core = self.inner.core.lock();
        core.session.as_ref().map(|s| s.id().to_string())
    }

    pub fn duration_secs(&self) -> f64 {
        let core = self.inner.core.lock();
        core.session.as_ref().map(|s| s.duration_secs()).unwrap_or(0.0)
    }

    pub fn recording_stats(&self) -> Option<RecordingStats> {
        let core = self.inner.core.lock();
        core.session.as_ref().map(|s| s.stats())
    }

    /// Artifact from a recording the engine had to stop on its own.
    pub fn take_artifact(&self) -> Option<Artifact> {
        self.inner.core.lock().artifact.take()
    }

    pub fn capabilities(&self) -> Capabilities {
        let mut core = self.inner.core.lock();
        let capabilities = core.negotiator.detect();
        self.inner.surface_warnings(&mut core, &capabilities.warnings);
        capabilities
    }

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        self.inner.compositor.performance_metrics()
    }

    // ---- Notices ----

    /// The last transient warning, while it is still inside its display
    /// window.
    pub fn transient_message(&self) -> Option<String> {
        let window = Duration::from_secs_f64(self.inner.config.transient_message_secs.max(0.0));
        self.inner.notices.transient(window)
    }

    /// The last fatal error. Kept until [`reset`](Self::reset).
    pub fn last_error(&self) -> Option<String> {
        self.inner.notices.last_error.lock().clone()
    }

    // ---- Persistence ----

    /// Write the metadata of session `id` to the session store.
    pub fn save_session(&self, id: &str) -> LecternResult<PathBuf> {
        let core = self.inner.core.lock();
        let saved = match (&core.session, &core.artifact) {
            (Some(session), _) if session.id() == id => {
                let mut saved = SavedSession::new(id, session.metadata());
                saved.codec = session.codec();
                saved.duration_secs = session.duration_secs();
                saved
            }
            (_, Some(artifact)) if artifact.session_id == id => {
                let mut saved = SavedSession::new(id, artifact.metadata.clone());
                saved.codec = Some(artifact.codec);
                saved.duration_secs = artifact.duration_secs;
                saved
            }
            _ => return Err(LecternError::session(format!("unknown session {id:?}"))),
        };
        drop(core);
        let path = self.inner.store.save(&saved)?;
        tracing::info!(id, path = %path.display(), "Session saved");
        Ok(path)
    }

    pub fn load_session(&self, id: &str) -> LecternResult<SavedSession> {
        Ok(self.inner.store.load(id)?)
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.inner.store
    }
}

impl Drop for RecordingEngine {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

impl EngineInner {
    /// Pick the input, create the encoder and start the session.
    fn launch(&self, core: &mut EngineCore, session: &mut RecordingSession) -> LecternResult<()> {
        let capabilities = core.negotiator.detect();
        self.surface_warnings(core, &capabilities.warnings);
        if !capabilities.can_record {
            return Err(LecternError::unsupported(
                "recording is not available on this platform",
            ));
        }

        let visual = self.compositor.visual_kinds();
        if visual.is_empty() {
            return Err(LecternError::NoActiveSource);
        }

        let input = if capabilities.can_composite {
            core.mode = CaptureMode::Composited;
            self.relayout(core, false)?;
            let output = self.compositor.start()?;
            SessionInput {
                video: output.video,
                audio: Some(output.audio),
            }
        } else {
            self.passthrough_input(core, &visual)?
        };

        let codec = core.negotiator.select_codec(&capabilities);
        let encoder = self.create_encoder(core, session, codec)?;

        session.set_active_sources(core.sources.iter().copied());
        session.set_layout(match core.mode {
            CaptureMode::Composited => self.compositor.layout(),
            CaptureMode::Passthrough(kind) => Layout::solo(kind),
        });
        session.start(encoder, input)
    }

    fn create_encoder(
        &self,
        core: &mut EngineCore,
        session: &RecordingSession,
        codec: Codec,
    ) -> LecternResult<Box<dyn Encoder>> {
        match core.factory.create(&session.settings().encoder_settings(codec)) {
            Ok(encoder) => Ok(encoder),
            Err(err) if codec != Codec::UNIVERSAL => {
                let fallback = Codec::UNIVERSAL;
                let warning = format!(
                    "Encoder for {} failed ({err}); using {}",
                    codec.mime_type(),
                    fallback.mime_type()
                );
                self.surface_warnings(core, &[warning]);
                core.factory
                    .create(&session.settings().encoder_settings(fallback))
            }
            Err(err) => Err(err),
        }
    }

    /// Raw single-source input for platforms that cannot composite.
    fn passthrough_input(
        &self,
        core: &mut EngineCore,
        visual: &[SourceKind],
    ) -> LecternResult<SessionInput> {
        let kind = if visual.contains(&SourceKind::Screen) {
            SourceKind::Screen
        } else {
            visual[0]
        };
        let source = self
            .registry
            .get(kind)
            .ok_or(LecternError::NoActiveSource)?;
        let video = source
            .live_video_track()
            .cloned()
            .ok_or(LecternError::NoActiveSource)?;
        let audio = self
            .registry
            .get(SourceKind::Microphone)
            .filter(|_| core.sources.contains(&SourceKind::Microphone))
            .and_then(|mic| mic.live_audio_track().cloned())
            .or_else(|| source.live_audio_track().cloned());

        if visual.len() > 1 {
            let warning = format!(
                "Compositing unavailable; recording {} only",
                kind.display_name()
            );
            self.surface_warnings(core, &[warning]);
        }
        core.mode = CaptureMode::Passthrough(kind);
        tracing::info!(%kind, "Recording without compositor");
        Ok(SessionInput { video, audio })
    }

    /// Compositor and registry cleanup once a session is no longer
    /// active.
    fn end_recording(&self, core: &mut EngineCore) {
        self.compositor.stop();
        self.registry.set_recording_active(false);
        core.mode = CaptureMode::Composited;
    }

    /// Re-derive the layout from the present sources.
    fn relayout(&self, core: &mut EngineCore, smooth: bool) -> LecternResult<()> {
        if let CaptureMode::Passthrough(_) = core.mode {
            return Ok(());
        }
        let present = self.compositor.visual_kinds();
        let layout = match core.explicit_layout {
            Some(layout) if layout.is_satisfied_by(&present) => Some(layout),
            Some(layout) => {
                tracing::debug!(%layout, "Chosen layout no longer fits the sources");
                core.explicit_layout = None;
                Layout::default_for(&present)
            }
            None => Layout::default_for(&present),
        };
        let Some(layout) = layout else {
            return Ok(());
        };
        self.compositor.apply_layout(layout, smooth)?;
        if let Some(session) = core.active_session() {
            session.set_layout(Some(layout));
        }
        let _ = self.events.send(EngineEvent::LayoutApplied { layout, smooth });
        Ok(())
    }

    fn sync_session_sources(&self, core: &EngineCore) {
        if let Some(session) = core.session.as_ref().filter(|s| s.state().is_active()) {
            session.set_active_sources(core.sources.iter().copied());
        }
    }

    /// Shared tail of removal and loss: stop the recording if nothing
    /// visual is left to record, otherwise fall back to a layout the
    /// remaining sources satisfy.
    fn after_source_gone(&self, core: &mut EngineCore, kind: SourceKind) {
        let passthrough_gone = core.mode == CaptureMode::Passthrough(kind);
        let nothing_visual = self.compositor.visual_kinds().is_empty();
        if core.is_recording() && (passthrough_gone || nothing_visual) {
            self.force_stop(core, LecternError::source_lost(kind.display_name()));
        }
        let smooth = self.compositor.is_running();
        if let Err(err) = self.relayout(core, smooth) {
            tracing::warn!(error = %err, "Layout fallback failed");
        }
    }

    fn handle_source_lost(&self, kind: SourceKind) {
        let mut core = self.core.lock();
        if !core.sources.remove(&kind) {
            return;
        }
        self.compositor.remove_source(kind);
        self.sync_session_sources(&core);

        let message = format!("{} stopped", kind.display_name());
        tracing::warn!(%kind, "Source lost, continuing with remaining sources");
        self.notices.set_transient(message.clone());
        let _ = self.events.send(EngineEvent::warning(message));

        self.after_source_gone(&mut core, kind);
    }

    /// Stop and finalize with whatever was captured.
    fn force_stop(&self, core: &mut EngineCore, cause: LecternError) {
        let Some(result) = core.active_session().map(|session| session.stop()) else {
            return;
        };
        tracing::warn!(error = %cause, "Recording stopped by the engine");
        self.end_recording(core);
        match result {
            Ok(artifact) => {
                core.artifact = Some(artifact);
                let _ = self.events.send(EngineEvent::Error {
                    message: cause.to_string(),
                    recoverable: true,
                });
            }
            Err(err) => {
                self.notices.set_error(err.to_string());
                let _ = self.events.send(EngineEvent::Error {
                    message: err.to_string(),
                    recoverable: err.is_recoverable(),
                });
            }
        }
    }

    /// After an encoder failure, finalize with the chunks already
    /// captured if they pass validation.
    fn salvage_after_encoder_failure(&self) {
        let mut core = self.core.lock();
        let Some(session) = core.active_session() else {
            return;
        };
        let Some(reason) = session.encoder_error() else {
            return;
        };
        let result = session.salvage();
        self.end_recording(&mut core);
        self.notices.set_error(reason);
        match result {
            Ok(artifact) => {
                tracing::info!(bytes = artifact.bytes.len(), "Salvaged recording after encoder failure");
                core.artifact = Some(artifact);
            }
            Err(err) => tracing::warn!(error = %err, "Nothing worth salvaging"),
        }
    }

    /// Catch up on losses whose events were skipped by a lagging
    /// receiver.
    fn reconcile(&self) {
        let lost: Vec<SourceKind> = {
            let core = self.core.lock();
            core.sources
                .iter()
                .copied()
                .filter(|kind| !self.registry.get(*kind).is_some_and(|s| s.is_live()))
                .collect()
        };
        for kind in lost {
            self.handle_source_lost(kind);
        }
    }

    fn surface_warnings(&self, core: &mut EngineCore, warnings: &[String]) {
        for warning in warnings {
            if core.surfaced_warnings.insert(warning.clone()) {
                let _ = self.events.send(EngineEvent::warning(warning.clone()));
            }
        }
    }
}

impl Notices {
    fn set_transient(&self, message: String) {
        *self.transient.lock() = Some((message, Instant::now()));
    }

    fn transient(&self, window: Duration) -> Option<String> {
        let mut transient = self.transient.lock();
        match transient.as_ref() {
            Some((message, at)) if at.elapsed() < window => Some(message.clone()),
            Some(_) => {
                *transient = None;
                None
            }
            None => None,
        }
    }

    fn set_error(&self, message: String) {
        *self.last_error.lock() = Some(message);
    }

    fn clear(&self) {
        *self.transient.lock() = None;
        *self.last_error.lock() = None;
    }
}

fn spawn_event_watcher(
    inner: Weak<EngineInner>,
    mut events: broadcast::Receiver<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Engine event watcher lagged");
                    match inner.upgrade() {
                        Some(inner) => inner.reconcile(),
                        None => break,
                    }
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(inner) = inner.upgrade() else {
                break;
            };
            match event {
                EngineEvent::SourceLost { kind } => inner.handle_source_lost(kind),
                EngineEvent::Error {
                    recoverable: false, ..
                } => inner.salvage_after_encoder_failure(),
                _ => {}
            }
        }
    })
}
