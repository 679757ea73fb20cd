//! Recording session state machine.
//!
//! ```text
//! idle → initializing → recording ⇄ paused → stopping → finalized
//!   └──────────┴─────────────┴────────┴─────────┴──→ failed
//! ```
//!
//! The session owns exactly one encoder for its whole life. It samples
//! whatever track it was given as input at the output frame rate, so
//! anything upstream (sources joining or leaving the compositor, layout
//! switches) is invisible to it.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use lectern_common::{
    spawn_periodic, LecternError, LecternResult, Quality, RecordingClock, RecordingDefaults,
    Resolution, TaskHandle,
};
use lectern_media_core::MediaTrack;
use lectern_render_engine::canvas::Canvas;
use lectern_render_engine::{RecordingStats, RecordingTelemetry};
use lectern_session_model::{
    Codec, EngineEvent, Layout, Rect, SessionMetadata, SessionState, SourceKind,
};

use crate::encoder::{Encoder, EncoderSettings};

/// Timing and validation parameters for one session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub resolution: Resolution,
    pub fps: u32,
    pub quality: Quality,
    pub sample_rate: u32,
    pub chunk_interval: Duration,
    pub stats_interval: Duration,
    pub min_duration_secs: f64,
    pub min_artifact_bytes: u64,
}

impl SessionSettings {
    pub fn from_config(recording: &RecordingDefaults) -> Self {
        Self {
            resolution: recording.resolution,
            fps: recording.fps.max(1),
            quality: recording.quality,
            sample_rate: recording.audio_sample_rate,
            chunk_interval: recording.chunk_interval(),
            stats_interval: recording.stats_interval(),
            min_duration_secs: recording.min_duration_secs,
            min_artifact_bytes: recording.min_artifact_bytes,
        }
    }

    pub fn encoder_settings(&self, codec: Codec) -> EncoderSettings {
        EncoderSettings {
            codec,
            resolution: self.resolution,
            fps: self.fps,
            sample_rate: self.sample_rate,
            quality: self.quality,
        }
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&RecordingDefaults::default())
    }
}

/// The tracks a session encodes.
#[derive(Debug, Clone)]
pub struct SessionInput {
    pub video: MediaTrack,
    pub audio: Option<MediaTrack>,
}

/// One slice of encoder output.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: u64,
    pub bytes: Vec<u8>,
    /// Active recording time when the chunk was flushed.
    pub elapsed_secs: f64,
}

/// A finalized recording: the encoded stream plus its metadata.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub session_id: String,
    pub codec: Codec,
    pub bytes: Vec<u8>,
    pub metadata: SessionMetadata,
    pub duration_secs: f64,
    pub chunk_count: usize,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.session_id, self.codec.extension())
    }

    /// Write the encoded stream into `dir`.
    pub fn write_to(&self, dir: &Path) -> LecternResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, &self.bytes)?;
        tracing::info!(path = %path.display(), bytes = self.bytes.len(), "Artifact written");
        Ok(path)
    }
}

struct Shared {
    state: SessionState,
    encoder: Option<Box<dyn Encoder>>,
    codec: Option<Codec>,
    chunks: Vec<Chunk>,
    telemetry: RecordingTelemetry,
    clock: Option<RecordingClock>,
    metadata: SessionMetadata,
    encoder_error: Option<String>,
    /// Active duration frozen when the session left `recording`/`paused`.
    final_secs: Option<f64>,
    /// Frame size the encoder was configured for.
    frame_size: Resolution,
    /// Letterboxing buffer for input frames of another size.
    scaler: Option<Canvas>,
}

impl Shared {
    fn elapsed_secs(&self) -> f64 {
        if let Some(secs) = self.final_secs {
            return secs;
        }
        self.clock.as_ref().map(|c| c.active_secs()).unwrap_or(0.0)
    }

    fn total_bytes(&self) -> u64 {
        self.telemetry.total_bytes()
    }
}

fn transition(
    shared: &mut Shared,
    to: SessionState,
    events: &broadcast::Sender<EngineEvent>,
) -> LecternResult<()> {
    let from = shared.state;
    if !from.can_transition_to(to) {
        return Err(LecternError::invalid_state(format!(
            "cannot go from {from} to {to}"
        )));
    }
    shared.state = to;
    tracing::debug!(%from, %to, "Session state changed");
    let _ = events.send(EngineEvent::StateChanged { from, to });
    Ok(())
}

/// Move encoder output into a new chunk.
fn flush_chunk(shared: &mut Shared, events: &broadcast::Sender<EngineEvent>) -> LecternResult<()> {
    let Some(encoder) = shared.encoder.as_mut() else {
        return Ok(());
    };
    let bytes = encoder.take_output()?;
    push_chunk(shared, bytes, events);
    Ok(())
}

fn push_chunk(shared: &mut Shared, bytes: Vec<u8>, events: &broadcast::Sender<EngineEvent>) {
    if bytes.is_empty() {
        return;
    }
    let index = shared.chunks.len() as u64;
    let size = bytes.len() as u64;
    shared.telemetry.record_chunk(Instant::now(), size);
    let total_bytes = shared.total_bytes();
    shared.metadata.file_size = total_bytes;
    let elapsed_secs = shared.elapsed_secs();
    shared.chunks.push(Chunk {
        index,
        bytes,
        elapsed_secs,
    });
    let _ = events.send(EngineEvent::ChunkReady {
        index,
        bytes: size,
        total_bytes,
    });
}

const LETTERBOX: [u8; 4] = [0, 0, 0, 255];

/// Feed the encoder the current input. Frames are fitted to the
/// encoder's frame size first.
fn pump(shared: &mut Shared, input: &SessionInput) -> LecternResult<()> {
    let timestamp_ns = shared
        .clock
        .as_ref()
        .map(|c| c.active().as_nanos() as u64)
        .unwrap_or(0);
    let Some(encoder) = shared.encoder.as_mut() else {
        return Ok(());
    };
    if let Some(mut frame) = input.video.latest_frame().filter(|f| f.is_decodable()) {
        let size = shared.frame_size;
        if frame.width != size.width || frame.height != size.height {
            let scaler = shared
                .scaler
                .get_or_insert_with(|| Canvas::new(size.width, size.height));
            scaler.clear(LETTERBOX);
            scaler.draw_fit(&frame, &Rect::FULL, 1.0);
            frame = scaler.to_frame(timestamp_ns);
        }
        frame.timestamp_ns = timestamp_ns;
        encoder.encode_video(&frame)?;
    }
    if let Some(audio) = &input.audio {
        let samples = audio.drain_audio(audio.audio_available());
        encoder.encode_audio(&samples, timestamp_ns)?;
    }
    Ok(())
}

fn record_encoder_failure(shared: &mut Shared, err: &LecternError, events: &broadcast::Sender<EngineEvent>) {
    if shared.encoder_error.is_some() {
        return;
    }
    let message = err.to_string();
    tracing::error!(error = %message, "Encoder failed");
    shared.encoder_error = Some(message.clone());
    let _ = events.send(EngineEvent::Error {
        message,
        recoverable: false,
    });
}

/// One recording: encoder lifecycle, chunk accumulation, timing and
/// metadata.
pub struct RecordingSession {
    id: String,
    settings: SessionSettings,
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<EngineEvent>,
    input: Option<SessionInput>,
    timers: Vec<TaskHandle>,
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("RecordingSession")
            .field("id", &self.id)
            .field("state", &shared.state)
            .field("codec", &shared.codec)
            .field("chunks", &shared.chunks.len())
            .finish()
    }
}

impl RecordingSession {
    pub fn new(
        id: impl Into<String>,
        settings: SessionSettings,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let metadata = SessionMetadata::new(settings.resolution, settings.quality, settings.fps);
        Self {
            id: id.into(),
            shared: Arc::new(Mutex::new(Shared {
                state: SessionState::Idle,
                encoder: None,
                codec: None,
                chunks: Vec::new(),
                telemetry: RecordingTelemetry::default(),
                clock: None,
                metadata,
                encoder_error: None,
                final_secs: None,
                frame_size: settings.resolution,
                scaler: None,
            })),
            settings,
            events,
            input: None,
            timers: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn codec(&self) -> Option<Codec> {
        self.shared.lock().codec
    }

    pub fn metadata(&self) -> SessionMetadata {
        self.shared.lock().metadata.clone()
    }

    pub fn duration_secs(&self) -> f64 {
        self.shared.lock().elapsed_secs()
    }

    pub fn chunk_count(&self) -> usize {
        self.shared.lock().chunks.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.shared.lock().total_bytes()
    }

    pub fn stats(&self) -> RecordingStats {
        self.shared.lock().telemetry.stats()
    }

    /// Set once the encoder has failed; the session should then be
    /// salvaged.
    pub fn encoder_error(&self) -> Option<String> {
        self.shared.lock().encoder_error.clone()
    }

    /// `idle → initializing`.
    pub fn begin(&mut self) -> LecternResult<()> {
        let mut shared = self.shared.lock();
        transition(&mut shared, SessionState::Initializing, &self.events)
    }

    /// `initializing → recording`: start the encoder and the timers.
    pub fn start(&mut self, mut encoder: Box<dyn Encoder>, input: SessionInput) -> LecternResult<()> {
        {
            let shared = self.shared.lock();
            if shared.state != SessionState::Initializing {
                return Err(LecternError::invalid_state(format!(
                    "cannot start a session that is {}",
                    shared.state
                )));
            }
        }
        if let Err(err) = encoder.start() {
            self.fail(&err.to_string());
            return Err(err);
        }

        {
            let mut shared = self.shared.lock();
            shared.codec = Some(encoder.codec());
            shared.encoder = Some(encoder);
            shared.clock = Some(RecordingClock::start());
            transition(&mut shared, SessionState::Recording, &self.events)?;
            if let Some(clock) = &shared.clock {
                tracing::info!(
                    session = %self.id,
                    epoch_wall = %clock.epoch_wall(),
                    codec = ?shared.codec,
                    "Recording started"
                );
            }
        }
        self.input = Some(input);
        self.spawn_timers();
        Ok(())
    }

    fn spawn_timers(&mut self) {
        self.cancel_timers();
        let Some(input) = self.input.clone() else {
            return;
        };

        let shared = self.shared.clone();
        let events = self.events.clone();
        self.timers.push(spawn_periodic(
            "session-encode",
            self.settings.frame_interval(),
            move |_| {
                let mut guard = shared.lock();
                if guard.state != SessionState::Recording {
                    return ControlFlow::Continue(());
                }
                match pump(&mut guard, &input) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(err) => {
                        record_encoder_failure(&mut guard, &err, &events);
                        ControlFlow::Break(())
                    }
                }
            },
        ));

        let shared = self.shared.clone();
        let events = self.events.clone();
        self.timers.push(spawn_periodic(
            "session-chunks",
            self.settings.chunk_interval,
            move |_| {
                let mut guard = shared.lock();
                if guard.encoder_error.is_some() {
                    return ControlFlow::Break(());
                }
                match flush_chunk(&mut guard, &events) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(err) => {
                        record_encoder_failure(&mut guard, &err, &events);
                        ControlFlow::Break(())
                    }
                }
            },
        ));

        let shared = self.shared.clone();
        let id = self.id.clone();
        self.timers.push(spawn_periodic(
            "session-stats",
            self.settings.stats_interval,
            move |_| {
                let guard = shared.lock();
                let stats = guard.telemetry.stats();
                tracing::info!(
                    session = %id,
                    chunks = stats.chunks,
                    file_size = stats.file_size,
                    bitrate_bps = stats.bitrate_bps as u64,
                    duration_secs = guard.elapsed_secs(),
                    "Recording stats"
                );
                ControlFlow::Continue(())
            },
        ));
    }

    fn cancel_timers(&mut self) {
        for mut timer in self.timers.drain(..) {
            timer.cancel();
        }
    }

    /// `recording → paused`. Pending output is flushed first and the
    /// timers are suspended.
    pub fn pause(&mut self) -> LecternResult<()> {
        let mut shared = self.shared.lock();
        if shared.state != SessionState::Recording {
            return Err(LecternError::invalid_state(format!(
                "cannot pause a session that is {}",
                shared.state
            )));
        }
        if let Err(err) = flush_chunk(&mut shared, &self.events) {
            record_encoder_failure(&mut shared, &err, &self.events);
            return Err(err);
        }
        if let Some(encoder) = shared.encoder.as_mut() {
            encoder.pause()?;
        }
        if let Some(clock) = shared.clock.as_mut() {
            clock.pause();
        }
        transition(&mut shared, SessionState::Paused, &self.events)?;
        drop(shared);
        self.cancel_timers();
        tracing::info!(session = %self.id, "Recording paused");
        Ok(())
    }

    /// `paused → recording`.
    pub fn resume(&mut self) -> LecternResult<()> {
        {
            let mut shared = self.shared.lock();
            if shared.state != SessionState::Paused {
                return Err(LecternError::invalid_state(format!(
                    "cannot resume a session that is {}",
                    shared.state
                )));
            }
            if let Some(encoder) = shared.encoder.as_mut() {
                encoder.resume()?;
            }
            if let Some(clock) = shared.clock.as_mut() {
                clock.resume();
            }
            transition(&mut shared, SessionState::Recording, &self.events)?;
        }
        // Audio buffered while paused must not leak into the recording.
        if let Some(audio) = self.input.as_ref().and_then(|i| i.audio.as_ref()) {
            let skipped = audio.drain_audio(audio.audio_available()).len();
            tracing::debug!(session = %self.id, skipped, "Discarded audio captured while paused");
        }
        self.spawn_timers();
        tracing::info!(session = %self.id, "Recording resumed");
        Ok(())
    }

    /// Mark a slide change at the current active recording time.
    pub fn record_slide(&mut self, index: u32) -> LecternResult<f64> {
        let mut shared = self.shared.lock();
        if !shared.state.is_active() {
            return Err(LecternError::invalid_state(
                "slide changes can only be recorded during a recording",
            ));
        }
        let at = shared.elapsed_secs();
        shared.metadata.slide_timestamps.insert(index, at);
        tracing::debug!(session = %self.id, index, at, "Slide change recorded");
        Ok(at)
    }

    pub fn set_layout(&self, layout: Option<Layout>) {
        self.shared.lock().metadata.layout = layout;
    }

    pub fn set_active_sources(&self, sources: impl IntoIterator<Item = SourceKind>) {
        self.shared.lock().metadata.set_active_sources(sources);
    }

    /// Flush the encoder and finalize.
    pub fn stop(&mut self) -> LecternResult<Artifact> {
        self.finish(true)
    }

    /// Finalize with whatever was already captured, without asking the
    /// encoder for more. Used after an encoder failure.
    pub fn salvage(&mut self) -> LecternResult<Artifact> {
        self.finish(false)
    }

    fn finish(&mut self, flush_encoder: bool) -> LecternResult<Artifact> {
        self.cancel_timers();
        let mut shared = self.shared.lock();
        if !shared.state.is_active() {
            return Err(LecternError::invalid_state(format!(
                "cannot stop a session that is {}",
                shared.state
            )));
        }
        let duration_secs = shared.elapsed_secs();
        shared.final_secs = Some(duration_secs);
        transition(&mut shared, SessionState::Stopping, &self.events)?;

        if flush_encoder && shared.encoder_error.is_none() {
            let tail = match &self.input {
                Some(input) => pump(&mut shared, input),
                None => Ok(()),
            };
            let tail = tail.and_then(|()| match shared.encoder.as_mut() {
                Some(encoder) => encoder.finish(),
                None => Ok(Vec::new()),
            });
            match tail {
                Ok(bytes) => push_chunk(&mut shared, bytes, &self.events),
                Err(err) => {
                    tracing::warn!(error = %err, "Encoder flush failed; keeping captured chunks");
                    record_encoder_failure(&mut shared, &err, &self.events);
                }
            }
        } else if let Some(encoder) = shared.encoder.as_mut() {
            if let Ok(bytes) = encoder.take_output() {
                push_chunk(&mut shared, bytes, &self.events);
            }
        }
        let video_frames = shared
            .encoder
            .as_ref()
            .map(|e| e.stats().frames_encoded)
            .unwrap_or(0);
        shared.encoder = None;
        self.input = None;

        let total = shared.total_bytes();
        let validation = if duration_secs < self.settings.min_duration_secs {
            Err(LecternError::RecordingTooShort {
                duration_secs,
                min_secs: self.settings.min_duration_secs,
            })
        } else if video_frames == 0 || total < self.settings.min_artifact_bytes {
            Err(LecternError::RecordingTooSmall {
                bytes: total,
                min_bytes: self.settings.min_artifact_bytes,
                video_frames,
            })
        } else {
            Ok(())
        };
        if let Err(err) = validation {
            tracing::warn!(session = %self.id, error = %err, "Recording rejected at finalize");
            transition(&mut shared, SessionState::Failed, &self.events)?;
            return Err(err);
        }

        let mut bytes = Vec::with_capacity(total as usize);
        for chunk in &shared.chunks {
            bytes.extend_from_slice(&chunk.bytes);
        }
        shared.metadata.file_size = bytes.len() as u64;
        let codec = shared.codec.unwrap_or(Codec::UNIVERSAL);
        let artifact = Artifact {
            session_id: self.id.clone(),
            codec,
            bytes,
            metadata: shared.metadata.clone(),
            duration_secs,
            chunk_count: shared.chunks.len(),
        };
        transition(&mut shared, SessionState::Finalized, &self.events)?;
        tracing::info!(
            session = %self.id,
            bytes = artifact.bytes.len(),
            chunks = artifact.chunk_count,
            duration_secs,
            "Recording finalized"
        );
        let _ = self.events.send(EngineEvent::RecordingFinalized {
            session_id: self.id.clone(),
            bytes: artifact.bytes.len() as u64,
            duration_secs,
        });
        Ok(artifact)
    }

    /// Move to `failed` from any non-terminal state and drop the encoder.
    pub fn fail(&mut self, reason: &str) {
        self.cancel_timers();
        let mut shared = self.shared.lock();
        if shared.state.is_terminal() {
            return;
        }
        tracing::error!(session = %self.id, reason, "Recording session failed");
        shared.final_secs = Some(shared.elapsed_secs());
        shared.encoder = None;
        let _ = transition(&mut shared, SessionState::Failed, &self.events);
        self.input = None;
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}
