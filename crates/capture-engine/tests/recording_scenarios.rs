use std::sync::Arc;
use std::time::Duration;

use lectern_capture_engine::{
    inspect_lrv, CapabilityNegotiator, DefaultEncoderFactory, Encoder, EncoderFactory,
    EncoderSettings, EncoderStats, FramedEncoder, RecordingEngine, StaticProbe, SyntheticConfig,
    SyntheticDevices,
};
use lectern_common::{CancellationToken, EngineConfig, LecternError, LecternResult, Resolution};
use lectern_media_core::VideoFrame;
use lectern_session_model::{Codec, EngineEvent, Layout, SessionState, SourceKind};

fn config(name: &str) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.sessions_dir = std::env::temp_dir().join(name);
    config.recording.resolution = Resolution::new(64, 36);
    config.recording.fps = 20;
    config.recording.chunk_interval_ms = 100;
    config.recording.stats_interval_ms = 500;
    config.recording.min_artifact_bytes = 64;
    config.compositor.transition_ms = 40;
    config.compositor.source_ready_timeout_ms = 300;
    config
}

fn devices() -> SyntheticDevices {
    SyntheticDevices::with_config(SyntheticConfig {
        width: 32,
        height: 18,
        fps: 20,
        sample_rate: 8000,
        ..SyntheticConfig::default()
    })
}

fn engine_with_factory(
    name: &str,
    devices: &SyntheticDevices,
    factory: Arc<dyn EncoderFactory>,
) -> RecordingEngine {
    RecordingEngine::with_components(
        config(name),
        Arc::new(devices.clone()),
        CapabilityNegotiator::default(),
        factory,
    )
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn camera_then_screen_then_back_never_restarts_the_encoder() {
    let devices = devices();
    let factory = Arc::new(DefaultEncoderFactory::new());
    let engine = engine_with_factory("lectern_test_scenario_no_restart", &devices, factory.clone());

    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.start_recording().unwrap();
    assert_eq!(engine.layout(), Some(Layout::CameraOnly));
    assert_eq!(factory.instances_created(), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    engine.add_source(SourceKind::Screen).await.unwrap();
    assert_eq!(engine.layout(), Some(Layout::PictureInPicture));
    assert_eq!(engine.state(), SessionState::Recording);
    assert_eq!(factory.instances_created(), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(engine.remove_source(SourceKind::Screen));
    assert_eq!(engine.layout(), Some(Layout::CameraOnly));
    assert_eq!(engine.state(), SessionState::Recording);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let metrics = engine.get_performance_metrics();
    assert!(metrics.fps > 0.0, "{metrics:?}");
    assert!(metrics.healthy, "{metrics:?}");
    assert!(metrics.memory_estimate_bytes >= 64 * 36 * 4, "{metrics:?}");

    let artifact = engine.stop_recording().unwrap();
    assert_eq!(factory.instances_created(), 1);
    assert_eq!(engine.state(), SessionState::Finalized);
    assert_eq!(artifact.metadata.layout, Some(Layout::CameraOnly));
    assert_eq!(artifact.metadata.active_sources, vec![SourceKind::Camera]);

    let stats = engine.recording_stats().unwrap();
    assert_eq!(stats.file_size, artifact.bytes.len() as u64);
    assert_eq!(artifact.metadata.file_size, artifact.bytes.len() as u64);

    let summary = inspect_lrv(&artifact.bytes).unwrap();
    assert_eq!((summary.width, summary.height), (64, 36));
    assert!(summary.video_frames > 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn screen_loss_keeps_recording_in_camera_only() {
    let devices = devices();
    let engine = RecordingEngine::new(
        config("lectern_test_scenario_screen_loss"),
        Arc::new(devices.clone()),
    );
    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.add_source(SourceKind::Screen).await.unwrap();
    let mut events = engine.subscribe();
    engine.start_recording().unwrap();
    assert_eq!(engine.layout(), Some(Layout::PictureInPicture));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(devices.end_track(SourceKind::Screen));
    eventually("screen to be dropped", || {
        engine.active_sources() == vec![SourceKind::Camera]
    })
    .await;

    assert_eq!(engine.layout(), Some(Layout::CameraOnly));
    assert_eq!(engine.state(), SessionState::Recording);
    assert_eq!(
        engine.transient_message().as_deref(),
        Some("Screen sharing stopped")
    );
    assert!(engine.last_error().is_none());

    let seen = drain(&mut events);
    assert!(seen.contains(&EngineEvent::SourceLost {
        kind: SourceKind::Screen
    }));
    assert!(seen
        .iter()
        .any(|e| matches!(e, EngineEvent::Warning { message } if message == "Screen sharing stopped")));
    assert!(!seen.iter().any(|e| matches!(
        e,
        EngineEvent::StateChanged {
            to: SessionState::Failed,
            ..
        }
    )));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let artifact = engine.stop_recording().unwrap();
    assert_eq!(artifact.metadata.layout, Some(Layout::CameraOnly));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn losing_the_last_source_finalizes_what_was_captured() {
    let devices = devices();
    let engine = RecordingEngine::new(
        config("lectern_test_scenario_last_loss"),
        Arc::new(devices.clone()),
    );
    engine.add_source(SourceKind::Camera).await.unwrap();
    let mut events = engine.subscribe();
    engine.start_recording().unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;
    devices.end_track(SourceKind::Camera);
    eventually("forced stop", || engine.state() == SessionState::Finalized).await;

    let artifact = engine.take_artifact().expect("forced stop keeps the artifact");
    assert!(artifact.duration_secs >= 0.5);
    assert!(inspect_lrv(&artifact.bytes).unwrap().video_frames > 0);
    assert!(engine.take_artifact().is_none());
    assert!(!engine.compositor().is_running());

    let seen = drain(&mut events);
    assert!(seen.iter().any(|e| matches!(
        e,
        EngineEvent::Error {
            recoverable: true,
            ..
        }
    )));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removing_the_last_video_source_forces_stop() {
    let devices = devices();
    let engine = RecordingEngine::new(
        config("lectern_test_scenario_last_removal"),
        Arc::new(devices.clone()),
    );
    engine.add_source(SourceKind::Screen).await.unwrap();
    engine.add_source(SourceKind::Microphone).await.unwrap();
    engine.start_recording().unwrap();
    assert_eq!(engine.layout(), Some(Layout::ScreenOnly));

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(engine.remove_source(SourceKind::Screen));
    assert_eq!(engine.state(), SessionState::Finalized);
    assert!(engine.take_artifact().is_some());
    // Released for real now that the recording is over.
    assert!(!devices.is_open(SourceKind::Screen));
    assert!(devices.is_open(SourceKind::Microphone));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removal_during_recording_defers_device_stop() {
    let devices = devices();
    let engine = RecordingEngine::new(
        config("lectern_test_scenario_deferred"),
        Arc::new(devices.clone()),
    );
    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.add_source(SourceKind::Screen).await.unwrap();
    engine.start_recording().unwrap();

    assert!(engine.remove_source(SourceKind::Screen));
    assert!(devices.is_open(SourceKind::Screen));

    tokio::time::sleep(Duration::from_millis(600)).await;
    engine.stop_recording().unwrap();
    assert!(!devices.is_open(SourceKind::Screen));
    assert!(devices.is_open(SourceKind::Camera));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_specialised_codecs_fall_back_to_universal() {
    let devices = devices();
    let negotiator = CapabilityNegotiator::new(vec![Box::new(StaticProbe::new(Vec::<Codec>::new()))]);
    let engine = RecordingEngine::with_components(
        config("lectern_test_scenario_codec"),
        Arc::new(devices.clone()),
        negotiator,
        Arc::new(DefaultEncoderFactory::new()),
    );
    let mut events = engine.subscribe();
    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.start_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    let artifact = engine.stop_recording().unwrap();

    assert_eq!(artifact.codec, Codec::UNIVERSAL);
    assert!(artifact.file_name().ends_with(".lrv"));
    let warnings: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Warning { message } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(warnings.len(), 1, "{warnings:?}");

    // A second recording surfaces nothing new.
    engine.start_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    engine.stop_recording().unwrap();
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, EngineEvent::Warning { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn too_short_recording_fails_and_can_be_retried() {
    let devices = devices();
    let engine = RecordingEngine::new(
        config("lectern_test_scenario_short"),
        Arc::new(devices.clone()),
    );
    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.start_recording().unwrap();
    let err = engine.stop_recording().unwrap_err();
    assert!(matches!(err, LecternError::RecordingTooShort { .. }));
    assert_eq!(engine.state(), SessionState::Failed);
    assert!(engine.last_error().is_some());

    engine.reset();
    assert!(engine.last_error().is_none());
    assert_eq!(engine.state(), SessionState::Idle);

    engine.start_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(engine.stop_recording().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_time_is_excluded_from_duration() {
    let devices = devices();
    let engine = RecordingEngine::new(
        config("lectern_test_scenario_pause"),
        Arc::new(devices.clone()),
    );
    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.start_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    engine.pause().unwrap();
    assert_eq!(engine.state(), SessionState::Paused);
    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.resume().unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;

    let artifact = engine.stop_recording().unwrap();
    assert!(artifact.duration_secs >= 0.6, "{}", artifact.duration_secs);
    assert!(artifact.duration_secs < 1.1, "{}", artifact.duration_secs);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disposing_the_compositor_leaves_sources_live() {
    let devices = devices();
    let engine = RecordingEngine::new(
        config("lectern_test_scenario_dispose"),
        Arc::new(devices.clone()),
    );
    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.compositor().start().unwrap();
    engine.compositor().dispose();

    let camera = engine.registry().get(SourceKind::Camera).unwrap();
    assert!(camera.is_live());
    assert!(devices.is_open(SourceKind::Camera));
    assert_eq!(devices.stop_count(SourceKind::Camera), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recording_after_shutdown_still_has_video() {
    let devices = devices();
    let engine = RecordingEngine::new(
        config("lectern_test_scenario_after_shutdown"),
        Arc::new(devices.clone()),
    );
    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.start_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    engine.stop_recording().unwrap();
    engine.shutdown();

    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.start_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    let artifact = engine.stop_recording().unwrap();
    let summary = inspect_lrv(&artifact.bytes).unwrap();
    assert_eq!((summary.width, summary.height), (64, 36));
    assert!(summary.video_frames > 5, "{summary:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fixed_rate_microphone_is_resampled_into_the_mix() {
    let devices = devices();
    devices.update_config(|c| c.fixed_sample_rate = true);
    let engine = RecordingEngine::new(
        config("lectern_test_scenario_resample"),
        Arc::new(devices.clone()),
    );
    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.add_source(SourceKind::Microphone).await.unwrap();
    let mic = engine.registry().get(SourceKind::Microphone).unwrap();
    assert_eq!(mic.live_audio_track().map(|t| t.sample_rate()), Some(8000));

    engine.start_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let artifact = engine.stop_recording().unwrap();

    let summary = inspect_lrv(&artifact.bytes).unwrap();
    assert_eq!(summary.sample_rate, 48000);
    assert!(summary.audio_secs() > 1.0, "{summary:?}");
    let silent = summary.silent_samples as f64 / summary.audio_samples as f64;
    assert!(silent < 0.25, "{silent:.2} of the mix is silence");
}

#[tokio::test]
async fn devices_are_asked_for_the_configured_sample_rate() {
    let devices = devices();
    let engine = RecordingEngine::new(
        config("lectern_test_scenario_rate_request"),
        Arc::new(devices.clone()),
    );
    engine.add_source(SourceKind::Microphone).await.unwrap();
    let mic = engine.registry().get(SourceKind::Microphone).unwrap();
    assert_eq!(
        mic.live_audio_track().map(|t| t.sample_rate()),
        Some(engine.config().recording.audio_sample_rate)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slide_markers_survive_save_and_load() {
    let devices = devices();
    let name = "lectern_test_scenario_persist";
    let _ = std::fs::remove_dir_all(std::env::temp_dir().join(name));
    let engine = RecordingEngine::new(config(name), Arc::new(devices.clone()));
    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.add_source(SourceKind::Screen).await.unwrap();
    let id = engine.start_recording().unwrap();

    let first = engine.record_slide_change(0).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let second = engine.record_slide_change(1).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let artifact = engine.stop_recording().unwrap();
    assert!(second > first);

    engine.save_session(&id).unwrap();
    let loaded = engine.load_session(&id).unwrap();
    let saved: Vec<(u32, f64)> = artifact.metadata.slide_timestamps.clone().into_iter().collect();
    let restored: Vec<(u32, f64)> = loaded.metadata.slide_timestamps.clone().into_iter().collect();
    assert_eq!(saved.len(), restored.len());
    for ((i, a), (j, b)) in saved.iter().zip(&restored) {
        assert_eq!(i, j);
        assert!((a - b).abs() < 1e-9);
    }
    assert_eq!(loaded.metadata.layout, Some(Layout::PictureInPicture));
    assert_eq!(loaded.metadata.resolution, Resolution::new(64, 36));
    assert_eq!(loaded.metadata.quality, artifact.metadata.quality);
    assert_eq!(loaded.codec, Some(artifact.codec));

    std::fs::remove_dir_all(engine.session_store().root()).ok();
}

#[tokio::test]
async fn denied_permission_surfaces_immediately() {
    let devices = devices();
    devices.deny(SourceKind::Camera);
    let engine = RecordingEngine::new(
        config("lectern_test_scenario_denied"),
        Arc::new(devices.clone()),
    );
    let err = engine.add_source(SourceKind::Camera).await.unwrap_err();
    assert!(matches!(err, LecternError::PermissionDenied { .. }));
    assert!(err.is_recoverable());
    assert!(engine.active_sources().is_empty());
}

#[tokio::test]
async fn screen_without_audio_is_retried_video_only() {
    let devices = devices();
    devices.update_config(|c| c.refuse_screen_audio = true);
    let engine = RecordingEngine::new(
        config("lectern_test_scenario_screen_audio"),
        Arc::new(devices.clone()),
    );
    engine.add_source(SourceKind::Screen).await.unwrap();
    let screen = engine.registry().get(SourceKind::Screen).unwrap();
    assert_eq!(screen.video_track_count(), 1);
    assert_eq!(screen.audio_track_count(), 0);
}

#[tokio::test]
async fn slow_acquisition_can_be_cancelled() {
    let devices = devices();
    devices.update_config(|c| c.open_delay = Duration::from_secs(5));
    let engine = RecordingEngine::new(
        config("lectern_test_scenario_cancel"),
        Arc::new(devices.clone()),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let err = engine
        .add_source_with_cancel(SourceKind::Screen, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, LecternError::Cancelled));
    assert!(engine.active_sources().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn without_compositing_one_source_is_recorded_directly() {
    let devices = devices();
    let negotiator = CapabilityNegotiator::new(vec![Box::new(
        StaticProbe::new([Codec::Lrv]).without_compositing(),
    )]);
    let engine = RecordingEngine::with_components(
        config("lectern_test_scenario_passthrough"),
        Arc::new(devices.clone()),
        negotiator,
        Arc::new(DefaultEncoderFactory::new()),
    );
    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.start_recording().unwrap();
    assert!(!engine.compositor().is_running());
    assert_eq!(engine.layout(), Some(Layout::CameraOnly));

    let err = engine.add_source(SourceKind::Screen).await.unwrap_err();
    assert!(matches!(err, LecternError::UnsupportedPlatform { .. }));

    tokio::time::sleep(Duration::from_millis(600)).await;
    let artifact = engine.stop_recording().unwrap();
    let summary = inspect_lrv(&artifact.bytes).unwrap();
    assert!(summary.video_frames > 0);
}

/// Wraps the built-in encoder and fails after a fixed number of frames.
struct FlakyEncoder {
    inner: FramedEncoder,
    frames_left: usize,
}

impl Encoder for FlakyEncoder {
    fn codec(&self) -> Codec {
        self.inner.codec()
    }

    fn start(&mut self) -> LecternResult<()> {
        self.inner.start()
    }

    fn encode_video(&mut self, frame: &VideoFrame) -> LecternResult<()> {
        if self.frames_left == 0 {
            return Err(LecternError::encoder("simulated muxer crash"));
        }
        self.frames_left -= 1;
        self.inner.encode_video(frame)
    }

    fn encode_audio(&mut self, samples: &[f32], timestamp_ns: u64) -> LecternResult<()> {
        self.inner.encode_audio(samples, timestamp_ns)
    }

    fn pause(&mut self) -> LecternResult<()> {
        self.inner.pause()
    }

    fn resume(&mut self) -> LecternResult<()> {
        self.inner.resume()
    }

    fn take_output(&mut self) -> LecternResult<Vec<u8>> {
        self.inner.take_output()
    }

    fn finish(&mut self) -> LecternResult<Vec<u8>> {
        self.inner.finish()
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    fn stats(&self) -> EncoderStats {
        self.inner.stats()
    }
}

struct FlakyFactory {
    frames: usize,
}

impl EncoderFactory for FlakyFactory {
    fn create(&self, settings: &EncoderSettings) -> LecternResult<Box<dyn Encoder>> {
        Ok(Box::new(FlakyEncoder {
            inner: FramedEncoder::new(settings.clone()),
            frames_left: self.frames,
        }))
    }

    fn instances_created(&self) -> u64 {
        0
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn encoder_failure_salvages_captured_chunks() {
    let devices = devices();
    let engine = engine_with_factory(
        "lectern_test_scenario_salvage",
        &devices,
        Arc::new(FlakyFactory { frames: 16 }),
    );
    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.start_recording().unwrap();

    eventually("salvage", || engine.state() == SessionState::Finalized).await;
    let artifact = engine.take_artifact().expect("salvaged artifact");
    assert!(inspect_lrv(&artifact.bytes).unwrap().video_frames <= 16);
    assert!(engine
        .last_error()
        .is_some_and(|e| e.contains("simulated muxer crash")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn early_encoder_failure_fails_the_session() {
    let devices = devices();
    let engine = engine_with_factory(
        "lectern_test_scenario_early_failure",
        &devices,
        Arc::new(FlakyFactory { frames: 1 }),
    );
    engine.add_source(SourceKind::Camera).await.unwrap();
    engine.start_recording().unwrap();

    eventually("failure", || engine.state() == SessionState::Failed).await;
    assert!(engine.take_artifact().is_none());
    assert!(engine.last_error().is_some());
}
