//! Record from synthetic devices.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;

use lectern_capture_engine::{RecordingEngine, SyntheticConfig, SyntheticDevices};
use lectern_common::EngineConfig;
use lectern_session_model::{EngineEvent, SourceKind};

/// What to capture and which mid-recording changes to script.
#[derive(Debug, Clone)]
pub struct RecordPlan {
    pub camera: bool,
    pub screen: bool,
    pub mic: bool,
    pub duration_secs: f64,
    pub layout: Option<String>,
    pub add_screen_at: Option<f64>,
    pub lose_screen_at: Option<f64>,
    pub slide_every: Option<f64>,
    pub out: PathBuf,
}

pub async fn run(config: EngineConfig, plan: RecordPlan) -> anyhow::Result<()> {
    if !plan.camera && !plan.screen && plan.add_screen_at.is_none() {
        anyhow::bail!("nothing to record: pass --camera and/or --screen");
    }
    tracing::debug!(?plan, "Record plan");

    let devices = SyntheticDevices::with_config(SyntheticConfig {
        fps: config.recording.fps,
        ..SyntheticConfig::default()
    });
    let engine = RecordingEngine::new(config, Arc::new(devices.clone()));

    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::SourceAdded { kind } => println!("  + {kind}"),
                EngineEvent::SourceRemoved { kind } => println!("  - {kind}"),
                EngineEvent::SourceLost { kind } => println!("  ! {kind} lost"),
                EngineEvent::LayoutApplied { layout, smooth } => {
                    println!("  layout -> {layout}{}", if smooth { " (smooth)" } else { "" })
                }
                EngineEvent::Warning { message } => println!("  [WARN] {message}"),
                EngineEvent::Error { message, recoverable } => {
                    let tag = if recoverable { "ERROR" } else { "FATAL" };
                    println!("  [{tag}] {message}");
                }
                _ => {}
            }
        }
    });

    let initial = [
        (plan.camera, SourceKind::Camera),
        (plan.screen && plan.add_screen_at.is_none(), SourceKind::Screen),
        (plan.mic, SourceKind::Microphone),
    ];
    for (wanted, kind) in initial {
        if wanted {
            engine
                .add_source(kind)
                .await
                .with_context(|| format!("Failed to add {kind}"))?;
        }
    }
    if let Some(layout) = &plan.layout {
        engine.set_layout_by_name(layout)?;
    }

    let id = engine.start_recording()?;
    println!("Recording {id} for {:.1}s (Ctrl+C to stop early)", plan.duration_secs);

    let started = Instant::now();
    let mut screen_added = plan.add_screen_at.is_none();
    let mut screen_lost = plan.lose_screen_at.is_none();
    let mut next_slide = 0u32;
    let mut ticker = tokio::time::interval(Duration::from_millis(50));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c => {
                println!();
                break;
            }
        }
        if !engine.state().is_active() {
            break;
        }
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed >= plan.duration_secs {
            break;
        }
        if !screen_added && plan.add_screen_at.is_some_and(|at| elapsed >= at) {
            screen_added = true;
            if let Err(err) = engine.add_source(SourceKind::Screen).await {
                println!("  [WARN] could not add screen: {err}");
            }
        }
        if !screen_lost && plan.lose_screen_at.is_some_and(|at| elapsed >= at) {
            screen_lost = true;
            devices.end_track(SourceKind::Screen);
        }
        if let Some(every) = plan.slide_every.filter(|s| *s > 0.0) {
            if elapsed >= every * next_slide as f64 {
                engine.record_slide_change(next_slide)?;
                next_slide += 1;
            }
        }
    }

    let artifact = if engine.state().is_active() {
        engine.stop_recording()?
    } else {
        engine
            .take_artifact()
            .context("Recording ended without producing an artifact")?
    };

    let path = artifact.write_to(&plan.out)?;
    let saved = engine.save_session(&id)?;
    let metrics = engine.get_performance_metrics();
    engine.shutdown();
    printer.abort();

    println!();
    println!("Artifact: {}", path.display());
    println!("  Codec: {}", artifact.codec.mime_type());
    println!("  Duration: {:.2}s", artifact.duration_secs);
    println!(
        "  Size: {} bytes in {} chunks",
        artifact.bytes.len(),
        artifact.chunk_count
    );
    println!(
        "  Render: {:.1} fps, {} dropped, healthy: {}",
        metrics.fps, metrics.dropped_frames, metrics.healthy
    );
    println!("Metadata: {}", saved.display());
    println!("{}", serde_json::to_string_pretty(&artifact.metadata)?);

    Ok(())
}
