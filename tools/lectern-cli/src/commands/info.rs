//! Show saved session information.

use lectern_common::EngineConfig;
use lectern_session_model::SessionStore;

pub fn run(config: &EngineConfig, id: Option<String>) -> anyhow::Result<()> {
    let store = SessionStore::new(&config.sessions_dir);

    let Some(id) = id else {
        let ids = store.list()?;
        if ids.is_empty() {
            println!("No saved sessions in {}", store.root().display());
        }
        for id in ids {
            println!("{id}");
        }
        return Ok(());
    };

    let session = store
        .load(&id)
        .map_err(|e| anyhow::anyhow!("Failed to load session: {e}"))?;
    let meta = &session.metadata;

    println!("Session: {}", session.id);
    println!("  Saved: {}", session.saved_at);
    println!("  Duration: {:.2}s", session.duration_secs);
    if let Some(codec) = session.codec {
        println!("  Codec: {}", codec.mime_type());
    }
    println!();

    println!("Recording:");
    println!(
        "  Resolution: {} @ {}fps ({:?})",
        meta.resolution, meta.frame_rate, meta.quality
    );
    println!("  File size: {} bytes", meta.file_size);
    match meta.layout {
        Some(layout) => println!("  Layout: {layout}"),
        None => println!("  Layout: none"),
    }
    let sources: Vec<&str> = meta.active_sources.iter().map(|k| k.as_str()).collect();
    println!("  Sources: {}", sources.join(", "));
    println!();

    println!("Slides:");
    if meta.slide_timestamps.is_empty() {
        println!("  none");
    }
    for (index, secs) in &meta.slide_timestamps {
        println!("  #{index} at {secs:.2}s");
    }

    Ok(())
}
