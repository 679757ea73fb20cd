//! Lectern CLI: drive the recording engine from the command line.
//!
//! Usage:
//!   lectern check              Show what this build can composite and encode
//!   lectern record [OPTIONS]   Record from synthetic devices
//!   lectern info [ID]          Show a saved session, or list them

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use lectern_common::EngineConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "lectern",
    about = "Live multi-source lecture recording",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the standard location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check capabilities and codec selection
    Check,

    /// Record from synthetic devices
    Record {
        /// Capture the camera
        #[arg(long)]
        camera: bool,

        /// Capture the screen from the start
        #[arg(long)]
        screen: bool,

        /// Capture the microphone
        #[arg(long)]
        mic: bool,

        /// Recording length in seconds
        #[arg(short, long, default_value = "5.0")]
        duration: f64,

        /// Initial layout (picture-in-picture, side-by-side, presentation,
        /// screen-only, camera-only, pip, sbs)
        #[arg(short, long)]
        layout: Option<String>,

        /// Add the screen this many seconds into the recording
        #[arg(long)]
        add_screen_at: Option<f64>,

        /// Simulate the screen share being revoked at this time
        #[arg(long)]
        lose_screen_at: Option<f64>,

        /// Mark a slide change every N seconds
        #[arg(long)]
        slide_every: Option<f64>,

        /// Output frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Output directory for the artifact
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Show a saved session
    Info {
        /// Session id; lists saved sessions when omitted
        id: Option<String>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display())),
        None => Ok(EngineConfig::load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    lectern_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Check => commands::check::run(),
        Commands::Record {
            camera,
            screen,
            mic,
            duration,
            layout,
            add_screen_at,
            lose_screen_at,
            slide_every,
            fps,
            out,
        } => {
            if let Some(fps) = fps {
                config.recording.fps = fps;
            }
            let plan = commands::record::RecordPlan {
                camera,
                screen,
                mic,
                duration_secs: duration,
                layout,
                add_screen_at,
                lose_screen_at,
                slide_every,
                out,
            };
            commands::record::run(config, plan).await
        }
        Commands::Info { id } => commands::info::run(&config, id),
    }
}
