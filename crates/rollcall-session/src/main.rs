use anyhow::{Context, Result};
use clap::Parser;
use rollcall_core::{FaceDetector, FaceRecognizer, Gallery};
use rollcall_hw::{Camera, FrameSource};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod render;
mod session;

use config::Config;
use render::{LogSink, Sinks, SnapshotSink};
use session::{Session, SessionSettings, SessionSummary};

#[derive(Parser)]
#[command(name = "rollcall-session", about = "Take attendance from a live webcam feed", version)]
struct Args {
    /// TOML file overriding ROLLCALL_* environment settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write the attendance JSON
    #[arg(long)]
    output: Option<PathBuf>,

    /// Reference image directory (one `<id>_<name>` folder per student)
    #[arg(long)]
    gallery: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(output) = args.output {
        config.output = output;
    }
    if let Some(gallery) = args.gallery {
        config.gallery_dir = gallery;
    }

    tracing::info!("rollcall-session starting");

    let quit = Arc::new(AtomicBool::new(false));
    let signal_quit = Arc::clone(&quit);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping session");
            signal_quit.store(true, Ordering::Relaxed);
        }
    });

    let summary = tokio::task::spawn_blocking(move || run_session(&config, &quit))
        .await
        .context("session worker panicked")??;

    // The sheet goes to stdout even when the export file could not be written.
    println!("{}", serde_json::to_string_pretty(&summary.attendance)?);
    summary.export.context("writing attendance export")?;
    Ok(())
}

/// Load models and gallery, open the camera, and run the loop to completion.
fn run_session(config: &Config, quit: &AtomicBool) -> Result<SessionSummary> {
    let detector_path = config.detector_model_path();
    let mut detector = FaceDetector::load(&detector_path)?;
    tracing::info!(path = %detector_path, "SCRFD detector loaded");

    let recognizer_path = config.recognizer_model_path();
    let mut recognizer = FaceRecognizer::load(&recognizer_path)?;
    tracing::info!(path = %recognizer_path, "ArcFace recognizer loaded");

    let gallery = Gallery::load(&config.gallery_dir, &mut detector, &mut recognizer)?;
    if gallery.is_empty() {
        tracing::warn!(
            dir = %config.gallery_dir.display(),
            "gallery is empty, every face will be unknown"
        );
    }

    let camera = Camera::open(&config.camera_device)?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );
    let mut stream = camera.stream()?;

    if config.warmup_frames > 0 {
        tracing::info!(count = config.warmup_frames, "discarding warmup frames");
        for _ in 0..config.warmup_frames {
            let _ = stream.next_frame();
        }
    }

    let mut sinks = Sinks::default();
    sinks.push(LogSink);
    if let Some(path) = &config.snapshot_path {
        tracing::info!(path = %path.display(), "writing annotated snapshots");
        sinks.push(SnapshotSink::new(path.clone())?);
    }

    let mut session = Session::new(
        gallery,
        SessionSettings {
            threshold: config.match_threshold,
            display_time: config.display_time(),
            output: config.output.clone(),
            max_duration: config.max_duration(),
        },
    );

    let summary = session.run(&mut stream, &mut detector, &mut recognizer, &mut sinks, quit);
    tracing::info!(reason = ?summary.reason, frames = summary.frames, "rollcall-session stopped");
    Ok(summary)
}
