//! Lookout: real-time object detection on a camera or a video file

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lookout::capture::{DefaultSourceFactory, SourceSpec};
use lookout::display::{DefaultSinkFactory, OverlayRenderer};
use lookout::error::PipelineError;
use lookout::pipeline::{NullDetector, PipelineController, RunSummary, StopHandle};
use lookout::{PipelineConfig, Settings};

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time object detection on a camera or video file", long_about = None)]
struct Args {
    /// Video file to process. Uses the camera when omitted.
    #[arg(short, long)]
    video: Option<PathBuf>,

    /// Settings file (defaults to ./lookout.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Record the annotated stream (always on for video files)
    #[arg(long, conflicts_with = "no_record")]
    record: bool,

    /// Never record, not even for video files
    #[arg(long)]
    no_record: bool,

    /// Frames skipped between inference runs
    #[arg(long)]
    frame_skip: Option<u32>,

    /// Detection confidence threshold, 0 to 1
    #[arg(long)]
    conf: Option<f32>,

    /// Display scale factor, (0, 1]
    #[arg(long)]
    scale: Option<f64>,

    /// Run without a window
    #[arg(long)]
    headless: bool,

    /// Camera index
    #[arg(long)]
    device: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lookout=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let args = Args::parse();
    info!("Lookout launching...");

    let mut settings = Settings::load(args.config.as_deref())?;
    apply_overrides(&mut settings, &args);

    let source = match &args.video {
        Some(path) => SourceSpec::File(path.clone()),
        None => SourceSpec::Camera(settings.capture.device),
    };
    let record = if args.no_record {
        false
    } else {
        args.record || !source.is_live()
    };
    let config = settings.pipeline_config(source, record);

    let stop = StopHandle::default();
    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            ctrl_c.request();
        }
    });

    // The window must live on the thread that drives the loop
    let summary = tokio::task::spawn_blocking(move || run(settings, config, stop)).await??;

    info!(
        "Processed {} frames, {} inferences, {} detector failures",
        summary.frames, summary.inferences, summary.detector_failures
    );
    if summary.frames_dropped > 0 {
        info!(
            "{} camera frames were replaced before they could be processed",
            summary.frames_dropped
        );
    }
    if summary.sink_failures > 0 {
        warn!("Recording stopped early after {} frames", summary.sink_writes);
    }
    if let Some(path) = &summary.output {
        info!("Processing complete! Saved to: {}", path.display());
    }

    info!("Lookout shutting down");
    Ok(())
}

fn apply_overrides(settings: &mut Settings, args: &Args) {
    if let Some(skip) = args.frame_skip {
        settings.pipeline.frame_skip = skip;
    }
    if let Some(conf) = args.conf {
        settings.pipeline.confidence_threshold = conf;
    }
    if let Some(scale) = args.scale {
        settings.pipeline.display_scale = scale;
    }
    if let Some(device) = args.device {
        settings.capture.device = device;
    }
    if args.headless {
        settings.display.headless = true;
    }
}

fn run(
    settings: Settings,
    config: PipelineConfig,
    stop: StopHandle,
) -> Result<RunSummary, PipelineError> {
    let mut controller = PipelineController::new(
        config,
        Box::new(NullDetector),
        Box::new(OverlayRenderer::new(settings.overlay)),
        Box::new(DefaultSourceFactory::new(settings.capture.clone())),
        Box::new(DefaultSinkFactory),
    )
    .with_stop_handle(stop);

    if !settings.display.headless {
        controller = attach_display(controller)?;
    }

    controller.run()
}

#[cfg(feature = "sdl-display")]
fn attach_display(controller: PipelineController) -> Result<PipelineController, PipelineError> {
    let display = lookout::display::Sdl2Display::new()?;
    Ok(controller.with_display(Box::new(display)))
}

#[cfg(not(feature = "sdl-display"))]
fn attach_display(controller: PipelineController) -> Result<PipelineController, PipelineError> {
    warn!("Built without sdl-display, running headless");
    Ok(controller)
}
