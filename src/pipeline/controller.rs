//! Main loop: pull the latest frame, detect on a fixed cadence, annotate,
//! show and record.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::Local;
use tracing::{debug, info, instrument, warn};

use crate::capture::{CaptureWorker, Frame, FrameSource, ReadOutcome, SourceFactory, SourceSpec};
use crate::display::overlay::GREEN;
use crate::display::{Display, KeyCode, Renderer, SinkFactory, SinkSpec, TextStyle, VideoSink};
use crate::error::PipelineError;
use crate::pipeline::{DetectionResult, Detector, FpsMeter};
use crate::utils::{processed_output_path, recording_output_path};
use crate::PipelineConfig;

/// Distance of the FPS readout from the right edge
const FPS_MARGIN_X: i32 = 10;
/// Baseline of the FPS readout
const FPS_BASELINE_Y: i32 = 30;
/// Recording rate used when the source does not report one
const FALLBACK_FPS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Requests an orderly stop from another thread, e.g. a Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What a finished run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub inferences: u64,
    pub detector_failures: u64,
    pub sink_writes: u64,
    pub sink_failures: u64,
    /// Camera frames replaced in the slot before the loop picked them up
    pub frames_dropped: u64,
    /// Recording path, if a recording was opened
    pub output: Option<PathBuf>,
}

enum Acquisition {
    /// Camera read on a background thread
    Live(CaptureWorker),
    /// File decoded inline, one frame per iteration
    File(Box<dyn FrameSource>),
}

/// Owns one run of the pipeline: the source, the detector, the renderer, an
/// optional window and an optional recording.
pub struct PipelineController {
    config: PipelineConfig,
    state: PipelineState,

    detector: Box<dyn Detector>,
    renderer: Box<dyn Renderer>,
    sources: Box<dyn SourceFactory>,
    sinks: Box<dyn SinkFactory>,
    display: Option<Box<dyn Display>>,

    acquisition: Option<Acquisition>,
    sink: Option<Box<dyn VideoSink>>,
    sink_fps: f64,
    fps: FpsMeter,
    fps_style: TextStyle,
    stop: StopHandle,

    frame_counter: u64,
    last_result: Option<DetectionResult>,
    last_sequence: Option<u64>,
    summary: RunSummary,
}

impl PipelineController {
    pub fn new(
        config: PipelineConfig,
        detector: Box<dyn Detector>,
        renderer: Box<dyn Renderer>,
        sources: Box<dyn SourceFactory>,
        sinks: Box<dyn SinkFactory>,
    ) -> Self {
        let fps_style = TextStyle {
            color: GREEN,
            scale: config.text_scale.max(1),
        };

        Self {
            config,
            state: PipelineState::Starting,
            detector,
            renderer,
            sources,
            sinks,
            display: None,
            acquisition: None,
            sink: None,
            sink_fps: FALLBACK_FPS,
            fps: FpsMeter::new(),
            fps_style,
            stop: StopHandle::default(),
            frame_counter: 0,
            last_result: None,
            last_sequence: None,
            summary: RunSummary::default(),
        }
    }

    /// Show frames in `display`. Without one the pipeline runs headless.
    pub fn with_display(mut self, display: Box<dyn Display>) -> Self {
        self.display = Some(display);
        self
    }

    /// Share a stop handle created elsewhere, e.g. before a signal handler
    /// is installed.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Open the source (and recording) and enter `Running`. Any failure
    /// leaves the controller `Stopped`.
    #[instrument(skip(self), fields(source = ?self.config.source))]
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Starting {
            return Err(PipelineError::InvalidState(self.state));
        }

        if let Err(e) = self.open() {
            self.stop();
            return Err(e);
        }

        self.fps = FpsMeter::new();
        self.state = PipelineState::Running;
        info!("Pipeline running");
        Ok(())
    }

    fn open(&mut self) -> Result<(), PipelineError> {
        self.config.validate()?;

        let source = self.sources.open(&self.config.source)?;
        let format = source.format();
        info!(
            "Opened {} ({}x{} @ {:.1} fps)",
            source.name(),
            format.width,
            format.height,
            format.fps
        );
        if format.fps > 0.0 {
            self.sink_fps = format.fps;
        }

        // Sources that already know their geometry get their recording now;
        // the rest open it on the first frame
        if self.config.record && format.width > 0 && format.height > 0 {
            self.open_sink(format.width, format.height)?;
        }

        self.acquisition = Some(if self.config.source.is_live() {
            let mut worker = CaptureWorker::new(source, self.config.stop_grace);
            worker.start()?;
            Acquisition::Live(worker)
        } else {
            Acquisition::File(source)
        });

        Ok(())
    }

    fn open_sink(&mut self, width: u32, height: u32) -> Result<(), PipelineError> {
        let path = match &self.config.source {
            SourceSpec::File(input) => processed_output_path(input, &self.config.extension),
            SourceSpec::Camera(_) => recording_output_path(
                &self.config.output_dir,
                &self.config.extension,
                Local::now(),
            ),
        };

        let spec = SinkSpec {
            path,
            width,
            height,
            fps: self.sink_fps,
        };
        let sink = self.sinks.open(&spec)?;
        info!("Recording to {}", spec.path.display());

        self.summary.output = Some(spec.path);
        self.sink = Some(sink);
        Ok(())
    }

    /// Start if needed, loop until the source ends or a stop is requested,
    /// then tear down.
    pub fn run(&mut self) -> Result<RunSummary, PipelineError> {
        if self.state == PipelineState::Starting {
            self.start()?;
        }

        while self.state == PipelineState::Running {
            if let Err(e) = self.step() {
                self.stop();
                return Err(e);
            }
        }

        self.stop();
        Ok(self.summary.clone())
    }

    /// One loop iteration. Errors returned here are fatal; everything
    /// recoverable is handled inside.
    pub fn step(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Running {
            return Ok(());
        }

        if self.stop.is_requested() {
            self.begin_stopping("stop requested");
            return Ok(());
        }

        match self.next_frame() {
            Some(frame) => self.process(frame)?,
            None if self.state == PipelineState::Running => {
                // Live source with nothing new yet
                self.poll_keys();
                thread::sleep(self.config.poll_interval);
                return Ok(());
            }
            None => return Ok(()),
        }

        self.poll_keys();
        Ok(())
    }

    fn next_frame(&mut self) -> Option<Frame> {
        match self.acquisition.as_mut()? {
            Acquisition::Live(worker) => {
                let finished = worker.is_finished();
                let fresh = worker
                    .latest()
                    .filter(|frame| Some(frame.sequence()) != self.last_sequence);

                if fresh.is_none() && finished {
                    self.begin_stopping("capture ended");
                }
                fresh
            }
            Acquisition::File(source) => match source.next_frame() {
                Ok(ReadOutcome::Frame(frame)) => Some(frame),
                Ok(ReadOutcome::EndOfStream) => {
                    self.begin_stopping("end of file");
                    None
                }
                Err(e) => {
                    warn!("Read failed, treating as end of file: {}", e);
                    self.begin_stopping("unreadable file");
                    None
                }
            },
        }
    }

    fn process(&mut self, frame: Frame) -> Result<(), PipelineError> {
        let index = self.frame_counter;
        let acquired = frame.timestamp;
        self.frame_counter += 1;
        self.last_sequence = Some(frame.sequence());

        if index % (self.config.frame_skip as u64 + 1) == 0 {
            self.detect(&frame);
        }

        let annotated = match &self.last_result {
            Some(result) => self.renderer.draw(&frame, result)?,
            None => frame,
        };

        let fps_text = format!("FPS: {:.1}", self.fps.tick());

        if self.config.record && self.sink.is_none() && self.summary.output.is_none() {
            self.open_sink(annotated.width(), annotated.height())?;
        }

        if self.sink.is_some() {
            let recorded = self.draw_fps(&annotated, &fps_text)?;
            self.record(&recorded);
        }

        if self.display.is_some() {
            let scaled = annotated.scaled(self.config.display_scale)?;
            let shown = self.draw_fps(&scaled, &fps_text)?;
            if let Some(display) = self.display.as_mut() {
                display.show(&self.config.window_title, &shown)?;
            }
        }

        self.summary.frames += 1;
        metrics::counter!("lookout_frames_processed_total").increment(1);
        metrics::histogram!("lookout_frame_latency_seconds")
            .record(acquired.elapsed().as_secs_f64());

        let progress = self.config.progress_interval;
        if !self.config.source.is_live() && progress > 0 && self.summary.frames % progress == 0 {
            info!("Processed {} frames", self.summary.frames);
        }

        Ok(())
    }

    fn detect(&mut self, frame: &Frame) {
        let started = Instant::now();
        match self.detector.detect(frame, self.config.confidence_threshold) {
            Ok(result) => {
                metrics::histogram!("lookout_inference_seconds")
                    .record(started.elapsed().as_secs_f64());
                debug!(
                    "Frame {}: {} detections in {:?}",
                    frame.sequence(),
                    result.len(),
                    started.elapsed()
                );
                self.summary.inferences += 1;
                self.last_result = Some(result);
            }
            Err(e) => {
                // Keep the previous result; never invent one
                warn!("Detection on frame {} failed: {}", frame.sequence(), e);
                metrics::counter!("lookout_detector_failures_total").increment(1);
                self.summary.detector_failures += 1;
            }
        }
    }

    /// FPS readout anchored to the top-right corner, kept on-frame.
    fn draw_fps(&self, frame: &Frame, text: &str) -> Result<Frame, PipelineError> {
        let (text_w, text_h) = self.renderer.text_size(text, &self.fps_style);
        let x = (frame.width() as i32 - text_w as i32 - FPS_MARGIN_X).max(0);
        let y = (FPS_BASELINE_Y - text_h as i32).max(0);
        Ok(self
            .renderer
            .draw_text(frame, text, (x, y), &self.fps_style)?)
    }

    fn record(&mut self, frame: &Frame) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        match sink.write(frame) {
            Ok(()) => self.summary.sink_writes += 1,
            Err(e) => {
                warn!("Recording failed, continuing display-only: {}", e);
                metrics::counter!("lookout_sink_failures_total").increment(1);
                self.summary.sink_failures += 1;
                if let Some(mut sink) = self.sink.take() {
                    if let Err(e) = sink.close() {
                        debug!("Closing failed recorder: {}", e);
                    }
                }
            }
        }
    }

    fn poll_keys(&mut self) {
        let Some(display) = self.display.as_mut() else {
            return;
        };

        let quit = self.config.quit_key.to_ascii_lowercase();
        match display.poll_key() {
            Some(KeyCode::Char(c)) if c.to_ascii_lowercase() == quit => {
                self.begin_stopping("quit key pressed")
            }
            Some(KeyCode::Escape) => self.begin_stopping("escape pressed"),
            Some(KeyCode::Close) => self.begin_stopping("window closed"),
            _ => {}
        }
    }

    fn begin_stopping(&mut self, reason: &str) {
        if self.state == PipelineState::Running {
            info!("Stopping: {}", reason);
            self.state = PipelineState::Stopping;
        }
    }

    /// Release the source, flush the recording and close the window.
    /// Calling it again once stopped does nothing.
    pub fn stop(&mut self) {
        if self.state == PipelineState::Stopped {
            return;
        }
        self.state = PipelineState::Stopping;

        match self.acquisition.take() {
            Some(Acquisition::Live(mut worker)) => {
                if !worker.stop() {
                    warn!("Capture thread detached after grace period");
                }
                let stats = worker.stats();
                debug!(
                    "Capture slot: {} written, {} read, {} dropped",
                    stats.written, stats.read, stats.dropped
                );
                self.summary.frames_dropped = stats.dropped as u64;
                metrics::counter!("lookout_frames_dropped_total")
                    .increment(stats.dropped as u64);
            }
            Some(Acquisition::File(mut source)) => source.close(),
            None => {}
        }

        if let Some(mut sink) = self.sink.take() {
            match sink.close() {
                Ok(()) => info!("Saved recording to {}", sink.path().display()),
                Err(e) => warn!("Failed to finalize {}: {}", sink.path().display(), e),
            }
        }

        if let Some(display) = self.display.as_mut() {
            display.close();
        }

        self.state = PipelineState::Stopped;
        info!(
            "Pipeline stopped after {} frames ({} inferences)",
            self.summary.frames, self.summary.inferences
        );
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StreamFormat;
    use crate::display::OverlayRenderer;
    use crate::error::{OpenError, ReadError};
    use crate::pipeline::NullDetector;

    struct Frames(u64);

    impl FrameSource for Frames {
        fn name(&self) -> &str {
            "frames"
        }

        fn format(&self) -> StreamFormat {
            StreamFormat {
                width: 8,
                height: 6,
                fps: 25.0,
            }
        }

        fn next_frame(&mut self) -> Result<ReadOutcome, ReadError> {
            if self.0 == 0 {
                return Ok(ReadOutcome::EndOfStream);
            }
            self.0 -= 1;
            Ok(ReadOutcome::Frame(Frame::from_bgr(0, 8, 6, vec![0u8; 144])?))
        }

        fn close(&mut self) {}
    }

    struct OneSource(Option<Box<dyn FrameSource>>);

    impl SourceFactory for OneSource {
        fn open(&mut self, spec: &SourceSpec) -> Result<Box<dyn FrameSource>, OpenError> {
            self.0
                .take()
                .ok_or_else(|| OpenError::backend(format!("{:?}", spec), "already opened"))
        }
    }

    struct NoSinks;

    impl SinkFactory for NoSinks {
        fn open(&mut self, _: &SinkSpec) -> Result<Box<dyn VideoSink>, OpenError> {
            Err(OpenError::Unsupported("test recording"))
        }
    }

    fn controller(frames: u64) -> PipelineController {
        PipelineController::new(
            PipelineConfig::new(SourceSpec::File("clip.mp4".into())),
            Box::new(NullDetector),
            Box::new(OverlayRenderer::default()),
            Box::new(OneSource(Some(Box::new(Frames(frames))))),
            Box::new(NoSinks),
        )
    }

    #[test]
    fn file_run_ends_at_end_of_stream() {
        let mut pipeline = controller(5);
        let summary = pipeline.run().unwrap();

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(summary.frames, 5);
        // Default skip of 2: frames 0 and 3
        assert_eq!(summary.inferences, 2);
        assert_eq!(summary.output, None);
    }

    #[test]
    fn start_twice_is_an_invalid_state() {
        let mut pipeline = controller(1);
        pipeline.start().unwrap();
        assert!(matches!(
            pipeline.start(),
            Err(PipelineError::InvalidState(PipelineState::Running))
        ));
    }

    #[test]
    fn failed_open_lands_in_stopped() {
        let mut pipeline = controller(1);
        pipeline.sources = Box::new(OneSource(None));

        assert!(matches!(pipeline.start(), Err(PipelineError::Open(_))));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[test]
    fn invalid_config_is_rejected_before_open() {
        let mut pipeline = controller(1);
        pipeline.config.display_scale = 2.0;

        assert!(matches!(pipeline.start(), Err(PipelineError::Config(_))));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[test]
    fn recording_open_failure_is_fatal() {
        let mut pipeline = controller(3);
        pipeline.config.record = true;

        assert!(matches!(
            pipeline.run(),
            Err(PipelineError::Open(OpenError::Unsupported(_)))
        ));
        assert_eq!(pipeline.summary().frames, 0);
    }

    #[test]
    fn stop_handle_ends_the_loop() {
        let mut pipeline = controller(100);
        pipeline.start().unwrap();
        pipeline.step().unwrap();

        pipeline.stop_handle().request();
        pipeline.step().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopping);

        let summary = pipeline.run().unwrap();
        assert_eq!(summary.frames, 1);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }
}
