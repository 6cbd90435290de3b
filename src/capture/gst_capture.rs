//! GStreamer-backed camera and file sources

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, instrument, warn};

use crate::capture::frame::Frame;
use crate::capture::source::{
    CaptureStrategy, FrameSource, InterruptHandle, ReadOutcome, StreamFormat,
};
use crate::error::{OpenError, ReadError};
use crate::utils::device_path;
use crate::CaptureConfig;

/// Frames pulled from an `appsink` at the end of a parsed pipeline.
pub struct GstSource {
    name: String,
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    format: StreamFormat,
    read_timeout: Duration,
    sequence: u64,
    pending: Option<Frame>,
    closed: bool,
}

impl GstSource {
    /// Launch a live camera pipeline. Opening only checks that the pipeline
    /// reaches PLAYING; readability is checked by the strategy probe.
    #[instrument(skip(config))]
    pub fn camera(name: &str, description: &str, config: &CaptureConfig) -> Result<Self, OpenError> {
        gst::init().map_err(|e| OpenError::backend("GStreamer", e))?;
        info!("Pipeline: {}", description);

        let pipeline = launch(description)?;
        let appsink = appsink(&pipeline, name)?;

        start(&pipeline, name)?;

        Ok(Self {
            name: name.to_string(),
            pipeline,
            appsink,
            format: StreamFormat {
                width: config.width.unwrap_or(0),
                height: config.height.unwrap_or(0),
                fps: config.fps as f64,
            },
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            sequence: 0,
            pending: None,
            closed: false,
        })
    }

    /// Open a video file for sequential decoding. The first frame is
    /// prerolled so the stream geometry is known before any sink opens.
    #[instrument(skip(config))]
    pub fn file(path: &Path, config: &CaptureConfig) -> Result<Self, OpenError> {
        if !path.is_file() {
            return Err(OpenError::NotFound(path.to_path_buf()));
        }
        gst::init().map_err(|e| OpenError::backend("GStreamer", e))?;

        let what = path.display().to_string();
        let pipeline = launch(
            "filesrc name=src ! decodebin ! videoconvert ! video/x-raw,format=BGR ! \
             appsink name=sink sync=false max-buffers=4",
        )?;
        let src = pipeline
            .by_name("src")
            .ok_or_else(|| OpenError::backend(&what, "filesrc element missing"))?;
        src.set_property("location", path.to_string_lossy().to_string());

        let appsink = appsink(&pipeline, &what)?;
        start(&pipeline, &what)?;

        let mut source = Self {
            name: what.clone(),
            pipeline,
            appsink,
            format: StreamFormat {
                width: 0,
                height: 0,
                fps: config.fps as f64,
            },
            read_timeout: Duration::from_millis(config.probe_timeout_ms),
            sequence: 0,
            pending: None,
            closed: false,
        };

        match source.pull() {
            Ok(ReadOutcome::Frame(frame)) => source.pending = Some(frame),
            Ok(ReadOutcome::EndOfStream) => {
                info!("{} contains no video frames", what);
            }
            Err(e) => {
                let reason = source.bus_error().unwrap_or_else(|| e.to_string());
                source.close();
                return Err(OpenError::backend(what, reason));
            }
        }
        source.read_timeout = Duration::from_millis(config.read_timeout_ms);

        Ok(source)
    }

    fn pull(&mut self) -> Result<ReadOutcome, ReadError> {
        if self.closed {
            return Err(ReadError::Closed);
        }

        let timeout = gst::ClockTime::from_mseconds(self.read_timeout.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() {
                return Ok(ReadOutcome::EndOfStream);
            }
            if let Some(reason) = self.bus_error() {
                return Err(ReadError::Backend(reason));
            }
            return Err(ReadError::Timeout);
        };

        let frame = frame_from_sample(&sample, self.sequence)?;
        self.sequence += 1;
        self.format.width = frame.width();
        self.format.height = frame.height();
        if let Some(fps) = sample_fps(&sample) {
            self.format.fps = fps;
        }

        Ok(ReadOutcome::Frame(frame))
    }

    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
        match msg.view() {
            gst::MessageView::Error(err) => Some(format!(
                "{} ({:?})",
                err.error(),
                err.debug().map(|d| d.to_string())
            )),
            _ => None,
        }
    }
}

impl FrameSource for GstSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn next_frame(&mut self) -> Result<ReadOutcome, ReadError> {
        if let Some(frame) = self.pending.take() {
            return Ok(ReadOutcome::Frame(frame));
        }
        self.pull()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!("Stopping GStreamer pipeline {}", self.name);
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline {}: {:?}", self.name, e);
        }
    }

    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        let pipeline = self.pipeline.clone();
        Some(Box::new(move || {
            let _ = pipeline.set_state(gst::State::Null);
        }))
    }
}

impl Drop for GstSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Camera pipelines in order of preference: NVIDIA hardware conversion,
/// then plain software conversion.
pub fn camera_pipelines(config: &CaptureConfig) -> Vec<(&'static str, String)> {
    let device = device_path(config.device);
    let size = match (config.width, config.height) {
        (Some(w), Some(h)) => format!(",width={},height={}", w, h),
        _ => String::new(),
    };
    let appsink = "appsink name=sink drop=true sync=false max-buffers=1";

    vec![
        (
            "gst-nvvidconv",
            format!(
                "v4l2src device={} ! video/x-raw,format=YUY2{} ! \
                 nvvidconv ! video/x-raw,format=BGRx ! \
                 videoconvert ! video/x-raw,format=BGR ! {}",
                device, size, appsink
            ),
        ),
        (
            "gst-videoconvert",
            format!(
                "v4l2src device={} ! video/x-raw{} ! \
                 videoconvert ! video/x-raw,format=BGR ! {}",
                device, size, appsink
            ),
        ),
    ]
}

/// Wrap [`camera_pipelines`] as probe strategies.
pub fn camera_strategies(config: &CaptureConfig) -> Vec<CaptureStrategy> {
    camera_pipelines(config)
        .into_iter()
        .map(|(name, description)| {
            let config = config.clone();
            CaptureStrategy::new(name, move || {
                let source = GstSource::camera(name, &description, &config)?;
                Ok(Box::new(source) as Box<dyn FrameSource>)
            })
        })
        .collect()
}

fn launch(description: &str) -> Result<gst::Pipeline, OpenError> {
    gst::parse::launch(description)
        .map_err(|e| OpenError::backend(description, e))?
        .downcast::<gst::Pipeline>()
        .map_err(|_| OpenError::backend(description, "not a pipeline"))
}

fn appsink(pipeline: &gst::Pipeline, what: &str) -> Result<gst_app::AppSink, OpenError> {
    pipeline
        .by_name("sink")
        .ok_or_else(|| OpenError::backend(what, "appsink element missing"))?
        .downcast::<gst_app::AppSink>()
        .map_err(|_| OpenError::backend(what, "sink is not an appsink"))
}

fn start(pipeline: &gst::Pipeline, what: &str) -> Result<(), OpenError> {
    if let Err(e) = pipeline.set_state(gst::State::Playing) {
        let _ = pipeline.set_state(gst::State::Null);
        return Err(OpenError::backend(what, format!("{:?}", e)));
    }

    let (state_change, _, _) = pipeline.state(Some(gst::ClockTime::from_seconds(5)));
    match state_change {
        Ok(gst::StateChangeSuccess::Success)
        | Ok(gst::StateChangeSuccess::Async)
        | Ok(gst::StateChangeSuccess::NoPreroll) => Ok(()),
        Err(e) => {
            let _ = pipeline.set_state(gst::State::Null);
            Err(OpenError::backend(what, format!("{:?}", e)))
        }
    }
}

fn sample_fps(sample: &gst::Sample) -> Option<f64> {
    let info = gst_video::VideoInfo::from_caps(sample.caps()?).ok()?;
    let fps = info.fps();
    (fps.numer() > 0 && fps.denom() > 0).then(|| fps.numer() as f64 / fps.denom() as f64)
}

/// Copy a BGR sample into a packed frame, dropping any row padding.
fn frame_from_sample(sample: &gst::Sample, sequence: u64) -> Result<Frame, ReadError> {
    let caps = sample
        .caps()
        .ok_or_else(|| ReadError::Malformed("sample has no caps".into()))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| ReadError::Malformed(e.to_string()))?;
    let buffer = sample
        .buffer()
        .ok_or_else(|| ReadError::Malformed("sample contains no buffer".into()))?;
    let map = buffer
        .map_readable()
        .map_err(|e| ReadError::Backend(e.to_string()))?;

    let width = info.width();
    let height = info.height();
    let row = width as usize * 3;
    let stride = info.stride().first().copied().unwrap_or(0).max(0) as usize;
    let stride = if stride == 0 { row } else { stride };
    let bytes = map.as_slice();

    if height == 0 || bytes.len() < stride * (height as usize - 1) + row {
        return Err(ReadError::Malformed(format!(
            "{} bytes for {}x{} stride {}",
            bytes.len(),
            width,
            height,
            stride
        )));
    }

    let data = if stride == row {
        Bytes::copy_from_slice(&bytes[..row * height as usize])
    } else {
        let mut packed = Vec::with_capacity(row * height as usize);
        for chunk in bytes.chunks(stride).take(height as usize) {
            packed.extend_from_slice(&chunk[..row]);
        }
        Bytes::from(packed)
    };

    Frame::from_bgr(sequence, width, height, data)
}
