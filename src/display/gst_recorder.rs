//! GStreamer recorder that encodes frames pushed from Rust

use std::path::Path;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, instrument, warn};

use crate::capture::Frame;
use crate::display::recorder::{check_dimensions, SinkSpec, VideoSink};
use crate::error::{OpenError, SinkError};

/// How long `close` waits for the muxer to flush
const FLUSH_TIMEOUT_SECS: u64 = 10;

/// Encodes BGR frames through `appsrc ! videoconvert ! <encoder> ! <muxer> ! filesink`.
pub struct GstRecorder {
    spec: SinkSpec,
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    frame_ns: u64,
    written: u64,
    closed: bool,
}

impl GstRecorder {
    #[instrument]
    pub fn open(spec: &SinkSpec) -> Result<Self, OpenError> {
        let what = spec.path.display().to_string();
        gst::init().map_err(|e| OpenError::backend("GStreamer", e))?;

        let encoder = detect_encoder()
            .ok_or_else(|| OpenError::backend(&what, "no video encoder available"))?;
        let muxer = muxer_for(&spec.path);
        info!("Recording with {} into {}", encoder, muxer);

        let pipeline_str = format!(
            "appsrc name=src ! videoconvert ! {} ! {} ! filesink name=out",
            encoder, muxer
        );
        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| OpenError::backend(&what, e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| OpenError::backend(&what, "failed to create pipeline"))?;

        pipeline
            .by_name("out")
            .ok_or_else(|| OpenError::backend(&what, "filesink missing"))?
            .set_property("location", spec.path.to_string_lossy().to_string());

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| OpenError::backend(&what, "appsrc missing"))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| OpenError::backend(&what, "failed to cast to AppSrc"))?;

        let fps = if spec.fps > 0.0 { spec.fps } else { 30.0 };
        let info =
            gst_video::VideoInfo::builder(gst_video::VideoFormat::Bgr, spec.width, spec.height)
                .fps(gst::Fraction::new((fps * 1000.0).round() as i32, 1000))
                .build()
                .map_err(|e| OpenError::backend(&what, e))?;
        let caps = info.to_caps().map_err(|e| OpenError::backend(&what, e))?;

        // Recording is not live: block instead of dropping when the encoder lags
        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(false);
        appsrc.set_block(true);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| OpenError::backend(&what, format!("{:?}", e)))?;

        Ok(Self {
            spec: spec.clone(),
            pipeline,
            appsrc,
            frame_ns: (1_000_000_000.0 / fps) as u64,
            written: 0,
            closed: false,
        })
    }
}

impl VideoSink for GstRecorder {
    fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        check_dimensions(&self.spec, frame)?;

        // Bytes is immutable and refcounted, so the buffer wraps it without copying
        let mut buffer = gst::Buffer::from_slice(frame.data.clone());
        {
            let buffer = buffer.make_mut();
            buffer.set_pts(gst::ClockTime::from_nseconds(self.written * self.frame_ns));
            buffer.set_duration(gst::ClockTime::from_nseconds(self.frame_ns));
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| SinkError::Backend(format!("push failed: {:?}", e)))?;
        self.written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let flushed = match self.appsrc.end_of_stream() {
            Ok(_) => wait_for_eos(&self.pipeline),
            Err(e) => Err(SinkError::Backend(format!("end of stream failed: {:?}", e))),
        };

        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop recorder pipeline: {:?}", e);
        }
        debug!(
            "Recorder wrote {} frames to {}",
            self.written,
            self.spec.path.display()
        );
        flushed
    }

    fn path(&self) -> &Path {
        &self.spec.path
    }
}

impl Drop for GstRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Recorder close on drop failed: {}", e);
        }
    }
}

fn wait_for_eos(pipeline: &gst::Pipeline) -> Result<(), SinkError> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| SinkError::Backend("pipeline has no bus".into()))?;

    let msg = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(FLUSH_TIMEOUT_SECS),
        &[gst::MessageType::Eos, gst::MessageType::Error],
    );

    match msg.as_ref().map(|m| m.view()) {
        Some(gst::MessageView::Eos(..)) => Ok(()),
        Some(gst::MessageView::Error(err)) => Err(SinkError::Backend(format!(
            "{} ({:?})",
            err.error(),
            err.debug().map(|d| d.to_string())
        ))),
        _ => Err(SinkError::Backend("timed out flushing recording".into())),
    }
}

/// First installed encoder, H.264 preferred
fn detect_encoder() -> Option<&'static str> {
    let encoders = [
        ("x264enc", "x264enc speed-preset=veryfast tune=zerolatency ! h264parse"),
        ("openh264enc", "openh264enc ! h264parse"),
        ("avenc_mpeg4", "avenc_mpeg4"), // MPEG-4 part 2, the classic mp4v
    ];

    for (element, description) in encoders {
        if gst::ElementFactory::find(element).is_some() {
            return Some(description);
        }
    }

    None
}

fn muxer_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mkv") => "matroskamux",
        Some("avi") => "avimux",
        _ => "mp4mux",
    }
}
