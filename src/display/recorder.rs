//! Recording contract for annotated output

use std::path::PathBuf;

use crate::capture::Frame;
use crate::error::{OpenError, SinkError};

/// Everything needed to open a recording.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSpec {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Encoded video output. Frames are written in call order; `close` flushes
/// everything still buffered and is idempotent.
pub trait VideoSink {
    fn write(&mut self, frame: &Frame) -> Result<(), SinkError>;

    fn close(&mut self) -> Result<(), SinkError>;

    fn path(&self) -> &std::path::Path;
}

/// Opens recordings on demand.
pub trait SinkFactory {
    fn open(&mut self, spec: &SinkSpec) -> Result<Box<dyn VideoSink>, OpenError>;
}

/// Recorder backed by GStreamer when it is compiled in.
#[derive(Debug, Default)]
pub struct DefaultSinkFactory;

impl SinkFactory for DefaultSinkFactory {
    #[cfg(feature = "gstreamer-pipeline")]
    fn open(&mut self, spec: &SinkSpec) -> Result<Box<dyn VideoSink>, OpenError> {
        Ok(Box::new(super::gst_recorder::GstRecorder::open(spec)?))
    }

    #[cfg(not(feature = "gstreamer-pipeline"))]
    fn open(&mut self, _spec: &SinkSpec) -> Result<Box<dyn VideoSink>, OpenError> {
        Err(OpenError::Unsupported("GStreamer recording"))
    }
}

/// Checks that a frame matches the geometry a recording was opened with.
pub fn check_dimensions(spec: &SinkSpec, frame: &Frame) -> Result<(), SinkError> {
    if frame.width() != spec.width || frame.height() != spec.height {
        return Err(SinkError::Dimensions {
            width: spec.width,
            height: spec.height,
            got_width: frame.width(),
            got_height: frame.height(),
        });
    }
    Ok(())
}
