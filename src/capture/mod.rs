pub mod frame;
pub mod source;
pub mod worker;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;

#[cfg(feature = "v4l2-capture")]
pub mod decoder;
#[cfg(feature = "v4l2-capture")]
pub mod v4l2;

pub use frame::{BgrImage, Frame, FrameMetadata};
pub use source::{
    open_first_readable, CaptureStrategy, FrameSource, InterruptHandle, ReadOutcome, SourceSpec,
    StreamFormat,
};
pub use worker::CaptureWorker;

#[cfg(feature = "gstreamer-pipeline")]
pub use gst_capture::GstSource;
#[cfg(feature = "v4l2-capture")]
pub use v4l2::V4l2Capture;

use tracing::info;

use crate::error::OpenError;
use crate::CaptureConfig;

/// Opens the source a run asks for.
pub trait SourceFactory {
    fn open(&mut self, spec: &SourceSpec) -> Result<Box<dyn FrameSource>, OpenError>;
}

/// Files decode through GStreamer; cameras probe the compiled-in strategies
/// in order, accelerated pipelines first.
#[derive(Debug, Clone, Default)]
pub struct DefaultSourceFactory {
    config: CaptureConfig,
}

impl DefaultSourceFactory {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Camera strategies in probe order for this build.
    pub fn camera_strategies(&self) -> Vec<CaptureStrategy> {
        #[allow(unused_mut)]
        let mut strategies = Vec::new();

        #[cfg(feature = "gstreamer-pipeline")]
        if self.config.use_hardware {
            strategies.extend(gst_capture::camera_strategies(&self.config));
        }

        #[cfg(feature = "v4l2-capture")]
        strategies.push(V4l2Capture::strategy(&self.config));

        strategies
    }
}

impl SourceFactory for DefaultSourceFactory {
    fn open(&mut self, spec: &SourceSpec) -> Result<Box<dyn FrameSource>, OpenError> {
        match spec {
            SourceSpec::File(path) => {
                if !path.is_file() {
                    return Err(OpenError::NotFound(path.clone()));
                }
                info!("Opening video file {}", path.display());
                open_file(path, &self.config)
            }
            SourceSpec::Camera(index) => {
                let mut config = self.config.clone();
                config.device = *index;
                let factory = DefaultSourceFactory::new(config);

                let strategies = factory.camera_strategies();
                if strategies.is_empty() {
                    return Err(OpenError::Unsupported("camera capture"));
                }
                info!(
                    "Probing camera {} with {} strategies",
                    index,
                    strategies.len()
                );
                open_first_readable(strategies)
            }
        }
    }
}

#[cfg(feature = "gstreamer-pipeline")]
fn open_file(
    path: &std::path::Path,
    config: &CaptureConfig,
) -> Result<Box<dyn FrameSource>, OpenError> {
    Ok(Box::new(GstSource::file(path, config)?))
}

#[cfg(not(feature = "gstreamer-pipeline"))]
fn open_file(
    _path: &std::path::Path,
    _config: &CaptureConfig,
) -> Result<Box<dyn FrameSource>, OpenError> {
    Err(OpenError::Unsupported("video file decoding"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.mp4");

        let err = DefaultSourceFactory::default()
            .open(&SourceSpec::File(path.clone()))
            .unwrap_err();
        assert!(matches!(err, OpenError::NotFound(p) if p == path));
    }

    #[cfg(not(any(feature = "gstreamer-pipeline", feature = "v4l2-capture")))]
    #[test]
    fn camera_without_backends_is_unsupported() {
        let err = DefaultSourceFactory::default()
            .open(&SourceSpec::Camera(0))
            .unwrap_err();
        assert!(matches!(err, OpenError::Unsupported(_)));
    }
}
