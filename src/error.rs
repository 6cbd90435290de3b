//! Error taxonomy for the capture and detection pipeline

use std::path::PathBuf;

use thiserror::Error;

/// A source or sink could not be acquired. Always fatal, never retried.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("video file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to open {what}: {reason}")]
    Backend { what: String, reason: String },
    #[error("no capture strategy delivered a frame (tried: {})", .tried.join(", "))]
    NoWorkingStrategy { tried: Vec<String> },
    #[error("{0} support was not compiled into this build")]
    Unsupported(&'static str),
}

impl OpenError {
    pub fn backend(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Backend {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

/// A frame could not be read from an open source.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("timed out waiting for a frame")]
    Timeout,
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("capture backend failure: {0}")]
    Backend(String),
    #[error("source is closed")]
    Closed,
}

impl ReadError {
    /// Transient errors are retried by live sources; the rest end the stream.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Malformed(_))
    }
}

#[derive(Debug, Error)]
#[error("detector failed: {0}")]
pub struct DetectorError(pub String);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("frame buffer of {len} bytes does not match {width}x{height} BGR")]
    BufferSize { width: u32, height: u32, len: usize },
    #[error("invalid scale factor {0}")]
    InvalidScale(f64),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("frame is {got_width}x{got_height}, recorder expects {width}x{height}")]
    Dimensions {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
    #[error("recorder backend failure: {0}")]
    Backend(String),
    #[error("recorder already closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("capture worker already running")]
    AlreadyRunning,
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("confidence threshold {0} is outside [0, 1]")]
    ConfidenceThreshold(f32),
    #[error("display scale {0} is outside (0, 1]")]
    DisplayScale(f64),
    #[error("stop grace period must be non-zero")]
    GracePeriod,
    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

/// Errors that escape the pipeline controller. Only startup failures and
/// programming errors reach the caller; everything else is contained.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Display(#[from] DisplayError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("pipeline already {0:?}")]
    InvalidState(crate::pipeline::PipelineState),
}
