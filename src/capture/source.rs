//! Frame source contract and the camera strategy probe

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capture::frame::Frame;
use crate::error::{OpenError, ReadError};

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceSpec {
    /// Live camera, `/dev/video{index}` on Linux
    Camera(u32),
    /// Finite video file, decoded sequentially
    File(PathBuf),
}

impl SourceSpec {
    pub fn is_live(&self) -> bool {
        matches!(self, SourceSpec::Camera(_))
    }
}

/// Geometry and rate negotiated when a source opens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Result of a successful read.
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(Frame),
    EndOfStream,
}

/// Forces a blocked backend read to return. Called from a thread other than
/// the one reading.
pub type InterruptHandle = Box<dyn Fn() + Send + Sync>;

/// A camera or video file that yields decoded BGR frames.
///
/// Implementations hold exclusive access to their device or file until
/// `close` runs; `close` must be idempotent and is also run on drop.
pub trait FrameSource: Send {
    /// Short human readable label for logs
    fn name(&self) -> &str;

    fn format(&self) -> StreamFormat;

    fn next_frame(&mut self) -> Result<ReadOutcome, ReadError>;

    fn close(&mut self);

    /// Handle that unblocks a pending `next_frame`, if the backend has one.
    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        None
    }
}

impl std::fmt::Debug for dyn FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("name", &self.name())
            .field("format", &self.format())
            .finish()
    }
}

type OpenFn = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>, OpenError> + Send>;

/// One way of opening a camera, tried in order by [`open_first_readable`].
pub struct CaptureStrategy {
    pub name: String,
    open: OpenFn,
}

impl CaptureStrategy {
    pub fn new<F>(name: impl Into<String>, open: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>, OpenError> + Send + 'static,
    {
        Self {
            name: name.into(),
            open: Box::new(open),
        }
    }
}

/// Try each strategy in order and keep the first that opens and then
/// delivers a frame. Some accelerated backends report a successful open
/// even though the pipeline never produces data, so an open alone is not
/// trusted. A rejected source is closed before the next strategy starts.
pub fn open_first_readable(
    strategies: Vec<CaptureStrategy>,
) -> Result<Box<dyn FrameSource>, OpenError> {
    let mut tried = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        let CaptureStrategy { name, open } = strategy;
        tried.push(name.clone());

        let mut source = match open() {
            Ok(source) => source,
            Err(e) => {
                warn!("Capture strategy {} failed to open: {}", name, e);
                continue;
            }
        };

        match source.next_frame() {
            Ok(ReadOutcome::Frame(frame)) => {
                info!(
                    "Capture strategy {} selected ({}x{})",
                    name,
                    frame.width(),
                    frame.height()
                );
                return Ok(source);
            }
            Ok(ReadOutcome::EndOfStream) => {
                warn!("Capture strategy {} opened but hit end of stream", name);
            }
            Err(e) => {
                warn!("Capture strategy {} opened but is unreadable: {}", name, e);
            }
        }
        source.close();
    }

    Err(OpenError::NoWorkingStrategy { tried })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Probe {
        name: String,
        readable: bool,
        log: Log,
    }

    impl FrameSource for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn format(&self) -> StreamFormat {
            StreamFormat {
                width: 2,
                height: 2,
                fps: 30.0,
            }
        }

        fn next_frame(&mut self) -> Result<ReadOutcome, ReadError> {
            self.log.lock().unwrap().push(format!("read {}", self.name));
            if self.readable {
                Ok(ReadOutcome::Frame(Frame::from_bgr(0, 2, 2, vec![0u8; 12])?))
            } else {
                Err(ReadError::Timeout)
            }
        }

        fn close(&mut self) {
            self.log.lock().unwrap().push(format!("close {}", self.name));
        }
    }

    fn failing(name: &'static str, log: &Log) -> CaptureStrategy {
        let log = log.clone();
        CaptureStrategy::new(name, move || {
            log.lock().unwrap().push(format!("open {}", name));
            Err(OpenError::backend(name, "no such element"))
        })
    }

    fn opening(name: &'static str, readable: bool, log: &Log) -> CaptureStrategy {
        let log = log.clone();
        CaptureStrategy::new(name, move || {
            log.lock().unwrap().push(format!("open {}", name));
            Ok(Box::new(Probe {
                name: name.to_string(),
                readable,
                log,
            }) as Box<dyn FrameSource>)
        })
    }

    #[test]
    fn falls_through_to_first_readable_strategy() {
        let log: Log = Arc::default();
        let strategies = vec![
            failing("a", &log),
            opening("b", false, &log),
            opening("c", true, &log),
        ];

        let source = open_first_readable(strategies).unwrap();
        assert_eq!(source.name(), "c");

        let events = log.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["open a", "open b", "read b", "close b", "open c", "read c"]
        );
    }

    #[test]
    fn reports_every_strategy_when_none_work() {
        let log: Log = Arc::default();
        let err = open_first_readable(vec![failing("a", &log), opening("b", false, &log)])
            .unwrap_err();

        match err {
            OpenError::NoWorkingStrategy { tried } => assert_eq!(tried, vec!["a", "b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_strategy_list_is_an_open_error() {
        assert!(open_first_readable(Vec::new()).is_err());
    }
}
