//! Detector contract and detection results

use crate::capture::Frame;
use crate::error::DetectorError;

/// Axis-aligned box in source-frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub label: String,
    pub confidence: f32,
}

/// Boxes computed for one frame. Order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    /// Sequence of the frame these boxes were computed from
    pub frame_sequence: u64,
    pub boxes: Vec<BoundingBox>,
}

impl DetectionResult {
    pub fn new(frame_sequence: u64, boxes: Vec<BoundingBox>) -> Self {
        Self {
            frame_sequence,
            boxes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }
}

/// A trained object detector. Called synchronously from the main loop and
/// may take tens of milliseconds. Must not assume ownership of the frame.
pub trait Detector {
    fn detect(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<DetectionResult, DetectorError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<DetectionResult, DetectorError> {
        (**self).detect(frame, confidence_threshold)
    }
}

/// Detector that never finds anything, for running the capture, overlay and
/// recording path without a model.
#[derive(Debug, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn detect(&mut self, frame: &Frame, _: f32) -> Result<DetectionResult, DetectorError> {
        Ok(DetectionResult::new(frame.sequence(), Vec::new()))
    }
}
