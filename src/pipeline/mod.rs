pub mod controller;
pub mod detector;
pub mod fps;
pub mod slot;

pub use controller::{PipelineController, PipelineState, RunSummary, StopHandle};
pub use detector::{BoundingBox, DetectionResult, Detector, NullDetector};
pub use fps::FpsMeter;
pub use slot::{SharedFrameSlot, SlotStats};
