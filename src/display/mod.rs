pub mod font;
pub mod overlay;
pub mod recorder;

#[cfg(feature = "sdl-display")]
pub mod display;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_recorder;

#[cfg(feature = "sdl-display")]
pub use display::Sdl2Display;
pub use overlay::{OverlayConfig, OverlayRenderer, Renderer, TextStyle};
pub use recorder::{DefaultSinkFactory, SinkFactory, SinkSpec, VideoSink};

use crate::capture::Frame;
use crate::error::DisplayError;

/// Key or window event reported by a display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Char(char),
    Escape,
    /// Window closed by the user
    Close,
}

/// On-screen output. `poll_key` never blocks.
pub trait Display {
    fn show(&mut self, window: &str, frame: &Frame) -> Result<(), DisplayError>;

    fn poll_key(&mut self) -> Option<KeyCode>;

    /// Release windows and other display resources
    fn close(&mut self) {}
}
