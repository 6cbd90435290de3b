use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ReadError, RenderError};

/// Three-channel 8-bit image whose channels are stored in B, G, R order.
/// `image` has no BGR pixel type, so drawing code uses `Rgb<u8>` with
/// colours given in BGR order.
pub type BgrImage = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// Decoded BGR frame.
///
/// The pixel buffer is immutable: cloning a frame never aliases writable
/// state, so every consumer effectively holds an independent copy.
#[derive(Clone)]
pub struct Frame {
    /// Tightly packed BGR24 rows, `width * height * 3` bytes
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// When the backend handed the frame over
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Per-source counter, starting at 0
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap a packed BGR buffer, rejecting buffers of the wrong length.
    pub fn from_bgr(
        sequence: u64,
        width: u32,
        height: u32,
        data: impl Into<Bytes>,
    ) -> Result<Self, ReadError> {
        let data = data.into();
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(ReadError::Malformed(format!(
                "{} bytes for {}x{} BGR (expected {})",
                data.len(),
                width,
                height,
                expected
            )));
        }

        Ok(Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
            }),
            timestamp: Instant::now(),
        })
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// Copy the pixels into a mutable working image.
    pub fn to_image(&self) -> Result<BgrImage, RenderError> {
        BgrImage::from_raw(self.width(), self.height(), self.data.to_vec()).ok_or(
            RenderError::BufferSize {
                width: self.width(),
                height: self.height(),
                len: self.data.len(),
            },
        )
    }

    /// Build a new frame from a working image, keeping this frame's
    /// sequence and acquisition time.
    pub fn replace_image(&self, image: BgrImage) -> Frame {
        let (width, height) = image.dimensions();
        let mut meta = FrameMetadata::clone(&self.meta);
        meta.width = width;
        meta.height = height;

        Frame {
            data: Bytes::from(image.into_raw()),
            meta: Arc::new(meta),
            timestamp: self.timestamp,
        }
    }

    /// Resize by `factor` with bilinear filtering. Dimensions are truncated
    /// and never drop below one pixel.
    pub fn scaled(&self, factor: f64) -> Result<Frame, RenderError> {
        if !(factor > 0.0 && factor.is_finite()) {
            return Err(RenderError::InvalidScale(factor));
        }
        if (factor - 1.0).abs() < f64::EPSILON {
            return Ok(self.clone());
        }

        let width = ((self.width() as f64 * factor) as u32).max(1);
        let height = ((self.height() as f64 * factor) as u32).max(1);
        let resized = imageops::resize(&self.to_image()?, width, height, FilterType::Triangle);
        Ok(self.replace_image(resized))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("width", &self.meta.width)
            .field("height", &self.meta.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}
