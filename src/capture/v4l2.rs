//! Direct V4L2 capture, the unaccelerated fallback strategy

use std::io::ErrorKind;
use std::time::Duration;

use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::decoder::{self, PixelFormat};
use crate::capture::frame::Frame;
use crate::capture::source::{CaptureStrategy, FrameSource, ReadOutcome, StreamFormat};
use crate::error::{OpenError, ReadError};
use crate::utils::device_path;
use crate::CaptureConfig;

/// Memory-mapped V4L2 capture
pub struct V4l2Capture {
    name: String,
    device: Option<Box<Device>>,
    stream: Option<MmapStream<'static>>,
    format: StreamFormat,
    pixel_format: PixelFormat,
    sequence: u64,
}

impl V4l2Capture {
    /// Open the device, negotiate MJPEG (or YUYV) and start streaming.
    #[instrument(skip(config), fields(device = config.device))]
    pub fn open(config: &CaptureConfig) -> Result<Self, OpenError> {
        let path = device_path(config.device);
        let device = Device::with_path(&path).map_err(|e| OpenError::backend(&path, e))?;

        let caps = device.query_caps().map_err(|e| OpenError::backend(&path, e))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(OpenError::backend(&path, "device doesn't support video capture"));
        }

        // Prefer MJPEG, fall back to YUYV
        let mut negotiated = None;
        for (fourcc, pixel_format) in [
            (FourCC::new(b"MJPG"), PixelFormat::Mjpeg),
            (FourCC::new(b"YUYV"), PixelFormat::Yuyv4),
        ] {
            let mut fmt = device.format().map_err(|e| OpenError::backend(&path, e))?;
            if let (Some(w), Some(h)) = (config.width, config.height) {
                fmt.width = w;
                fmt.height = h;
            }
            fmt.fourcc = fourcc;

            match device.set_format(&fmt) {
                Ok(actual) if actual.fourcc == fourcc => {
                    negotiated = Some((actual, pixel_format));
                    break;
                }
                Ok(actual) => warn!("{} refused {}, offered {}", path, fourcc, actual.fourcc),
                Err(e) => warn!("{} rejected {}: {}", path, fourcc, e),
            }
        }

        let (fmt, pixel_format) = negotiated
            .ok_or_else(|| OpenError::backend(&path, "no MJPEG or YUYV support"))?;

        // Small queue so frames stay fresh
        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
            .map_err(|e| OpenError::backend(&path, e))?;
        stream.set_timeout(Duration::from_millis(config.read_timeout_ms));

        info!(
            "Capture stream started: {}x{} {:?} with {} buffers",
            fmt.width, fmt.height, pixel_format, config.buffer_count
        );

        Ok(Self {
            name: format!("v4l2 {}", path),
            device: Some(Box::new(device)),
            stream: Some(stream),
            format: StreamFormat {
                width: fmt.width,
                height: fmt.height,
                fps: config.fps as f64,
            },
            pixel_format,
            sequence: 0,
        })
    }

    /// Strategy wrapper for the camera probe.
    pub fn strategy(config: &CaptureConfig) -> CaptureStrategy {
        let config = config.clone();
        CaptureStrategy::new("v4l2-direct", move || {
            Ok(Box::new(V4l2Capture::open(&config)?) as Box<dyn FrameSource>)
        })
    }
}

impl FrameSource for V4l2Capture {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn next_frame(&mut self) -> Result<ReadOutcome, ReadError> {
        let stream = self.stream.as_mut().ok_or(ReadError::Closed)?;

        let (buf, meta) = stream.next().map_err(|e| match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted => {
                ReadError::Timeout
            }
            _ => ReadError::Backend(e.to_string()),
        })?;

        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };
        let (width, height, bgr) = decoder::decode_frame(
            &buf[..used],
            self.pixel_format,
            self.format.width,
            self.format.height,
        )?;
        let frame = Frame::from_bgr(self.sequence, width, height, bgr)?;
        self.sequence += 1;

        Ok(ReadOutcome::Frame(frame))
    }

    fn close(&mut self) {
        // Stream must go before the device handle
        self.stream.take();
        self.device.take();
    }
}

impl Drop for V4l2Capture {
    fn drop(&mut self) {
        self.close();
    }
}
