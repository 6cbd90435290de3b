//! SDL2 Window Display Module
//! Shows annotated BGR frames in a window and reports key presses.
//! The window is created on the first frame and follows its size.

use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::{EventPump, Sdl, VideoSubsystem};
use tracing::info;

use crate::capture::Frame;
use crate::display::{Display, KeyCode};
use crate::error::DisplayError;

struct Surface {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    width: u32,
    height: u32,
}

/// SDL2 window. Must stay on the thread that created it.
pub struct Sdl2Display {
    // Dropped in declaration order: window before the context
    surface: Option<Surface>,
    event_pump: EventPump,
    video: VideoSubsystem,
    _sdl: Sdl,
}

impl Sdl2Display {
    pub fn new() -> Result<Self, DisplayError> {
        let sdl = sdl2::init().map_err(DisplayError::Backend)?;
        let video = sdl.video().map_err(DisplayError::Backend)?;
        let event_pump = sdl.event_pump().map_err(DisplayError::Backend)?;

        Ok(Self {
            surface: None,
            event_pump,
            video,
            _sdl: sdl,
        })
    }

    fn surface(
        &mut self,
        title: &str,
        width: u32,
        height: u32,
    ) -> Result<&mut Surface, DisplayError> {
        let stale = self
            .surface
            .as_ref()
            .is_some_and(|s| s.width != width || s.height != height);

        if stale {
            if let Some(surface) = self.surface.as_mut() {
                surface
                    .canvas
                    .window_mut()
                    .set_size(width, height)
                    .map_err(|e| DisplayError::Backend(e.to_string()))?;
                surface.width = width;
                surface.height = height;
            }
        }

        if self.surface.is_none() {
            info!("Opening window {:?} at {}x{}", title, width, height);
            let window = self
                .video
                .window(title, width, height)
                .position_centered()
                .build()
                .map_err(|e| DisplayError::Backend(e.to_string()))?;
            let canvas = window
                .into_canvas()
                .build()
                .map_err(|e| DisplayError::Backend(e.to_string()))?;
            let texture_creator = canvas.texture_creator();

            self.surface = Some(Surface {
                canvas,
                texture_creator,
                width,
                height,
            });
        }

        self.surface
            .as_mut()
            .ok_or_else(|| DisplayError::Backend("window unavailable".into()))
    }
}

impl Display for Sdl2Display {
    fn show(&mut self, window: &str, frame: &Frame) -> Result<(), DisplayError> {
        let (width, height) = (frame.width(), frame.height());
        let surface = self.surface(window, width, height)?;

        let mut texture = surface
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::BGR24, width, height)
            .map_err(|e| DisplayError::Backend(e.to_string()))?;

        texture
            .update(None, &frame.data, (width * 3) as usize)
            .map_err(|e| DisplayError::Backend(e.to_string()))?;

        surface.canvas.clear();
        surface
            .canvas
            .copy(&texture, None, None)
            .map_err(DisplayError::Backend)?;
        surface.canvas.present();
        Ok(())
    }

    fn poll_key(&mut self) -> Option<KeyCode> {
        while let Some(event) = self.event_pump.poll_event() {
            match event {
                Event::Quit { .. } => {
                    info!("Quit event received");
                    return Some(KeyCode::Close);
                }
                Event::KeyDown {
                    keycode: Some(key), ..
                } => {
                    if key == Keycode::Escape {
                        return Some(KeyCode::Escape);
                    }
                    let name = key.name();
                    let mut chars = name.chars();
                    if let (Some(c), None) = (chars.next(), chars.next()) {
                        return Some(KeyCode::Char(c.to_ascii_lowercase()));
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn close(&mut self) {
        self.surface = None;
    }
}
