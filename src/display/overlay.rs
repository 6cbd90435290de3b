//! Detection boxes and text drawn onto working copies of frames

use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::capture::frame::{BgrImage, Frame};
use crate::display::font::{self, GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};
use crate::error::RenderError;
use crate::pipeline::{BoundingBox, DetectionResult};

/// BGR green, the FPS readout colour
pub const GREEN: [u8; 3] = [0, 255, 0];
const WHITE: [u8; 3] = [255, 255, 255];

/// Class colours, BGR
const PALETTE: [[u8; 3]; 10] = [
    [0x38, 0x38, 0xFF],
    [0x97, 0x9D, 0xFF],
    [0x1F, 0x70, 0xFF],
    [0x1D, 0xB2, 0xFF],
    [0x31, 0xD2, 0xCF],
    [0x0A, 0xF9, 0x48],
    [0x17, 0xCC, 0x92],
    [0x86, 0xDB, 0x3D],
    [0x34, 0x93, 0x1A],
    [0xBB, 0xD4, 0x00],
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    /// BGR
    pub color: [u8; 3],
    /// Integer magnification of the 5x7 font
    pub scale: u32,
}

/// Draws overlays. Every call returns a new frame and leaves its input
/// untouched, so overlays never accumulate across iterations.
pub trait Renderer {
    fn draw(&self, frame: &Frame, result: &DetectionResult) -> Result<Frame, RenderError>;

    /// Draw `text` with its top-left corner at `origin`.
    fn draw_text(
        &self,
        frame: &Frame,
        text: &str,
        origin: (i32, i32),
        style: &TextStyle,
    ) -> Result<Frame, RenderError>;

    /// Rendered size of `text` in pixels
    fn text_size(&self, text: &str, style: &TextStyle) -> (u32, u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub box_thickness: u32,
    pub label_scale: u32,
    pub text_scale: u32,
    pub show_confidence: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            box_thickness: 2,
            label_scale: 2,
            text_scale: 3,
            show_confidence: false,
        }
    }
}

/// Renderer backed by `imageproc` and the built-in bitmap font
#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    config: OverlayConfig,
}

impl OverlayRenderer {
    pub fn new(config: OverlayConfig) -> Self {
        Self { config }
    }

    fn draw_box(&self, image: &mut BgrImage, bbox: &BoundingBox) {
        let (img_w, img_h) = image.dimensions();
        let x0 = bbox.x.max(0.0).floor() as i32;
        let y0 = bbox.y.max(0.0).floor() as i32;
        let x1 = (bbox.x + bbox.width).min(img_w as f32).ceil() as i32;
        let y1 = (bbox.y + bbox.height).min(img_h as f32).ceil() as i32;
        if x1 <= x0 || y1 <= y0 {
            return;
        }

        let color = Rgb(class_color(&bbox.label));
        for inset in 0..self.config.box_thickness.max(1) as i32 {
            let w = x1 - x0 - 2 * inset;
            let h = y1 - y0 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(x0 + inset, y0 + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, rect, color);
        }

        let label = if self.config.show_confidence {
            format!("{} {:.2}", bbox.label, bbox.confidence)
        } else {
            bbox.label.clone()
        };
        if label.is_empty() {
            return;
        }

        // Label plate sits above the box, or just inside it at the top edge
        let scale = self.config.label_scale.max(1);
        let (text_w, text_h) = font::text_extent(&label, scale);
        let pad = scale as i32;
        let plate_h = text_h as i32 + 2 * pad;
        let plate_y = if y0 >= plate_h { y0 - plate_h } else { y0 };
        let plate = Rect::at(x0, plate_y).of_size(text_w + 2 * pad as u32, plate_h as u32);
        draw_filled_rect_mut(image, plate, color);
        paint_text(image, &label, (x0 + pad, plate_y + pad), WHITE, scale);
    }
}

impl Renderer for OverlayRenderer {
    fn draw(&self, frame: &Frame, result: &DetectionResult) -> Result<Frame, RenderError> {
        let mut image = frame.to_image()?;
        for bbox in &result.boxes {
            self.draw_box(&mut image, bbox);
        }
        Ok(frame.replace_image(image))
    }

    fn draw_text(
        &self,
        frame: &Frame,
        text: &str,
        origin: (i32, i32),
        style: &TextStyle,
    ) -> Result<Frame, RenderError> {
        let mut image = frame.to_image()?;
        paint_text(&mut image, text, origin, style.color, style.scale.max(1));
        Ok(frame.replace_image(image))
    }

    fn text_size(&self, text: &str, style: &TextStyle) -> (u32, u32) {
        font::text_extent(text, style.scale.max(1))
    }
}

/// Paint glyphs pixel-block by pixel-block; out-of-bounds blocks are clipped
/// by `imageproc`.
fn paint_text(image: &mut BgrImage, text: &str, origin: (i32, i32), color: [u8; 3], scale: u32) {
    let color = Rgb(color);
    let step = scale as i32;
    let mut x = origin.0;

    for c in text.chars() {
        let columns = font::glyph(c);
        for col in 0..GLYPH_WIDTH as i32 {
            let bits = columns[col as usize];
            for row in 0..GLYPH_HEIGHT as i32 {
                if bits >> row & 1 == 1 {
                    let block = Rect::at(x + col * step, origin.1 + row * step).of_size(scale, scale);
                    draw_filled_rect_mut(image, block, color);
                }
            }
        }
        x += GLYPH_ADVANCE as i32 * step;
    }
}

fn class_color(label: &str) -> [u8; 3] {
    // FNV-1a keeps colours stable across runs
    let hash = label
        .bytes()
        .fold(0x811c9dc5u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193));
    PALETTE[hash as usize % PALETTE.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(width: u32, height: u32) -> Frame {
        Frame::from_bgr(0, width, height, vec![0u8; (width * height * 3) as usize]).unwrap()
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * frame.width() + x) * 3) as usize;
        [frame.data[i], frame.data[i + 1], frame.data[i + 2]]
    }

    #[test]
    fn draw_returns_new_frame_and_keeps_input() {
        let frame = blank(64, 48);
        let result = DetectionResult::new(
            0,
            vec![BoundingBox {
                x: 10.0,
                y: 20.0,
                width: 20.0,
                height: 20.0,
                label: "ace".into(),
                confidence: 0.9,
            }],
        );

        let renderer = OverlayRenderer::default();
        let annotated = renderer.draw(&frame, &result).unwrap();

        assert!(frame.data.iter().all(|b| *b == 0));
        assert_eq!(pixel(&annotated, 10, 30), class_color("ace"));
        assert_eq!(pixel(&annotated, 20, 30), [0, 0, 0]);
    }

    #[test]
    fn boxes_outside_the_frame_are_ignored() {
        let frame = blank(16, 16);
        let result = DetectionResult::new(
            0,
            vec![BoundingBox {
                x: 40.0,
                y: 40.0,
                width: 5.0,
                height: 5.0,
                label: "off".into(),
                confidence: 0.5,
            }],
        );
        let annotated = OverlayRenderer::default().draw(&frame, &result).unwrap();
        assert!(annotated.data.iter().all(|b| *b == 0));
    }

    #[test]
    fn text_lands_inside_measured_extent() {
        let frame = blank(80, 20);
        let style = TextStyle {
            color: GREEN,
            scale: 1,
        };
        let renderer = OverlayRenderer::default();
        let (w, h) = renderer.text_size("FPS", &style);
        let out = renderer.draw_text(&frame, "FPS", (2, 3), &style).unwrap();

        for y in 0..out.height() {
            for x in 0..out.width() {
                let inside = x >= 2 && x < 2 + w && y >= 3 && y < 3 + h;
                if !inside {
                    assert_eq!(pixel(&out, x, y), [0, 0, 0], "stray pixel at {x},{y}");
                }
            }
        }
        // Top-left of 'F' is lit
        assert_eq!(pixel(&out, 2, 3), GREEN);
    }

    #[test]
    fn text_past_the_edge_is_clipped() {
        let frame = blank(10, 10);
        let style = TextStyle {
            color: GREEN,
            scale: 2,
        };
        let out = OverlayRenderer::default()
            .draw_text(&frame, "FPS: 99.9", (-4, 5), &style)
            .unwrap();
        assert_eq!(out.data.len(), frame.data.len());
    }
}
