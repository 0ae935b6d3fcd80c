use crate::landmarks::HandLandmarks;
use image::{Rgb, RgbImage};

pub const MATCH_COLOR: Rgb<u8> = Rgb([0x22, 0xc5, 0x5e]);
pub const MISMATCH_COLOR: Rgb<u8> = Rgb([0xef, 0x44, 0x44]);
pub const STROKE_WIDTH: u32 = 4;

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Box around all landmarks, padded and clamped to the frame. Returns
    /// `None` for a zero-sized frame or a hand entirely outside it.
    pub fn around(hand: &HandLandmarks, frame_width: u32, frame_height: u32, padding: u32) -> Option<Self> {
        if frame_width == 0 || frame_height == 0 {
            return None;
        }
        let (fw, fh) = (frame_width as f32, frame_height as f32);
        let padding = padding as f32;

        let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
        let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
        for landmark in hand.as_slice() {
            let (x, y) = (landmark.x() * fw, landmark.y() * fh);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }

        let x = (min_x - padding).max(0.0);
        let y = (min_y - padding).max(0.0);
        let width = (fw - x).min(max_x - min_x + padding * 2.0);
        let height = (fh - y).min(max_y - min_y + padding * 2.0);

        if width <= 0.0 || height <= 0.0 {
            None
        } else {
            Some(Self {
                x,
                y,
                width,
                height,
            })
        }
    }
}

pub fn color_for(matched: bool) -> Rgb<u8> {
    if matched {
        MATCH_COLOR
    } else {
        MISMATCH_COLOR
    }
}

/// Stroke the box outline onto `image`, inset so the stroke stays inside it.
pub fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let (iw, ih) = image.dimensions();
    if iw == 0 || ih == 0 {
        return;
    }
    let x0 = (bbox.x.max(0.0) as u32).min(iw - 1);
    let y0 = (bbox.y.max(0.0) as u32).min(ih - 1);
    let x1 = ((bbox.x + bbox.width).max(0.0) as u32).min(iw).max(x0 + 1) - 1;
    let y1 = ((bbox.y + bbox.height).max(0.0) as u32).min(ih).max(y0 + 1) - 1;

    for y in y0..=y1 {
        for x in x0..=x1 {
            let on_edge = x - x0 < STROKE_WIDTH
                || x1 - x < STROKE_WIDTH
                || y - y0 < STROKE_WIDTH
                || y1 - y < STROKE_WIDTH;
            if on_edge {
                image.put_pixel(x, y, color);
            }
        }
    }
}
