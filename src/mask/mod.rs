//! Freehand mask drawing surface.
//!
//! Strokes are stamped into an owned RGBA buffer with the same pixel size as
//! the image being edited. Exporting turns every touched pixel (alpha > 0)
//! into opaque white and everything else into opaque black.

use image::{Rgba, RgbaImage};

use crate::{
    error::AppResult,
    imaging::{encode_png_optimized, image_dimensions},
    models::ImagePayload,
};

const BRUSH_COLOR: Rgba<u8> = Rgba([255, 64, 64, 160]);
const EDIT_PIXEL: Rgba<u8> = Rgba([255, 255, 255, 255]);
const KEEP_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub points: Vec<(f32, f32)>,
    /// Brush diameter in pixels.
    pub brush_size: f32,
}

/// What the session controller needs from a drawing surface.
pub trait MaskCanvas {
    fn draw(&mut self, stroke: &Stroke);
    /// Lossless black/white PNG, or `None` when the surface has no area.
    fn export(&self) -> AppResult<Option<Vec<u8>>>;
    fn clear(&mut self);
    fn is_empty(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct MaskSurface {
    canvas: RgbaImage,
}

impl MaskSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
        }
    }

    /// A blank surface sized to match `image`.
    pub fn for_image(image: &ImagePayload) -> AppResult<Self> {
        let (width, height) = image_dimensions(&image.bytes)?;
        Ok(Self::new(width, height))
    }

    /// Wraps an existing overlay; any pixel with alpha counts as painted.
    pub fn from_overlay(canvas: RgbaImage) -> Self {
        Self { canvas }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    fn stamp(&mut self, cx: f32, cy: f32, radius: f32) {
        let (width, height) = self.canvas.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        let x_min = (cx - radius).floor().max(0.0) as u32;
        let y_min = (cy - radius).floor().max(0.0) as u32;
        let x_max = ((cx + radius).ceil().max(0.0) as u32).min(width - 1);
        let y_max = ((cy + radius).ceil().max(0.0) as u32).min(height - 1);
        let radius_sq = radius * radius;

        for y in y_min..=y_max {
            for x in x_min..=x_max {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= radius_sq {
                    self.canvas.put_pixel(x, y, BRUSH_COLOR);
                }
            }
        }
    }
}

impl MaskCanvas for MaskSurface {
    fn draw(&mut self, stroke: &Stroke) {
        let radius = (stroke.brush_size / 2.0).max(0.5);
        let spacing = (radius / 2.0).max(0.5);

        let Some(&(first_x, first_y)) = stroke.points.first() else {
            return;
        };
        self.stamp(first_x, first_y, radius);

        for pair in stroke.points.windows(2) {
            let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
            let length = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
            let steps = (length / spacing).ceil().max(1.0) as u32;
            for step in 1..=steps {
                let t = step as f32 / steps as f32;
                self.stamp(x0 + (x1 - x0) * t, y0 + (y1 - y0) * t, radius);
            }
        }
    }

    fn export(&self) -> AppResult<Option<Vec<u8>>> {
        let (width, height) = self.canvas.dimensions();
        if width == 0 || height == 0 {
            return Ok(None);
        }

        let mask = RgbaImage::from_fn(width, height, |x, y| {
            if self.canvas.get_pixel(x, y)[3] > 0 {
                EDIT_PIXEL
            } else {
                KEEP_PIXEL
            }
        });

        encode_png_optimized(mask.as_raw(), width, height).map(Some)
    }

    fn clear(&mut self) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn is_empty(&self) -> bool {
        self.canvas.pixels().all(|pixel| pixel[3] == 0)
    }
}
