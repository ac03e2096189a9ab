use crate::types::{Bgra, BoundingBox, Image};

/// Joint markers are squares of `2 * MARKER_HALF_SIZE + 1` pixels.
pub const MARKER_HALF_SIZE: i64 = 6;

/// Axis-aligned pixel rectangle, already clipped to its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelRect {
    /// Scale a normalized bounding box to pixels of a `width` x `height` image.
    ///
    /// Each coordinate is truncated toward zero, then the rectangle is clipped
    /// to the image.
    pub fn from_normalized(b: &BoundingBox, width: usize, height: usize) -> PixelRect {
        let scale = |v: f64, extent: usize| -> i64 {
            let v = v * extent as f64;
            if v.is_finite() {
                v as i64
            } else {
                0
            }
        };

        let x0 = scale(b.left, width);
        let y0 = scale(b.top, height);
        let x1 = x0.saturating_add(scale(b.width, width));
        let y1 = y0.saturating_add(scale(b.height, height));

        let clip = |v: i64, extent: usize| v.clamp(0, extent as i64) as usize;
        let (x0, x1) = (clip(x0, width), clip(x1, width));
        let (y0, y1) = (clip(y0, height), clip(y1, height));

        PixelRect {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Fill a square marker centred on the rounded `center`, clipped to the image.
pub fn draw_marker(img: &mut Image<Bgra>, center: [f32; 2], color: Bgra) {
    if !center[0].is_finite() || !center[1].is_finite() {
        return;
    }
    let cx = center[0].round_ties_even() as i64;
    let cy = center[1].round_ties_even() as i64;
    let (w, h) = (img.width() as i64, img.height() as i64);

    let x0 = cx.saturating_sub(MARKER_HALF_SIZE).max(0);
    let x1 = cx.saturating_add(MARKER_HALF_SIZE).min(w - 1);
    let y0 = cy.saturating_sub(MARKER_HALF_SIZE).max(0);
    let y1 = cy.saturating_add(MARKER_HALF_SIZE).min(h - 1);
    if x0 > x1 || y0 > y1 {
        return;
    }

    let row = img.width();
    let pixels = img.pixels_mut();
    for y in y0..=y1 {
        let start = y as usize * row;
        pixels[start + x0 as usize..=start + x1 as usize].fill(color);
    }
}

/// Saturate the red channel of every pixel inside `rect`.
pub fn tint_red(img: &mut Image<Bgra>, rect: PixelRect) {
    let row = img.width();
    let pixels = img.pixels_mut();
    for y in rect.y..rect.y + rect.height {
        for x in rect.x..rect.x + rect.width {
            pixels[y * row + x].r = 255;
        }
    }
}
