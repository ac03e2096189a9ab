//! Depth reprojection into colour-camera pixel space.
//!
//! Every valid depth sample is unprojected with the depth intrinsics, moved into
//! colour-camera space and projected onto the nearest colour pixel. When the
//! colour image is denser than the depth image each sample is splatted over a
//! small square footprint so the output has no pinholes. Collisions keep the
//! nearest surface.

use crate::calibration::Calibration;
use crate::types::{Image, BODY_INDEX_BACKGROUND};

/// Depth (and optionally body index) resampled to colour resolution.
#[derive(Debug, Clone)]
pub struct Reprojected {
    /// Depth in millimetres along the colour camera's Z axis. 0 where unmapped.
    pub depth: Image<u16>,
    /// Body index per colour pixel, [`BODY_INDEX_BACKGROUND`] where unmapped.
    pub body_index: Option<Image<u8>>,
}

/// Half-width of the square each depth sample covers in the colour image.
fn footprint_radius(cal: &Calibration) -> i64 {
    let scale_x = cal.color().fx / cal.depth().fx;
    let scale_y = cal.color().fy / cal.depth().fy;
    let scale = scale_x.max(scale_y);
    ((scale - 1.0) / 2.0).ceil().max(0.0) as i64
}

/// Reproject `depth` (and `body_index`, if given) into colour-camera space.
///
/// Output images always have the colour camera's resolution. Depth pixels
/// outside the calibrated depth resolution are ignored.
pub fn depth_to_color(
    cal: &Calibration,
    depth: &Image<u16>,
    body_index: Option<&Image<u8>>,
) -> Reprojected {
    let color = cal.color();
    let (cw, ch) = (color.width, color.height);

    let mut out_depth = vec![0u16; cw * ch];
    let mut out_index = body_index.map(|_| vec![BODY_INDEX_BACKGROUND; cw * ch]);
    let mut nearest = vec![f32::INFINITY; cw * ch];

    let radius = footprint_radius(cal);
    let width = depth.width().min(cal.depth().width);
    let height = depth.height().min(cal.depth().height);
    let samples = depth.pixels();

    for y in 0..height {
        for x in 0..width {
            let d = samples[y * depth.width() + x];
            if d == 0 {
                continue;
            }
            let Some(p) = cal.unproject_depth(x, y, d) else {
                continue;
            };
            let pc = cal.depth_to_color().apply(p);
            let Some(px) = color.project(pc) else {
                continue;
            };
            let z = pc[2];
            let label = body_index
                .and_then(|b| b.get(x, y))
                .unwrap_or(BODY_INDEX_BACKGROUND);

            let (u, v) = (px[0].round() as i64, px[1].round() as i64);
            let x0 = u.saturating_sub(radius).max(0);
            let x1 = u.saturating_add(radius).min(cw as i64 - 1);
            let y0 = v.saturating_sub(radius).max(0);
            let y1 = v.saturating_add(radius).min(ch as i64 - 1);
            for yy in y0..=y1 {
                for xx in x0..=x1 {
                    let i = yy as usize * cw + xx as usize;
                    if z < nearest[i] {
                        nearest[i] = z;
                        out_depth[i] = z.round().clamp(1.0, u16::MAX as f32) as u16;
                        if let Some(index) = out_index.as_mut() {
                            index[i] = label;
                        }
                    }
                }
            }
        }
    }

    Reprojected {
        depth: Image::from_pixels(cw, ch, out_depth)
            .unwrap_or_else(|_| Image::filled(cw, ch, 0)),
        body_index: out_index.map(|index| {
            Image::from_pixels(cw, ch, index)
                .unwrap_or_else(|_| Image::filled(cw, ch, BODY_INDEX_BACKGROUND))
        }),
    }
}
