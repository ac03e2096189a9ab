//! Per-mode pixel fusion.
//!
//! Every rule takes the colour image as its base layer and returns an image at
//! colour resolution. Rules never fail; bad inputs degrade to the base colour.

use crate::calibration::Calibration;
use crate::overlay::{self, PixelRect};
use crate::telemetry::{self, TelemetryUpdate};
use crate::types::{
    Bgra, Body, Image, JointConfidence, JointId, OutputFrame, Prediction, BODY_INDEX_BACKGROUND,
};
use std::sync::Arc;

pub const PALETTE_SIZE: usize = 9;

/// Display colour per trackable body slot. Bodies beyond the table are not drawn.
pub type Palette = [Bgra; PALETTE_SIZE];

pub const BODY_PALETTE: Palette = [
    Bgra { b: 255, g: 0, r: 0, a: 255 },
    Bgra { b: 0, g: 255, r: 0, a: 255 },
    Bgra { b: 0, g: 0, r: 255, a: 255 },
    Bgra { b: 255, g: 255, r: 0, a: 255 },
    Bgra { b: 255, g: 255, r: 255, a: 255 },
    Bgra { b: 0, g: 255, r: 255, a: 255 },
    Bgra { b: 128, g: 255, r: 0, a: 255 },
    Bgra { b: 128, g: 128, r: 0, a: 255 },
    Bgra { b: 128, g: 128, r: 128, a: 255 },
];

/// Depth at or beyond this distance (mm) is treated as infinitely far.
pub const DEPTH_FAR_MM: u16 = 2000;

/// Detections at or below this probability are ignored.
pub const DEFAULT_PROBABILITY_THRESHOLD: f64 = 0.6;

/// Tint one colour pixel by its reprojected depth in millimetres.
///
/// No reading blacks out the colour channels; 1.0-1.2 m ramps red,
/// 1.2-1.5 m ramps green, 1.5-2.0 m ramps blue; anything farther is zeroed
/// entirely, alpha included.
pub fn depth_pixel(base: Bgra, depth_mm: u16) -> Bgra {
    let ramp = |start: u16| 255 - (255 / (depth_mm - start)) as u8;
    match depth_mm {
        0 => Bgra {
            b: 0,
            g: 0,
            r: 0,
            a: base.a,
        },
        1000..=1199 => Bgra {
            r: ramp(999),
            ..base
        },
        1200..=1499 => Bgra {
            g: ramp(1199),
            ..base
        },
        1500..=1999 => Bgra {
            b: ramp(1499),
            ..base
        },
        d if d >= DEPTH_FAR_MM => Bgra::ZERO,
        _ => base,
    }
}

/// Overlay a palette colour on a body pixel.
///
/// A zero palette channel keeps the base channel, so e.g. pure red only
/// replaces the red channel of the camera image.
pub fn body_mask_pixel(base: Bgra, color: Bgra) -> Bgra {
    let pick = |palette: u8, base: u8| if palette == 0 { base } else { palette };
    Bgra {
        b: pick(color.b, base.b),
        g: pick(color.g, base.g),
        r: pick(color.r, base.r),
        a: pick(color.a, base.a),
    }
}

pub fn depth(color: &Image<Bgra>, depth: &Image<u16>) -> Image<Bgra> {
    let mut out = color.clone();
    let samples = depth.pixels();
    for (i, px) in out.pixels_mut().iter_mut().enumerate() {
        let d = samples.get(i).copied().unwrap_or(0);
        *px = depth_pixel(*px, d);
    }
    out
}

pub fn body_mask(color: &Image<Bgra>, body_index: &Image<u8>, palette: &Palette) -> Image<Bgra> {
    let mut out = color.clone();
    let index = body_index.pixels();
    for (i, px) in out.pixels_mut().iter_mut().enumerate() {
        let body = index.get(i).copied().unwrap_or(BODY_INDEX_BACKGROUND);
        if body == BODY_INDEX_BACKGROUND {
            continue;
        }
        if let Some(&c) = palette.get(body as usize) {
            *px = body_mask_pixel(*px, c);
        }
    }
    out
}

/// Draw a marker for every confident joint and report each joint's confidence.
pub fn skeleton(
    color: &Image<Bgra>,
    bodies: &[Body],
    calibration: &Calibration,
    palette: &Palette,
) -> (Image<Bgra>, Vec<TelemetryUpdate>) {
    let mut out = color.clone();
    let mut updates = Vec::new();

    for (b, (body, &c)) in bodies.iter().zip(palette.iter()).enumerate() {
        for joint_id in JointId::ALL {
            let joint = body.joint(joint_id);
            updates.push(TelemetryUpdate::upsert(
                telemetry::joint_item_name(b, joint_id),
                joint.confidence.name(),
            ));

            if joint.confidence < JointConfidence::Medium {
                continue;
            }
            if let Some(center) = calibration.depth_point_to_color_pixel(joint.position) {
                overlay::draw_marker(&mut out, center, c);
            }
        }
    }

    (out, updates)
}

/// Redden every pixel inside a sufficiently confident detection box.
pub fn brand_overlay(
    color: &Image<Bgra>,
    predictions: &[Prediction],
    threshold: f64,
) -> Image<Bgra> {
    let mut out = color.clone();
    let (w, h) = (out.width(), out.height());
    for p in predictions.iter().filter(|p| p.probability > threshold) {
        overlay::tint_red(&mut out, PixelRect::from_normalized(&p.bounding_box, w, h));
    }
    out
}

/// One finished frame plus the telemetry changes it produced.
#[derive(Debug, Clone)]
pub struct Composite {
    pub frame: OutputFrame,
    pub telemetry: Vec<TelemetryUpdate>,
}

impl Composite {
    pub fn image(frame: OutputFrame) -> Self {
        Self {
            frame,
            telemetry: Vec::new(),
        }
    }
}

/// Session-bound view of the fusion rules.
pub struct Compositor {
    calibration: Arc<Calibration>,
    palette: Palette,
    threshold: f64,
}

impl Compositor {
    pub fn new(calibration: Arc<Calibration>, palette: Palette, threshold: f64) -> Self {
        Self {
            calibration,
            palette,
            threshold,
        }
    }

    pub fn calibration(&self) -> &Arc<Calibration> {
        &self.calibration
    }

    pub fn depth(&self, color: &Image<Bgra>, reprojected_depth: &Image<u16>) -> Composite {
        Composite::image(OutputFrame::Bgra32(depth(color, reprojected_depth)))
    }

    pub fn body_mask(&self, color: &Image<Bgra>, body_index: &Image<u8>, bodies: usize) -> Composite {
        Composite {
            frame: OutputFrame::Bgra32(body_mask(color, body_index, &self.palette)),
            telemetry: vec![TelemetryUpdate::upsert(
                telemetry::NUMBER_OF_BODIES,
                bodies.to_string(),
            )],
        }
    }

    pub fn skeleton(&self, color: &Image<Bgra>, bodies: &[Body]) -> Composite {
        let (img, joints) = skeleton(color, bodies, &self.calibration, &self.palette);
        let mut updates = Vec::with_capacity(joints.len() + 1);
        updates.push(TelemetryUpdate::upsert(
            telemetry::NUMBER_OF_BODIES,
            bodies.len().to_string(),
        ));
        updates.extend(joints);
        Composite {
            frame: OutputFrame::Bgra32(img),
            telemetry: updates,
        }
    }

    pub fn brand_overlay(&self, color: &Image<Bgra>, predictions: &[Prediction]) -> Composite {
        Composite::image(OutputFrame::Bgra32(brand_overlay(
            color,
            predictions,
            self.threshold,
        )))
    }
}
