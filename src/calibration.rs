//! Per-session sensor calibration.
//!
//! Intrinsics are supplied by the device provider; nothing here estimates them.
//! The calibration also carries a precomputed ray table for the depth camera so
//! the reprojector does not divide by the focal length per pixel.

use crate::{FuseError, Result};

/// Pinhole intrinsics for one camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub width: usize,
    pub height: usize,
    /// Focal length x (pixels).
    pub fx: f32,
    /// Focal length y (pixels).
    pub fy: f32,
    /// Principal point x (pixels).
    pub cx: f32,
    /// Principal point y (pixels).
    pub cy: f32,
}

impl CameraIntrinsics {
    /// Project a camera-space point (millimetres, +Z forward) to pixel coordinates.
    /// Points at or behind the image plane have no projection.
    pub fn project(&self, p: [f32; 3]) -> Option<[f32; 2]> {
        if p[2] <= 0.0 {
            return None;
        }
        Some([
            self.fx * p[0] / p[2] + self.cx,
            self.fy * p[1] / p[2] + self.cy,
        ])
    }

    fn validate(&self, which: &str) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(FuseError::Config(format!("{} camera has zero resolution", which)));
        }
        if !(self.fx > 0.0 && self.fy > 0.0) {
            return Err(FuseError::Config(format!(
                "{} camera focal length must be positive",
                which
            )));
        }
        Ok(())
    }
}

/// Rigid transform from depth-camera space to colour-camera space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrinsics {
    /// 3x3 row-major rotation matrix.
    pub rotation: [[f32; 3]; 3],
    /// Translation in millimetres.
    pub translation: [f32; 3],
}

impl Extrinsics {
    pub const IDENTITY: Extrinsics = Extrinsics {
        rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        translation: [0.0, 0.0, 0.0],
    };

    pub fn apply(&self, p: [f32; 3]) -> [f32; 3] {
        let r = &self.rotation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + self.translation[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + self.translation[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + self.translation[2],
        ]
    }
}

/// Immutable calibration for the colour and depth cameras.
#[derive(Debug, Clone)]
pub struct Calibration {
    depth: CameraIntrinsics,
    color: CameraIntrinsics,
    depth_to_color: Extrinsics,
    /// Normalized (x/z, y/z) ray per depth pixel, row-major.
    depth_rays: Vec<[f32; 2]>,
}

impl Calibration {
    pub fn new(
        depth: CameraIntrinsics,
        color: CameraIntrinsics,
        depth_to_color: Extrinsics,
    ) -> Result<Calibration> {
        depth.validate("depth")?;
        color.validate("colour")?;

        let mut depth_rays = Vec::with_capacity(depth.width * depth.height);
        for y in 0..depth.height {
            for x in 0..depth.width {
                depth_rays.push([
                    (x as f32 - depth.cx) / depth.fx,
                    (y as f32 - depth.cy) / depth.fy,
                ]);
            }
        }

        Ok(Calibration {
            depth,
            color,
            depth_to_color,
            depth_rays,
        })
    }

    pub fn depth(&self) -> &CameraIntrinsics {
        &self.depth
    }

    pub fn color(&self) -> &CameraIntrinsics {
        &self.color
    }

    pub fn depth_to_color(&self) -> &Extrinsics {
        &self.depth_to_color
    }

    /// 3D point in depth-camera space for depth pixel (x, y) at `depth_mm`.
    pub fn unproject_depth(&self, x: usize, y: usize, depth_mm: u16) -> Option<[f32; 3]> {
        if x >= self.depth.width || y >= self.depth.height {
            return None;
        }
        let ray = self.depth_rays[y * self.depth.width + x];
        let z = depth_mm as f32;
        Some([ray[0] * z, ray[1] * z, z])
    }

    /// Project a depth-camera-space point into colour-image pixel coordinates.
    ///
    /// Used for skeleton joints, which the tracker reports in depth-camera space.
    pub fn depth_point_to_color_pixel(&self, p: [f32; 3]) -> Option<[f32; 2]> {
        self.color.project(self.depth_to_color.apply(p))
    }
}
