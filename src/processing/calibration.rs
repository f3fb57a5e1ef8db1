// SPDX-License-Identifier: GPL-3.0-only

//! Pinhole calibration for the depth and color cameras
//!
//! Depth intrinsics are derived from the stream's field of view when the
//! driver reports one, or scaled from the Kinect reference values otherwise.
//! Color calibration carries the rigid transform from the depth camera frame
//! into the color camera frame plus the color camera's own intrinsics.

use serde::{Deserialize, Serialize};

use crate::constants::kinect;
use crate::sensor::FieldOfView;

/// Pinhole intrinsics in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraIntrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Unit focal length with the principal point at the origin
    pub fn identity() -> Self {
        Self::new(1.0, 1.0, 0.0, 0.0)
    }

    /// Derive intrinsics from a field of view, principal point at the image centre
    pub fn from_fov(width: u32, height: u32, fov: FieldOfView) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self {
            fx: w / (2.0 * (fov.horizontal / 2.0).tan()),
            fy: h / (2.0 * (fov.vertical / 2.0).tan()),
            cx: w / 2.0,
            cy: h / 2.0,
        }
    }

    /// Kinect depth camera intrinsics scaled to the given resolution
    pub fn kinect_depth(width: u32, height: u32) -> Self {
        Self::new(kinect::FX, kinect::FY, kinect::CX, kinect::CY).scaled(
            kinect::BASE_WIDTH,
            kinect::BASE_HEIGHT,
            width,
            height,
        )
    }

    /// Rescale intrinsics calibrated at `from_w`x`from_h` to another resolution
    pub fn scaled(&self, from_w: f32, from_h: f32, width: u32, height: u32) -> Self {
        let sx = width as f32 / from_w;
        let sy = height as f32 / from_h;
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
        }
    }
}

/// Depth camera to color camera calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorCalibration {
    /// Color intrinsics at `reference_width` x `reference_height`
    pub intrinsics: CameraIntrinsics,
    pub reference_width: u32,
    pub reference_height: u32,
    /// Row-major rotation from depth camera frame to color camera frame
    pub rotation: [[f32; 3]; 3],
    /// Translation from depth camera frame to color camera frame (metres)
    pub translation: [f32; 3],
}

impl ColorCalibration {
    /// Kinect reference calibration: identity rotation, 2.5 cm baseline
    pub fn kinect_default() -> Self {
        Self {
            intrinsics: CameraIntrinsics::new(
                kinect::COLOR_FX,
                kinect::COLOR_FY,
                kinect::COLOR_CX,
                kinect::COLOR_CY,
            ),
            reference_width: kinect::BASE_WIDTH as u32,
            reference_height: kinect::BASE_HEIGHT as u32,
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [kinect::DEPTH_TO_COLOR_TX, 0.0, 0.0],
        }
    }

    /// Color intrinsics at the color stream's actual resolution
    pub fn intrinsics_for(&self, width: u32, height: u32) -> CameraIntrinsics {
        self.intrinsics.scaled(
            self.reference_width as f32,
            self.reference_height as f32,
            width,
            height,
        )
    }

    /// Apply `R·p + t`
    #[inline]
    pub fn transform(&self, p: [f32; 3]) -> [f32; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2],
        ]
    }
}

impl Default for ColorCalibration {
    fn default() -> Self {
        Self::kinect_default()
    }
}
