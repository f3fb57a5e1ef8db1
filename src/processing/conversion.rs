// SPDX-License-Identifier: GPL-3.0-only

//! Per-pixel conversion kernels
//!
//! Both kernels operate on one contiguous range of depth pixel indices and
//! return a freshly allocated output chunk covering exactly that range. They
//! read the shared input grids but never write outside their own chunk, so
//! any partition of the grid can be converted in parallel.
//!
//! World coordinates are metres in a right-handed frame centred on the depth
//! camera: x to the right (optionally mirrored), y up, z forward. A depth
//! sample of zero or beyond the cutoff yields [`WorldPoint::INVALID`], the
//! zero vector. Valid points always have `z > 0`.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::calibration::{CameraIntrinsics, ColorCalibration};
use crate::constants::depth::{DEPTH_INVALID_MM, HUNDRED_UM_PER_MM, MM_PER_M};
use crate::errors::SensorError;
use crate::sensor::{PixelFormat, StreamKind};

/// A 3-D point in metres
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl WorldPoint {
    /// Marker for pixels without a usable depth sample
    pub const INVALID: WorldPoint = WorldPoint {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_valid(&self) -> bool {
        self.z > 0.0
    }
}

/// One registered color sample
pub type Rgb = [u8; 3];

/// Transparent sample written where registration has no source pixel
pub const NO_COLOR: Rgb = [0, 0, 0];

/// How registration reads the color grid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSampling {
    #[default]
    Nearest,
    Bilinear,
}

/// Parameters of the depth to world job
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthToWorld {
    pub intrinsics: CameraIntrinsics,
    /// Samples above this are invalid
    pub max_depth_mm: u16,
    pub mirror: bool,
    /// Width of the depth grid
    pub width: u32,
}

impl DepthToWorld {
    /// Whether a 1 mm sample is inside the usable range
    #[inline]
    pub fn is_valid_sample(&self, raw_mm: u16) -> bool {
        raw_mm != DEPTH_INVALID_MM && raw_mm <= self.max_depth_mm
    }

    /// Unproject one pixel
    #[inline]
    pub fn world_point(&self, u: u32, v: u32, raw_mm: u16) -> WorldPoint {
        if !self.is_valid_sample(raw_mm) {
            return WorldPoint::INVALID;
        }
        let k = &self.intrinsics;
        let z = raw_mm as f32 / MM_PER_M;
        let mut x = (u as f32 - k.cx) * z / k.fx;
        let y = -((v as f32 - k.cy) * z / k.fy);
        if self.mirror {
            x = -x;
        }
        WorldPoint::new(x, y, z)
    }

    /// Convert `range` of the depth grid
    ///
    /// Panics if `range` is outside `depth`; the worker pool treats that as
    /// fatal.
    pub fn convert_range(&self, depth_mm: &[u16], range: Range<usize>) -> Vec<WorldPoint> {
        let width = self.width.max(1) as usize;
        let start = range.start;
        depth_mm[range]
            .iter()
            .enumerate()
            .map(|(offset, &raw)| {
                let index = start + offset;
                self.world_point((index % width) as u32, (index / width) as u32, raw)
            })
            .collect()
    }
}

/// Parameters of the color to depth registration job
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorRegistration {
    /// Depth camera intrinsics and cutoff; mirroring is ignored
    pub depth: DepthToWorld,
    pub calibration: ColorCalibration,
    /// Color intrinsics at the color grid's resolution
    pub color_intrinsics: CameraIntrinsics,
    pub color_width: u32,
    pub color_height: u32,
    pub sampling: ColorSampling,
}

impl ColorRegistration {
    pub fn new(
        depth: DepthToWorld,
        calibration: ColorCalibration,
        color_width: u32,
        color_height: u32,
        sampling: ColorSampling,
    ) -> Self {
        Self {
            depth,
            calibration,
            color_intrinsics: calibration.intrinsics_for(color_width, color_height),
            color_width,
            color_height,
            sampling,
        }
    }

    /// Position in the color image seen by depth pixel `(u, v)`
    ///
    /// `None` when the sample is invalid or the point lies behind the color
    /// camera.
    #[inline]
    pub fn project(&self, u: u32, v: u32, raw_mm: u16) -> Option<(f32, f32)> {
        if !self.depth.is_valid_sample(raw_mm) {
            return None;
        }
        // Camera frame: y down, never mirrored
        let k = &self.depth.intrinsics;
        let z = raw_mm as f32 / MM_PER_M;
        let camera = [(u as f32 - k.cx) * z / k.fx, (v as f32 - k.cy) * z / k.fy, z];

        let p = self.calibration.transform(camera);
        if p[2] <= 0.0 {
            return None;
        }
        let c = &self.color_intrinsics;
        Some((c.fx * p[0] / p[2] + c.cx, c.fy * p[1] / p[2] + c.cy))
    }

    /// Register `range` of the depth grid against an RGB888 color grid
    pub fn register_range(&self, depth_mm: &[u16], color: &[u8], range: Range<usize>) -> Vec<Rgb> {
        let width = self.depth.width.max(1) as usize;
        let start = range.start;
        depth_mm[range]
            .iter()
            .enumerate()
            .map(|(offset, &raw)| {
                let index = start + offset;
                match self.project((index % width) as u32, (index / width) as u32, raw) {
                    Some((cu, cv)) => self.sample(color, cu, cv),
                    None => NO_COLOR,
                }
            })
            .collect()
    }

    fn pixel(&self, color: &[u8], x: usize, y: usize) -> Option<Rgb> {
        let offset = (y * self.color_width as usize + x) * 3;
        color
            .get(offset..offset + 3)
            .map(|p| [p[0], p[1], p[2]])
    }

    fn sample(&self, color: &[u8], cu: f32, cv: f32) -> Rgb {
        let w = self.color_width as f32;
        let h = self.color_height as f32;
        match self.sampling {
            ColorSampling::Nearest => {
                let x = cu.round();
                let y = cv.round();
                if x < 0.0 || y < 0.0 || x >= w || y >= h {
                    return NO_COLOR;
                }
                self.pixel(color, x as usize, y as usize)
                    .unwrap_or(NO_COLOR)
            }
            ColorSampling::Bilinear => {
                if cu < 0.0 || cv < 0.0 || cu >= w || cv >= h {
                    return NO_COLOR;
                }
                let x0 = cu.floor();
                let y0 = cv.floor();
                let fx = cu - x0;
                let fy = cv - y0;
                let (x0, y0) = (x0 as usize, y0 as usize);
                // Last row and column blend with themselves
                let x1 = (x0 + 1).min(self.color_width as usize - 1);
                let y1 = (y0 + 1).min(self.color_height as usize - 1);
                let (Some(p00), Some(p10), Some(p01), Some(p11)) = (
                    self.pixel(color, x0, y0),
                    self.pixel(color, x1, y0),
                    self.pixel(color, x0, y1),
                    self.pixel(color, x1, y1),
                ) else {
                    return NO_COLOR;
                };

                let mut out = NO_COLOR;
                for c in 0..3 {
                    let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
                    let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
                    out[c] = (top * (1.0 - fy) + bottom * fy).round() as u8;
                }
                out
            }
        }
    }
}

/// Turn a raw depth frame into 1 mm samples
pub fn normalize_depth(format: PixelFormat, raw: &[u16]) -> Result<Vec<u16>, SensorError> {
    match format {
        PixelFormat::Depth1Mm => Ok(raw.to_vec()),
        PixelFormat::Depth100Um => Ok(raw.iter().map(|&d| d / HUNDRED_UM_PER_MM).collect()),
        other => Err(SensorError::UnsupportedFormat {
            stream: StreamKind::Depth,
            format: other,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_job(width: u32, mirror: bool) -> DepthToWorld {
        DepthToWorld {
            intrinsics: CameraIntrinsics::identity(),
            max_depth_mm: 4500,
            mirror,
            width,
        }
    }

    #[test]
    fn test_invalid_samples_map_to_sentinel() {
        let job = identity_job(4, true);
        let depth = [0, 5000, 4500, 4501];
        let points = job.convert_range(&depth, 0..4);
        assert_eq!(points[0], WorldPoint::INVALID);
        assert_eq!(points[1], WorldPoint::INVALID);
        assert!(points[2].is_valid());
        assert_eq!(points[3], WorldPoint::INVALID);
    }

    #[test]
    fn test_identity_intrinsics_depth() {
        let job = identity_job(640, false);
        let p = job.world_point(100, 100, 2000);
        assert!((p.z - 2.0).abs() < 1e-6);
        assert!((p.x - 200.0).abs() < 1e-3);
        assert!((p.y + 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_mirror_flips_x_only() {
        let plain = identity_job(640, false).world_point(10, 20, 1000);
        let mirrored = identity_job(640, true).world_point(10, 20, 1000);
        assert_eq!(mirrored.x, -plain.x);
        assert_eq!(mirrored.y, plain.y);
        assert_eq!(mirrored.z, plain.z);
    }

    #[test]
    fn test_convert_range_uses_absolute_indices() {
        let job = DepthToWorld {
            intrinsics: CameraIntrinsics::new(1.0, 1.0, 0.0, 0.0),
            max_depth_mm: 4500,
            mirror: false,
            width: 4,
        };
        let depth = vec![1000u16; 8];
        let chunk = job.convert_range(&depth, 5..8);
        assert_eq!(chunk.len(), 3);
        // index 5 is (1, 1)
        assert_eq!(chunk[0], job.world_point(1, 1, 1000));
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let job = DepthToWorld {
            intrinsics: CameraIntrinsics::kinect_depth(64, 48),
            max_depth_mm: 4500,
            mirror: true,
            width: 64,
        };
        let depth: Vec<u16> = (0..64 * 48).map(|i| (i * 7 % 5000) as u16).collect();
        let a = job.convert_range(&depth, 0..depth.len());
        let b = job.convert_range(&depth, 0..depth.len());
        assert_eq!(bytemuck::cast_slice::<_, u8>(&a), bytemuck::cast_slice::<_, u8>(&b));
    }

    fn aligned_registration(width: u32, height: u32, sampling: ColorSampling) -> ColorRegistration {
        let intrinsics = CameraIntrinsics::new(100.0, 100.0, width as f32 / 2.0, height as f32 / 2.0);
        let calibration = ColorCalibration {
            intrinsics,
            reference_width: width,
            reference_height: height,
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0, 0.0, 0.0],
        };
        let depth = DepthToWorld {
            intrinsics,
            max_depth_mm: 4500,
            mirror: true,
            width,
        };
        ColorRegistration::new(depth, calibration, width, height, sampling)
    }

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let mut color = Vec::new();
        for y in 0..height {
            for x in 0..width {
                color.extend_from_slice(&[x as u8, y as u8, 7]);
            }
        }
        color
    }

    #[test]
    fn test_aligned_cameras_register_identically() {
        let (w, h) = (8, 6);
        let reg = aligned_registration(w, h, ColorSampling::Nearest);
        let depth = vec![1500u16; (w * h) as usize];
        let color = gradient(w, h);

        let out = reg.register_range(&depth, &color, 0..depth.len());
        for (i, px) in out.iter().enumerate() {
            let (x, y) = (i as u32 % w, i as u32 / w);
            assert_eq!(*px, [x as u8, y as u8, 7]);
        }
    }

    #[test]
    fn test_registration_out_of_bounds_is_transparent() {
        let (w, h) = (8, 6);
        let mut reg = aligned_registration(w, h, ColorSampling::Nearest);
        // Shift far enough that every projection leaves the color image
        reg.calibration.translation = [10.0, 0.0, 0.0];
        let depth = vec![1000u16; (w * h) as usize];
        let out = reg.register_range(&depth, &gradient(w, h), 0..depth.len());
        assert!(out.iter().all(|px| *px == NO_COLOR));
    }

    #[test]
    fn test_registration_skips_invalid_depth() {
        let (w, h) = (8, 6);
        let reg = aligned_registration(w, h, ColorSampling::Bilinear);
        let depth = vec![0u16; (w * h) as usize];
        let out = reg.register_range(&depth, &gradient(w, h), 0..depth.len());
        assert!(out.iter().all(|px| *px == NO_COLOR));
    }

    #[test]
    fn test_bilinear_interpolates() {
        let (w, h) = (8, 6);
        let reg = aligned_registration(w, h, ColorSampling::Bilinear);
        let color = gradient(w, h);
        assert_eq!(reg.sample(&color, 2.5, 1.0), [3, 1, 7]);
        assert_eq!(reg.sample(&color, 2.0, 1.5), [2, 2, 7]);
        assert_eq!(reg.sample(&color, 8.0, 1.0), NO_COLOR);
        assert_eq!(reg.sample(&color, -0.25, 1.0), NO_COLOR);
    }

    #[test]
    fn test_bilinear_covers_last_row_and_column() {
        let (w, h) = (8, 6);
        let reg = aligned_registration(w, h, ColorSampling::Bilinear);
        let color = gradient(w, h);
        assert_eq!(reg.sample(&color, 7.5, 1.0), [7, 1, 7]);
        assert_eq!(reg.sample(&color, 3.0, 5.5), [3, 5, 7]);
        assert_eq!(reg.sample(&color, 7.9, 5.9), [7, 5, 7]);
        assert_eq!(reg.sample(&color, 7.0, 6.0), NO_COLOR);
    }

    #[test]
    fn test_normalize_depth_formats() {
        assert_eq!(normalize_depth(PixelFormat::Depth1Mm, &[0, 1200]).unwrap(), vec![0, 1200]);
        assert_eq!(
            normalize_depth(PixelFormat::Depth100Um, &[12000, 9]).unwrap(),
            vec![1200, 0]
        );
        assert!(normalize_depth(PixelFormat::Shift9_2, &[1]).is_err());
    }
}
