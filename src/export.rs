// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot export
//!
//! Writes one published frame set to disk:
//! - 1 mm depth as a 16-bit grayscale PNG
//! - raw and registered color as RGB PNGs
//! - valid world points with registered color as a LAS point cloud
//!
//! The snapshot lock is held only long enough to clone the buffer handles.

use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma, RgbImage};
use las::{Builder, Color, Point, Writer};
use tracing::{debug, info};

use crate::constants::export::{
    COLOR_PNG, DEPTH_PNG, LAS_SCALE, POINT_CLOUD_LAS, REGISTERED_PNG,
};
use crate::errors::{PipelineError, PipelineResult};
use crate::pipeline::{DepthPipeline, FrameSet, StreamDims};
use crate::processing::NO_COLOR;

/// Files written by [`export_snapshot`]
#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    pub depth_frame: u64,
    pub depth_png: Option<PathBuf>,
    pub color_png: Option<PathBuf>,
    pub registered_png: Option<PathBuf>,
    pub point_cloud: Option<PathBuf>,
    pub point_count: usize,
}

/// Export the pipeline's current snapshot into `dir`
pub fn export_snapshot(pipeline: &DepthPipeline, dir: &Path) -> PipelineResult<ExportSummary> {
    let frames = pipeline.lock_snapshot().to_frame_set();
    let dims = StreamDims {
        depth: pipeline.depth_dim(),
        color: pipeline.color_dim(),
        infrared: pipeline.ir_dim(),
    };
    export_frame_set(&frames, dims, dir)
}

/// Export an already captured frame set into `dir`
pub fn export_frame_set(
    frames: &FrameSet,
    dims: StreamDims,
    dir: &Path,
) -> PipelineResult<ExportSummary> {
    fs::create_dir_all(dir)
        .map_err(|e| PipelineError::Export(format!("Failed to create {}: {}", dir.display(), e)))?;

    let mut summary = ExportSummary {
        depth_frame: frames.depth_frame,
        ..Default::default()
    };

    let depth_path = dir.join(DEPTH_PNG);
    write_depth_png(&frames.depth_mm, dims.depth.width, dims.depth.height, &depth_path)?;
    summary.depth_png = Some(depth_path);

    if dims.color.pixel_count() > 0 {
        let color_path = dir.join(COLOR_PNG);
        write_rgb_png(
            frames.color.to_vec(),
            dims.color.width,
            dims.color.height,
            &color_path,
        )?;
        summary.color_png = Some(color_path);
    }

    let registered_path = dir.join(REGISTERED_PNG);
    write_rgb_png(
        frames.registered_color.iter().flatten().copied().collect(),
        dims.depth.width,
        dims.depth.height,
        &registered_path,
    )?;
    summary.registered_png = Some(registered_path);

    let las_path = dir.join(POINT_CLOUD_LAS);
    summary.point_count = write_point_cloud_las(frames, &las_path)?;
    summary.point_cloud = Some(las_path);

    info!(
        frame = summary.depth_frame,
        points = summary.point_count,
        dir = %dir.display(),
        "Snapshot exported"
    );
    Ok(summary)
}

/// Save 1 mm depth as a 16-bit grayscale PNG
pub fn write_depth_png(depth_mm: &[u16], width: u32, height: u32, path: &Path) -> PipelineResult<()> {
    let image: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_raw(width, height, depth_mm.to_vec()).ok_or_else(|| {
            PipelineError::Export(format!(
                "Depth buffer of {} samples does not fit {}x{}",
                depth_mm.len(),
                width,
                height
            ))
        })?;
    image
        .save(path)
        .map_err(|e| PipelineError::Export(format!("Failed to write {}: {}", path.display(), e)))?;
    debug!(path = %path.display(), "Depth PNG written");
    Ok(())
}

/// Save interleaved RGB888 samples as a PNG
pub fn write_rgb_png(rgb: Vec<u8>, width: u32, height: u32, path: &Path) -> PipelineResult<()> {
    let len = rgb.len();
    let image = RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
        PipelineError::Export(format!(
            "Color buffer of {} bytes does not fit {}x{}",
            len, width, height
        ))
    })?;
    image
        .save(path)
        .map_err(|e| PipelineError::Export(format!("Failed to write {}: {}", path.display(), e)))?;
    debug!(path = %path.display(), "RGB PNG written");
    Ok(())
}

/// Write valid world points as an uncompressed LAS 1.4 point cloud
///
/// Points whose registered color is transparent are written mid-gray.
/// Returns the number of points written.
pub fn write_point_cloud_las(frames: &FrameSet, output_path: &Path) -> PipelineResult<usize> {
    let points: Vec<(f64, f64, f64, u16, u16, u16)> = frames
        .world_points
        .iter()
        .zip(frames.registered_color.iter())
        .filter(|(p, _)| p.is_valid())
        .map(|(p, rgb)| {
            let [r, g, b] = if *rgb == NO_COLOR { [128, 128, 128] } else { *rgb };
            (
                p.x as f64,
                p.y as f64,
                p.z as f64,
                r as u16 * 256,
                g as u16 * 256,
                b as u16 * 256,
            )
        })
        .collect();

    if points.is_empty() {
        return Err(PipelineError::Export(
            "No valid depth points to export".to_string(),
        ));
    }

    info!(
        point_count = points.len(),
        path = %output_path.display(),
        "Exporting point cloud"
    );

    let (min_x, max_x) = axis_bounds(points.iter().map(|p| p.0));
    let (min_y, max_y) = axis_bounds(points.iter().map(|p| p.1));
    let (min_z, max_z) = axis_bounds(points.iter().map(|p| p.2));

    // Build LAS header
    let mut builder = Builder::from((1, 4)); // LAS 1.4
    builder.point_format.has_color = true;
    builder.point_format.is_compressed = false;

    builder.transforms = las::Vector {
        x: las::Transform {
            scale: LAS_SCALE,
            offset: (min_x + max_x) / 2.0,
        },
        y: las::Transform {
            scale: LAS_SCALE,
            offset: (min_y + max_y) / 2.0,
        },
        z: las::Transform {
            scale: LAS_SCALE,
            offset: (min_z + max_z) / 2.0,
        },
    };

    let header = builder
        .into_header()
        .map_err(|e| PipelineError::Export(format!("Failed to build LAS header: {}", e)))?;

    let mut writer = Writer::from_path(output_path, header)
        .map_err(|e| PipelineError::Export(format!("Failed to create LAS writer: {}", e)))?;

    let count = points.len();
    for (px, py, pz, r, g, b) in points {
        let mut point = Point::default();
        point.x = px;
        point.y = py;
        point.z = pz;
        point.color = Some(Color::new(r, g, b));

        writer
            .write_point(point)
            .map_err(|e| PipelineError::Export(format!("Failed to write point: {}", e)))?;
    }

    writer
        .close()
        .map_err(|e| PipelineError::Export(format!("Failed to close LAS file: {}", e)))?;

    debug!(path = %output_path.display(), "LAS export complete");
    Ok(count)
}

fn axis_bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::MAX, f64::MIN), |(min, max), v| (min.min(v), max.max(v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::WorldPoint;
    use crate::sensor::Dimensions;

    fn frame_set() -> (FrameSet, StreamDims) {
        let dims = StreamDims {
            depth: Dimensions::new(4, 3),
            color: Dimensions::new(4, 3),
            infrared: Dimensions::default(),
        };
        let mut frames = FrameSet::empty(dims);
        frames.depth_mm = vec![1500u16; 12].into();
        frames.world_points = (0..12)
            .map(|i| {
                if i % 3 == 0 {
                    WorldPoint::INVALID
                } else {
                    WorldPoint::new(i as f32 * 0.01, -0.02, 1.5)
                }
            })
            .collect();
        frames.registered_color = vec![[10, 20, 30]; 12].into();
        frames.depth_frame = 7;
        (frames, dims)
    }

    #[test]
    fn test_export_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let (frames, dims) = frame_set();

        let summary = export_frame_set(&frames, dims, dir.path()).unwrap();

        assert_eq!(summary.depth_frame, 7);
        assert_eq!(summary.point_count, 8);
        assert!(dir.path().join(DEPTH_PNG).exists());
        assert!(dir.path().join(COLOR_PNG).exists());
        assert!(dir.path().join(REGISTERED_PNG).exists());
        assert!(dir.path().join(POINT_CLOUD_LAS).exists());
    }

    #[test]
    fn test_depth_png_round_trips_millimetres() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth.png");
        write_depth_png(&[0, 1000, 4500, 65535], 2, 2, &path).unwrap();

        let decoded = image::open(&path).unwrap().into_luma16();
        assert_eq!(decoded.into_raw(), vec![0, 1000, 4500, 65535]);
    }

    #[test]
    fn test_point_cloud_requires_valid_points() {
        let dir = tempfile::tempdir().unwrap();
        let dims = StreamDims {
            depth: Dimensions::new(2, 2),
            ..Default::default()
        };
        let frames = FrameSet::empty(dims);
        let err = write_point_cloud_las(&frames, &dir.path().join("points.las")).unwrap_err();
        assert!(matches!(err, PipelineError::Export(_)));
    }

    #[test]
    fn test_mismatched_buffer_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_rgb_png(vec![0; 5], 2, 2, &dir.path().join("bad.png")).unwrap_err();
        assert!(err.to_string().contains("does not fit"));
    }
}
