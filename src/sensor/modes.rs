// SPDX-License-Identifier: GPL-3.0-only

//! Stream mode negotiation
//!
//! Drivers advertise a list of [`SensorMode`]s per stream. The pipeline picks
//! the highest vertical resolution for depth, then asks the secondary stream
//! for a mode with the same geometry so registration maps one grid onto the
//! other without rescaling.

use tracing::{debug, warn};

use super::types::{PixelFormat, SensorMode, StreamKind};
use crate::errors::SensorError;

/// Pick the mode with the greatest vertical resolution in `format`
///
/// Ties are broken by the greatest frame rate.
pub fn select_max_resolution_mode(
    stream: StreamKind,
    modes: &[SensorMode],
    format: PixelFormat,
) -> Result<SensorMode, SensorError> {
    let selected = modes
        .iter()
        .filter(|m| m.format == format)
        .max_by_key(|m| (m.height, m.fps))
        .copied()
        .ok_or_else(|| SensorError::ModeNotFound {
            stream,
            detail: format!("no {} mode advertised", format),
        })?;

    debug!(stream = %stream, mode = %selected, "Selected max resolution mode");
    Ok(selected)
}

/// Pick the mode that matches the requested geometry, format and frame rate
///
/// When no mode runs at `fps`, the same geometry and format at the highest
/// advertised frame rate is used instead.
pub fn select_matching_mode(
    stream: StreamKind,
    modes: &[SensorMode],
    width: u32,
    height: u32,
    fps: u32,
    format: PixelFormat,
) -> Result<SensorMode, SensorError> {
    let same_geometry: Vec<SensorMode> = modes
        .iter()
        .filter(|m| m.width == width && m.height == height && m.format == format)
        .copied()
        .collect();

    if let Some(exact) = same_geometry.iter().find(|m| m.fps == fps) {
        debug!(stream = %stream, mode = %exact, "Selected matching mode");
        return Ok(*exact);
    }

    match same_geometry.iter().max_by_key(|m| m.fps) {
        Some(fallback) => {
            warn!(
                stream = %stream,
                requested_fps = fps,
                mode = %fallback,
                "No mode at requested frame rate, using highest available"
            );
            Ok(*fallback)
        }
        None => Err(SensorError::ModeNotFound {
            stream,
            detail: format!("{}x{} {}", width, height, format),
        }),
    }
}

/// Choose the depth mode, preferring 1 mm samples over 100 µm samples
pub fn select_depth_mode(modes: &[SensorMode]) -> Result<SensorMode, SensorError> {
    select_max_resolution_mode(StreamKind::Depth, modes, PixelFormat::Depth1Mm).or_else(|_| {
        select_max_resolution_mode(StreamKind::Depth, modes, PixelFormat::Depth100Um)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modes() -> Vec<SensorMode> {
        vec![
            SensorMode::new(320, 240, 30, PixelFormat::Depth1Mm),
            SensorMode::new(640, 480, 15, PixelFormat::Depth1Mm),
            SensorMode::new(640, 480, 30, PixelFormat::Depth1Mm),
            SensorMode::new(640, 480, 30, PixelFormat::Depth100Um),
            SensorMode::new(640, 480, 15, PixelFormat::Rgb888),
            SensorMode::new(640, 480, 30, PixelFormat::Rgb888),
            SensorMode::new(1280, 1024, 15, PixelFormat::Rgb888),
            SensorMode::new(640, 480, 25, PixelFormat::Gray16),
        ]
    }

    #[test]
    fn test_max_resolution_prefers_height_then_fps() {
        let mode =
            select_max_resolution_mode(StreamKind::Depth, &modes(), PixelFormat::Depth1Mm).unwrap();
        assert_eq!(mode, SensorMode::new(640, 480, 30, PixelFormat::Depth1Mm));

        let mode =
            select_max_resolution_mode(StreamKind::Color, &modes(), PixelFormat::Rgb888).unwrap();
        assert_eq!(mode.height, 1024);
    }

    #[test]
    fn test_max_resolution_missing_format() {
        let err = select_max_resolution_mode(StreamKind::Depth, &modes(), PixelFormat::Shift9_2)
            .unwrap_err();
        assert!(matches!(err, SensorError::ModeNotFound { .. }));
    }

    #[test]
    fn test_matching_mode_exact() {
        let mode =
            select_matching_mode(StreamKind::Color, &modes(), 640, 480, 15, PixelFormat::Rgb888)
                .unwrap();
        assert_eq!(mode.fps, 15);
    }

    #[test]
    fn test_matching_mode_falls_back_to_highest_fps() {
        let mode =
            select_matching_mode(StreamKind::Infrared, &modes(), 640, 480, 30, PixelFormat::Gray16)
                .unwrap();
        assert_eq!(mode.fps, 25);
    }

    #[test]
    fn test_matching_mode_wrong_geometry() {
        let err =
            select_matching_mode(StreamKind::Color, &modes(), 800, 600, 30, PixelFormat::Rgb888)
                .unwrap_err();
        assert!(err.to_string().contains("800x600"));
    }

    #[test]
    fn test_depth_mode_falls_back_to_100um() {
        let only_fine = vec![SensorMode::new(640, 480, 30, PixelFormat::Depth100Um)];
        let mode = select_depth_mode(&only_fine).unwrap();
        assert_eq!(mode.format, PixelFormat::Depth100Um);
    }
}
