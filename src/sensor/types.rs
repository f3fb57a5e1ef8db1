// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for sensor backends

use std::fmt;

use serde::{Deserialize, Serialize};

/// Streams a structured-light sensor can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Depth,
    Color,
    Infrared,
}

impl StreamKind {
    /// All stream kinds, in initialisation order
    pub const ALL: [StreamKind; 3] = [StreamKind::Depth, StreamKind::Color, StreamKind::Infrared];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Depth => "depth",
            StreamKind::Color => "color",
            StreamKind::Infrared => "infrared",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel formats a driver may report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum PixelFormat {
    /// 16-bit depth, 1 mm per unit
    Depth1Mm,
    /// 16-bit depth, 100 µm per unit
    Depth100Um,
    /// Packed 11-bit disparity shift
    Shift9_2,
    /// Packed 12-bit disparity shift
    Shift9_3,
    /// 8-bit interleaved RGB
    Rgb888,
    /// Packed YUV 4:2:2
    Yuv422,
    /// 8-bit grayscale
    Gray8,
    /// 16-bit grayscale
    Gray16,
    /// Compressed JPEG
    Jpeg,
}

impl PixelFormat {
    /// Driver-facing name of the format
    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Depth1Mm => "DEPTH_1_MM",
            PixelFormat::Depth100Um => "DEPTH_100_UM",
            PixelFormat::Shift9_2 => "SHIFT_9_2",
            PixelFormat::Shift9_3 => "SHIFT_9_3",
            PixelFormat::Rgb888 => "RGB888",
            PixelFormat::Yuv422 => "YUV422",
            PixelFormat::Gray8 => "GRAY8",
            PixelFormat::Gray16 => "GRAY16",
            PixelFormat::Jpeg => "JPEG",
        }
    }

    /// Whether this format carries metric depth the pipeline can normalise
    pub fn is_metric_depth(&self) -> bool {
        matches!(self, PixelFormat::Depth1Mm | PixelFormat::Depth100Um)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One resolution/frame rate/format combination a stream supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorMode {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
}

impl SensorMode {
    pub fn new(width: u32, height: u32, fps: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            fps,
            format,
        }
    }

    /// Number of pixels in one frame of this mode
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for SensorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{} {}",
            self.width, self.height, self.fps, self.format
        )
    }
}

/// Identity of an attached sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Identifier accepted by `SensorBackend::open_device`
    pub uri: String,
    /// Human-readable model name
    pub name: String,
    /// Vendor string
    pub vendor: String,
}

/// Field of view of a stream, in radians
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldOfView {
    pub horizontal: f32,
    pub vertical: f32,
}

/// Grid dimensions of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl From<SensorMode> for Dimensions {
    fn from(mode: SensorMode) -> Self {
        Self::new(mode.width, mode.height)
    }
}

/// Sample storage of a delivered frame
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// One 16-bit depth sample per pixel
    Depth(Vec<u16>),
    /// Three interleaved bytes per pixel
    Rgb(Vec<u8>),
    /// One 16-bit intensity sample per pixel
    Gray16(Vec<u16>),
}

impl FramePayload {
    /// Number of samples (not bytes) in the payload
    pub fn sample_count(&self) -> usize {
        match self {
            FramePayload::Depth(data) | FramePayload::Gray16(data) => data.len(),
            FramePayload::Rgb(data) => data.len(),
        }
    }
}

/// A frame as delivered by a sensor driver
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub stream: StreamKind,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Driver timestamp in microseconds
    pub timestamp_us: u64,
    pub payload: FramePayload,
}

impl RawFrame {
    /// Samples this frame must carry for its declared dimensions
    pub fn expected_samples(&self) -> usize {
        let pixels = self.width as usize * self.height as usize;
        match self.payload {
            FramePayload::Rgb(_) => pixels * 3,
            FramePayload::Depth(_) | FramePayload::Gray16(_) => pixels,
        }
    }

    /// Whether the payload length matches the declared dimensions
    pub fn is_complete(&self) -> bool {
        self.payload.sample_count() == self.expected_samples()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_names() {
        assert_eq!(PixelFormat::Depth1Mm.to_string(), "DEPTH_1_MM");
        assert_eq!(PixelFormat::Depth100Um.to_string(), "DEPTH_100_UM");
        assert_eq!(PixelFormat::Gray16.to_string(), "GRAY16");
        assert!(PixelFormat::Depth100Um.is_metric_depth());
        assert!(!PixelFormat::Shift9_2.is_metric_depth());
    }

    #[test]
    fn test_raw_frame_completeness() {
        let mut frame = RawFrame {
            stream: StreamKind::Color,
            width: 4,
            height: 2,
            format: PixelFormat::Rgb888,
            timestamp_us: 0,
            payload: FramePayload::Rgb(vec![0; 24]),
        };
        assert!(frame.is_complete());

        frame.payload = FramePayload::Rgb(vec![0; 23]);
        assert!(!frame.is_complete());
    }

    #[test]
    fn test_mode_display() {
        let mode = SensorMode::new(640, 480, 30, PixelFormat::Depth1Mm);
        assert_eq!(mode.to_string(), "640x480@30 DEPTH_1_MM");
        assert_eq!(mode.pixel_count(), 307_200);
    }
}
