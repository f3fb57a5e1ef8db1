// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use std::time::Duration;

/// Depth range constants (millimetres)
pub mod depth {
    /// Default far cutoff
    pub const DEPTH_MAX_MM: u16 = 4500;

    /// Raw value the driver uses for "no reading"
    pub const DEPTH_INVALID_MM: u16 = 0;

    /// Millimetres per metre
    pub const MM_PER_M: f32 = 1000.0;

    /// Divisor that turns 100 µm samples into millimetres
    pub const HUNDRED_UM_PER_MM: u16 = 10;
}

/// Kinect camera intrinsics and extrinsics
///
/// Reference resolution: 640x480 (medium resolution depth mode)
pub mod kinect {
    /// Focal length X (pixels) at 640x480 base resolution
    pub const FX: f32 = 594.21;
    /// Focal length Y (pixels) at 640x480 base resolution
    pub const FY: f32 = 591.04;
    /// Principal point X (pixels) at 640x480 base resolution
    pub const CX: f32 = 339.5;
    /// Principal point Y (pixels) at 640x480 base resolution
    pub const CY: f32 = 242.7;

    /// Color camera focal length (pixels) at 640x480
    pub const COLOR_FX: f32 = 525.0;
    /// Color camera focal length (pixels) at 640x480
    pub const COLOR_FY: f32 = 525.0;
    /// Color camera principal point X
    pub const COLOR_CX: f32 = 319.5;
    /// Color camera principal point Y
    pub const COLOR_CY: f32 = 239.5;

    /// Horizontal offset from the IR camera to the RGB camera (metres)
    pub const DEPTH_TO_COLOR_TX: f32 = -0.025;

    /// Horizontal field of view of the depth camera (radians)
    pub const DEPTH_HFOV: f32 = 1.0144686707507438;
    /// Vertical field of view of the depth camera (radians)
    pub const DEPTH_VFOV: f32 = 0.78980943449644714;

    /// Base width for intrinsics calculation
    pub const BASE_WIDTH: f32 = 640.0;
    /// Base height for intrinsics calculation
    pub const BASE_HEIGHT: f32 = 480.0;
}

/// Pipeline defaults
pub mod pipeline {
    /// Default number of worker threads in the conversion pool
    pub const DEFAULT_WORKER_THREADS: usize = 4;

    /// Default number of ranges each conversion job is split into
    pub const DEFAULT_CONVERTER_THREADS: usize = 4;

    /// Default depth cutoff (metres)
    pub const DEFAULT_MAX_DEPTH_M: f32 = 4.5;

    /// Default per-stream frame wait (milliseconds)
    pub const DEFAULT_FRAME_WAIT_TIMEOUT_MS: u64 = 50;

    /// Thread name of the acquisition loop
    pub const ACQUISITION_THREAD_NAME: &str = "depth-acquisition";

    /// Thread name prefix of the conversion workers
    pub const WORKER_THREAD_PREFIX: &str = "depth-worker";
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Sleep after a driver fault so a broken device does not spin the loop
    pub const FAULT_BACKOFF: Duration = Duration::from_millis(10);

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;
}

/// Config file location
pub mod paths {
    /// Directory under the user config dir
    pub const CONFIG_DIR_NAME: &str = "depth-pipeline";

    /// Config file name
    pub const CONFIG_FILE_NAME: &str = "config.json";
}

/// Export file names
pub mod export {
    /// 16-bit depth image
    pub const DEPTH_PNG: &str = "depth.png";
    /// Raw color image
    pub const COLOR_PNG: &str = "color.png";
    /// Color registered onto the depth grid
    pub const REGISTERED_PNG: &str = "registered.png";
    /// Point cloud
    pub const POINT_CLOUD_LAS: &str = "points.las";

    /// LAS coordinate scale (1 mm)
    pub const LAS_SCALE: f64 = 0.001;
}
