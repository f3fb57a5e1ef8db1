// SPDX-License-Identifier: GPL-3.0-only

//! Frame conversion: calibration, per-pixel kernels, the worker pool and the
//! per-frame synchronizer that ties them together

pub mod calibration;
pub mod conversion;
pub mod pool;
pub mod synchronizer;

pub use calibration::{CameraIntrinsics, ColorCalibration};
pub use conversion::{
    ColorRegistration, ColorSampling, DepthToWorld, NO_COLOR, Rgb, WorldPoint, normalize_depth,
};
pub use pool::WorkerPool;
pub use synchronizer::{
    DispatchCounts, FrameOutput, FrameSynchronizer, JobKind, RegistrationInput, SyncState,
    partition,
};
