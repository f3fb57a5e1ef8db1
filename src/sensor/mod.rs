// SPDX-License-Identifier: GPL-3.0-only

//! Sensor driver abstraction
//!
//! The pipeline talks to hardware through two traits:
//!
//! - [`SensorBackend`]: a driver library (one-time init/teardown, device
//!   enumeration, opening devices)
//! - [`SensorDevice`]: an open device session (mode negotiation, stream
//!   control, frame delivery)
//!
//! Driver initialisation is reference counted process-wide by
//! [`registry`], so several pipelines can share one backend.
//!
//! [`synthetic::SyntheticBackend`] implements both traits in-process and is
//! what the CLI and the test suite run against.

pub mod modes;
pub mod registry;
pub mod synthetic;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

pub use modes::{select_depth_mode, select_matching_mode, select_max_resolution_mode};
pub use registry::DriverLease;
pub use types::{
    DeviceInfo, Dimensions, FieldOfView, FramePayload, PixelFormat, RawFrame, SensorMode,
    StreamKind,
};

use crate::errors::SensorError;
use crate::processing::calibration::ColorCalibration;

/// A sensor driver library
pub trait SensorBackend: Send + Sync {
    /// Unique backend name, used as the registry key
    fn name(&self) -> &str;

    /// One-time driver initialisation
    fn initialize(&self) -> Result<(), SensorError>;

    /// Driver teardown, called after the last device is closed
    fn shutdown(&self);

    /// List attached devices
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, SensorError>;

    /// Open a device by URI, or the first available device when `None`
    fn open_device(&self, uri: Option<&str>) -> Result<Box<dyn SensorDevice>, SensorError>;
}

/// An open device session
///
/// Owned by exactly one acquisition thread.
pub trait SensorDevice: Send {
    fn info(&self) -> &DeviceInfo;

    fn has_sensor(&self, stream: StreamKind) -> bool;

    fn supported_modes(&self, stream: StreamKind) -> Vec<SensorMode>;

    /// Request a mode; the driver may adjust it, read back with `current_mode`
    fn set_mode(&mut self, stream: StreamKind, mode: SensorMode) -> Result<(), SensorError>;

    fn current_mode(&self, stream: StreamKind) -> Option<SensorMode>;

    fn field_of_view(&self, stream: StreamKind) -> Option<FieldOfView>;

    /// Factory depth-to-color calibration, if the device stores one
    fn color_calibration(&self) -> Option<ColorCalibration>;

    fn set_depth_color_sync(&mut self, enabled: bool) -> Result<(), SensorError>;

    fn set_image_registration(&mut self, enabled: bool) -> Result<(), SensorError>;

    fn start_stream(&mut self, stream: StreamKind) -> Result<(), SensorError>;

    fn stop_stream(&mut self, stream: StreamKind);

    /// Block up to `timeout` for a new frame; `Ok(false)` on timeout
    fn wait_for_frame(&mut self, stream: StreamKind, timeout: Duration)
    -> Result<bool, SensorError>;

    /// Read the frame signalled by the last successful wait
    fn read_frame(&mut self, stream: StreamKind) -> Result<RawFrame, SensorError>;
}

/// Backend used when no hardware driver is linked in
pub fn default_backend() -> Arc<dyn SensorBackend> {
    Arc::new(synthetic::SyntheticBackend::new("synthetic"))
}
