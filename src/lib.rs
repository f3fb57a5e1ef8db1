// SPDX-License-Identifier: GPL-3.0-only

//! Depth Pipeline - real-time acquisition and conversion for structured-light
//! depth sensors
//!
//! A background thread pulls depth frames (plus color or infrared) from a
//! sensor driver, converts depth into metric world points and registers color
//! onto the depth grid on a fixed worker pool, and publishes each converted
//! frame as one consistent snapshot.
//!
//! # Architecture
//!
//! - [`sensor`]: driver traits, mode negotiation, process-wide driver
//!   registry and a synthetic driver
//! - [`processing`]: calibration, conversion kernels, worker pool and the
//!   per-frame synchronizer
//! - [`pipeline`]: acquisition loop, snapshot buffers and the public
//!   [`DepthPipeline`] handle
//! - [`export`]: PNG and LAS export of a snapshot
//! - [`config`]: serialisable pipeline configuration

pub mod config;
pub mod constants;
pub mod errors;
pub mod export;
pub mod pipeline;
pub mod processing;
pub mod sensor;

// Re-export commonly used types
pub use config::{PipelineConfig, SyncStream};
pub use errors::{PipelineError, PipelineResult, SensorError};
pub use pipeline::{DepthPipeline, LabelSource, PipelineBuilder, ShutdownHandle, Snapshot};
pub use processing::{ColorSampling, Rgb, WorldPoint};
pub use sensor::{SensorBackend, SensorDevice, StreamKind};
