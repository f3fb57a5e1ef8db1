// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline lifecycle and read surface
//!
//! [`PipelineBuilder::open`] opens the device, negotiates streams and starts
//! the acquisition thread. The returned [`DepthPipeline`] is either fully
//! running or not returned at all.
//!
//! Buffers are read through [`DepthPipeline::lock_snapshot`]; frame counters
//! and dimensions can be read at any time without locking. Once running,
//! faults are only visible as counters that stop advancing (and in
//! [`DepthPipeline::stats`]).
//!
//! # Example
//!
//! ```ignore
//! let backend = depth_pipeline::sensor::default_backend();
//! let mut pipeline = PipelineBuilder::new(backend).open()?;
//! {
//!     let snapshot = pipeline.lock_snapshot();
//!     let centre = snapshot.world_points()[240 * 640 + 320];
//! }
//! pipeline.shutdown();
//! ```

pub mod acquisition;
pub mod frame_loop;
pub mod snapshot;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

pub use acquisition::{LabelInput, LabelSource, PipelineStats, StatsSnapshot};
pub use frame_loop::{CaptureLoopController, LoopAction};
pub use snapshot::{FrameSet, Snapshot, SnapshotManager, StreamDims};

use crate::config::PipelineConfig;
use crate::constants::pipeline::ACQUISITION_THREAD_NAME;
use crate::errors::PipelineResult;
use crate::sensor::{DeviceInfo, Dimensions, DriverLease, SensorBackend};
use acquisition::{AcquisitionLoop, DeviceSession};

/// Configures and opens a [`DepthPipeline`]
pub struct PipelineBuilder {
    backend: Arc<dyn SensorBackend>,
    config: PipelineConfig,
    labels: Option<Box<dyn LabelSource>>,
}

impl PipelineBuilder {
    pub fn new(backend: Arc<dyn SensorBackend>) -> Self {
        Self {
            backend,
            config: PipelineConfig::default(),
            labels: None,
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Classifier invoked once per depth frame
    pub fn label_source<L: LabelSource + 'static>(mut self, source: L) -> Self {
        self.labels = Some(Box::new(source));
        self
    }

    /// Open the device and start acquisition
    pub fn open(self) -> PipelineResult<DepthPipeline> {
        self.config.validate()?;

        let session = DeviceSession::open(Arc::clone(&self.backend), &self.config)?;
        let device = session.info().clone();
        let dims = session.dims();

        let snapshots = Arc::new(SnapshotManager::new(dims));
        let stats = Arc::new(PipelineStats::default());
        let acquisition = AcquisitionLoop::new(
            session,
            &self.config,
            Arc::clone(&snapshots),
            Arc::clone(&stats),
            self.labels,
        )?;

        let stop_signal = Arc::new(AtomicBool::new(false));
        let controller = CaptureLoopController::start(
            ACQUISITION_THREAD_NAME,
            Arc::clone(&stop_signal),
            acquisition,
            AcquisitionLoop::iterate,
        )?;

        info!(device = %device.uri, "Depth pipeline running");

        Ok(DepthPipeline {
            controller: Some(controller),
            stop_signal,
            snapshots,
            stats,
            config: self.config,
            device,
        })
    }
}

/// Requests a stop from any thread without blocking
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    stop_signal: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn request_shutdown(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }
}

/// A running acquisition pipeline
pub struct DepthPipeline {
    controller: Option<CaptureLoopController>,
    stop_signal: Arc<AtomicBool>,
    snapshots: Arc<SnapshotManager>,
    stats: Arc<PipelineStats>,
    config: PipelineConfig,
    device: DeviceInfo,
}

impl DepthPipeline {
    /// List devices attached to `backend`
    pub fn find_devices(backend: Arc<dyn SensorBackend>) -> PipelineResult<Vec<DeviceInfo>> {
        let lease = DriverLease::acquire(backend)?;
        Ok(lease.backend().enumerate_devices()?)
    }

    /// Stop acquisition and join the thread
    ///
    /// Blocks until in-flight conversions finish and the device is closed.
    /// Calling it again is a no-op. Buffers and counters stay readable.
    pub fn shutdown(&mut self) {
        if let Some(mut controller) = self.controller.take() {
            info!(device = %self.device.uri, "Shutting down depth pipeline");
            controller.stop();
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stop_signal: Arc::clone(&self.stop_signal),
        }
    }

    /// Whether the acquisition thread is alive
    pub fn is_running(&self) -> bool {
        self.controller
            .as_ref()
            .is_some_and(CaptureLoopController::is_running)
    }

    /// Lock the latest frame set for reading
    pub fn lock_snapshot(&self) -> Snapshot<'_> {
        self.snapshots.lock()
    }

    pub fn depth_frame_number(&self) -> u64 {
        self.snapshots.depth_frame_number()
    }

    pub fn color_frame_number(&self) -> u64 {
        self.snapshots.color_frame_number()
    }

    pub fn ir_frame_number(&self) -> u64 {
        self.snapshots.ir_frame_number()
    }

    /// Driver timestamp of the latest depth frame, in seconds
    pub fn depth_frame_time(&self) -> f64 {
        self.snapshots.depth_frame_time()
    }

    pub fn depth_dim(&self) -> Dimensions {
        self.snapshots.dims().depth
    }

    /// Zero when the color stream was not configured
    pub fn color_dim(&self) -> Dimensions {
        self.snapshots.dims().color
    }

    /// Zero when the infrared stream was not configured
    pub fn ir_dim(&self) -> Dimensions {
        self.snapshots.dims().infrared
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device
    }
}

impl Drop for DepthPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
