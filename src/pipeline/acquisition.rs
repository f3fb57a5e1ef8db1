// SPDX-License-Identifier: GPL-3.0-only

//! Device session setup and the acquisition loop body
//!
//! [`DeviceSession::open`] negotiates modes and starts streams in the order
//! the hardware expects: depth first, then either color or infrared. Any
//! failure releases everything already acquired.
//!
//! [`AcquisitionLoop::iterate`] is one pass of the loop: wait for depth,
//! collect the color or infrared frame of the same pass, validate what
//! arrives, then convert the depth frame through the [`FrameSynchronizer`]
//! and publish the result.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use super::frame_loop::LoopAction;
use super::snapshot::{DepthUpdate, SnapshotManager, StreamDims};
use crate::config::{PipelineConfig, SyncStream};
use crate::constants::timing::{FAULT_BACKOFF, FRAME_LOG_INTERVAL};
use crate::errors::{PipelineResult, SensorError};
use crate::processing::{
    CameraIntrinsics, ColorCalibration, ColorRegistration, DepthToWorld, FrameSynchronizer,
    RegistrationInput, WorldPoint, normalize_depth,
};
use crate::sensor::{
    DeviceInfo, Dimensions, DriverLease, FramePayload, PixelFormat, RawFrame, SensorBackend,
    SensorDevice, SensorMode, StreamKind, select_depth_mode, select_matching_mode,
};

/// Per-frame input handed to a [`LabelSource`]
#[derive(Debug)]
pub struct LabelInput<'a> {
    pub depth_mm: &'a [u16],
    pub world_points: &'a [WorldPoint],
    pub width: u32,
    pub height: u32,
    /// Number the frame will be published under
    pub frame_number: u64,
}

/// External per-pixel classifier
///
/// Runs on the acquisition thread after conversion. Returning `None`, or a
/// buffer of the wrong length, publishes zeroed labels for the frame.
pub trait LabelSource: Send {
    fn labels(&mut self, input: LabelInput<'_>) -> Option<Vec<u8>>;
}

/// Runtime fault and dispatch counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_discarded: AtomicU64,
    wait_faults: AtomicU64,
    conversion_batches: AtomicU64,
    last_world_tasks: AtomicUsize,
    last_registration_tasks: AtomicUsize,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Corrupt or unusable frames dropped without advancing counters
    pub frames_discarded: u64,
    /// Driver errors from frame waits
    pub wait_faults: u64,
    /// Depth frames converted
    pub conversion_batches: u64,
    /// World-conversion tasks of the latest depth frame
    pub last_world_tasks: usize,
    /// Registration tasks of the latest depth frame
    pub last_registration_tasks: usize,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            wait_faults: self.wait_faults.load(Ordering::Relaxed),
            conversion_batches: self.conversion_batches.load(Ordering::Relaxed),
            last_world_tasks: self.last_world_tasks.load(Ordering::Relaxed),
            last_registration_tasks: self.last_registration_tasks.load(Ordering::Relaxed),
        }
    }
}

/// Open device with its negotiated modes and started streams
///
/// Dropping the session stops every started stream, closes the device and
/// releases the driver lease, in that order.
pub struct DeviceSession {
    device: Box<dyn SensorDevice>,
    started: Vec<StreamKind>,
    depth_mode: SensorMode,
    color_mode: Option<SensorMode>,
    ir_mode: Option<SensorMode>,
    _lease: DriverLease,
}

impl DeviceSession {
    /// Open and configure a device according to `config`
    pub fn open(backend: Arc<dyn SensorBackend>, config: &PipelineConfig) -> PipelineResult<Self> {
        let lease = DriverLease::acquire(Arc::clone(&backend))?;
        let mut device = backend.open_device(config.device_uri.as_deref())?;

        info!(
            device = %device.info().uri,
            name = %device.info().name,
            "Opened depth sensor"
        );

        if !device.has_sensor(StreamKind::Depth) {
            return Err(SensorError::NoSensor(StreamKind::Depth).into());
        }

        let requested = select_depth_mode(&device.supported_modes(StreamKind::Depth))?;
        device.set_mode(StreamKind::Depth, requested)?;
        let depth_mode = applied_mode(device.as_ref(), StreamKind::Depth)?;
        if !depth_mode.format.is_metric_depth() {
            return Err(SensorError::UnsupportedFormat {
                stream: StreamKind::Depth,
                format: depth_mode.format,
            }
            .into());
        }
        info!(mode = %depth_mode, "Depth mode applied");

        device.set_depth_color_sync(false)?;
        device.set_image_registration(config.crop_depth_to_color)?;

        let mut session = Self {
            device,
            started: Vec::new(),
            depth_mode,
            color_mode: None,
            ir_mode: None,
            _lease: lease,
        };

        // Only the stream that will run gets a mode
        match config.sync_stream {
            SyncStream::Color => session.configure_color()?,
            SyncStream::Infrared => session.configure_ir()?,
        }

        session.start(StreamKind::Depth)?;
        if config.sync_stream == SyncStream::Color {
            session.start(StreamKind::Color)?;
        } else if session.ir_mode.is_some() {
            session.start(StreamKind::Infrared)?;
        }

        Ok(session)
    }

    fn configure_color(&mut self) -> PipelineResult<()> {
        if !self.device.has_sensor(StreamKind::Color) {
            return Err(SensorError::NoSensor(StreamKind::Color).into());
        }

        let mode = select_matching_mode(
            StreamKind::Color,
            &self.device.supported_modes(StreamKind::Color),
            self.depth_mode.width,
            self.depth_mode.height,
            self.depth_mode.fps,
            PixelFormat::Rgb888,
        )?;
        self.device.set_mode(StreamKind::Color, mode)?;
        let mode = applied_mode(self.device.as_ref(), StreamKind::Color)?;
        info!(mode = %mode, "Color mode applied");
        self.color_mode = Some(mode);
        Ok(())
    }

    fn configure_ir(&mut self) -> PipelineResult<()> {
        if !self.device.has_sensor(StreamKind::Infrared) {
            warn!("Device has no infrared sensor, depth runs alone");
            return Ok(());
        }

        let mode = select_matching_mode(
            StreamKind::Infrared,
            &self.device.supported_modes(StreamKind::Infrared),
            self.depth_mode.width,
            self.depth_mode.height,
            self.depth_mode.fps,
            PixelFormat::Gray16,
        )?;
        self.device.set_mode(StreamKind::Infrared, mode)?;
        let mode = applied_mode(self.device.as_ref(), StreamKind::Infrared)?;
        info!(mode = %mode, "Infrared mode applied");
        self.ir_mode = Some(mode);
        Ok(())
    }

    fn start(&mut self, stream: StreamKind) -> Result<(), SensorError> {
        self.device.start_stream(stream)?;
        self.started.push(stream);
        info!(stream = %stream, "Stream started");
        Ok(())
    }

    pub fn info(&self) -> &DeviceInfo {
        self.device.info()
    }

    /// Streams currently running, depth first
    pub fn started_streams(&self) -> &[StreamKind] {
        &self.started
    }

    pub fn is_started(&self, stream: StreamKind) -> bool {
        self.started.contains(&stream)
    }

    pub fn dims(&self) -> StreamDims {
        StreamDims {
            depth: self.depth_mode.into(),
            color: self.color_mode.map(Dimensions::from).unwrap_or_default(),
            infrared: self.ir_mode.map(Dimensions::from).unwrap_or_default(),
        }
    }

    pub fn depth_mode(&self) -> SensorMode {
        self.depth_mode
    }

    /// Depth intrinsics from the reported field of view, Kinect defaults otherwise
    pub fn depth_intrinsics(&self) -> CameraIntrinsics {
        let (w, h) = (self.depth_mode.width, self.depth_mode.height);
        match self.device.field_of_view(StreamKind::Depth) {
            Some(fov) => CameraIntrinsics::from_fov(w, h, fov),
            None => CameraIntrinsics::kinect_depth(w, h),
        }
    }

    pub fn color_calibration(&self) -> ColorCalibration {
        self.device.color_calibration().unwrap_or_default()
    }

    fn stop_all(&mut self) {
        for stream in self.started.drain(..).rev() {
            self.device.stop_stream(stream);
            debug!(stream = %stream, "Stream stopped");
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.stop_all();
        info!(device = %self.device.info().uri, "Closing depth sensor");
    }
}

fn applied_mode(device: &dyn SensorDevice, stream: StreamKind) -> Result<SensorMode, SensorError> {
    device
        .current_mode(stream)
        .ok_or_else(|| SensorError::ModeNotFound {
            stream,
            detail: "driver reported no active mode".to_string(),
        })
}

/// State owned by the acquisition thread
pub struct AcquisitionLoop {
    session: DeviceSession,
    synchronizer: FrameSynchronizer,
    snapshots: Arc<SnapshotManager>,
    stats: Arc<PipelineStats>,
    labels: Option<Box<dyn LabelSource>>,
    world: DepthToWorld,
    registration: Option<ColorRegistration>,
    wait_timeout: Duration,
    secondary_grace: Duration,
    /// Most recent color frame and the number it was published under
    latest_color: Option<(Arc<[u8]>, u64)>,
}

impl AcquisitionLoop {
    pub fn new(
        session: DeviceSession,
        config: &PipelineConfig,
        snapshots: Arc<SnapshotManager>,
        stats: Arc<PipelineStats>,
        labels: Option<Box<dyn LabelSource>>,
    ) -> PipelineResult<Self> {
        let synchronizer = FrameSynchronizer::new(config.worker_threads, config.converter_threads)?;
        let dims = session.dims();

        let world = DepthToWorld {
            intrinsics: session.depth_intrinsics(),
            max_depth_mm: config.max_depth_mm(),
            mirror: config.mirror,
            width: dims.depth.width,
        };

        let registration = session.is_started(StreamKind::Color).then(|| {
            ColorRegistration::new(
                world,
                session.color_calibration(),
                dims.color.width,
                dims.color.height,
                config.color_sampling,
            )
        });

        let wait_timeout = Duration::from_millis(config.frame_wait_timeout_ms);
        let depth_period = Duration::from_secs_f64(1.0 / session.depth_mode().fps.max(1) as f64);
        let secondary_grace = wait_timeout.min(depth_period / 2);

        info!(
            depth = ?dims.depth,
            color = ?dims.color,
            infrared = ?dims.infrared,
            converter_threads = config.converter_threads,
            registration = registration.is_some(),
            "Acquisition loop ready"
        );

        Ok(Self {
            session,
            synchronizer,
            snapshots,
            stats,
            labels,
            world,
            registration,
            wait_timeout,
            secondary_grace,
            latest_color: None,
        })
    }

    /// One pass over every running stream
    ///
    /// Depth is waited on for up to the configured timeout. Color or infrared
    /// frames are then collected with a grace wait of at most half a depth
    /// period (none when depth timed out) and read before the depth frame is
    /// converted, so registration uses the color frame of the same pass. A
    /// pass therefore blocks for at most `frame_wait_timeout_ms` plus that
    /// grace. Wait faults back off once per pass.
    pub fn iterate(&mut self) -> LoopAction {
        let faults = self.stats.wait_faults.load(Ordering::Relaxed);

        let depth_ready = self.wait(StreamKind::Depth, self.wait_timeout);
        let grace = if depth_ready {
            self.secondary_grace
        } else {
            Duration::ZERO
        };

        let secondary: Vec<StreamKind> = self
            .session
            .started_streams()
            .iter()
            .copied()
            .filter(|s| *s != StreamKind::Depth)
            .collect();
        for stream in secondary {
            if self.wait(stream, grace) {
                self.receive(stream);
            }
        }

        if depth_ready {
            self.receive(StreamKind::Depth);
        }

        if self.stats.wait_faults.load(Ordering::Relaxed) != faults {
            thread::sleep(FAULT_BACKOFF);
        }
        LoopAction::Continue
    }

    /// Bounded wait on one stream; faults are logged and counted
    fn wait(&mut self, stream: StreamKind, timeout: Duration) -> bool {
        match self.session.device.wait_for_frame(stream, timeout) {
            Ok(true) => true,
            Ok(false) => {
                trace!(stream = %stream, "Frame wait timed out");
                false
            }
            Err(e) => {
                warn!(stream = %stream, error = %e, "Frame wait failed");
                self.stats.wait_faults.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn receive(&mut self, stream: StreamKind) {
        let frame = match self.session.device.read_frame(stream) {
            Ok(frame) => frame,
            Err(e) => {
                self.discard(stream, &e);
                return;
            }
        };

        if let Err(e) = self.validate(&frame) {
            self.discard(stream, &e);
            return;
        }

        match (stream, frame.payload) {
            (StreamKind::Depth, FramePayload::Depth(data)) => {
                self.process_depth(frame.format, data, frame.timestamp_us)
            }
            (StreamKind::Color, FramePayload::Rgb(data)) => {
                let color: Arc<[u8]> = data.into();
                let number = self.snapshots.publish_color(Arc::clone(&color));
                self.latest_color = Some((color, number));
            }
            (StreamKind::Infrared, FramePayload::Gray16(data)) => {
                self.snapshots.publish_infrared(data.into());
            }
            (stream, _) => self.discard(
                stream,
                &SensorError::CorruptFrame {
                    stream,
                    detail: "payload does not match stream".to_string(),
                },
            ),
        }
    }

    fn validate(&self, frame: &RawFrame) -> Result<(), SensorError> {
        let expected = match frame.stream {
            StreamKind::Depth => self.snapshots.dims().depth,
            StreamKind::Color => self.snapshots.dims().color,
            StreamKind::Infrared => self.snapshots.dims().infrared,
        };
        if frame.width != expected.width || frame.height != expected.height {
            return Err(SensorError::CorruptFrame {
                stream: frame.stream,
                detail: format!(
                    "{}x{} frame, expected {}x{}",
                    frame.width, frame.height, expected.width, expected.height
                ),
            });
        }
        if !frame.is_complete() {
            return Err(SensorError::CorruptFrame {
                stream: frame.stream,
                detail: format!(
                    "{} of {} samples",
                    frame.payload.sample_count(),
                    frame.expected_samples()
                ),
            });
        }
        Ok(())
    }

    fn discard(&self, stream: StreamKind, error: &SensorError) {
        warn!(stream = %stream, error = %error, "Discarding frame");
        self.stats.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    fn process_depth(&mut self, format: PixelFormat, raw: Vec<u16>, timestamp_us: u64) {
        let depth_mm: Arc<[u16]> = match normalize_depth(format, &raw) {
            Ok(mm) => mm.into(),
            Err(e) => {
                self.discard(StreamKind::Depth, &e);
                return;
            }
        };

        let (registration, registered_color_frame) = match (self.registration, &self.latest_color) {
            (Some(params), Some((color, number))) => (
                Some(RegistrationInput {
                    params,
                    color: Arc::clone(color),
                }),
                *number,
            ),
            _ => (None, 0),
        };

        let output = self
            .synchronizer
            .process(Arc::clone(&depth_mm), self.world, registration);
        let counts = self.synchronizer.last_dispatch();

        let frame_number = self.snapshots.depth_frame_number() + 1;
        let labels = self.labels_for(&depth_mm, &output.world_points, frame_number);

        let published = self.snapshots.publish_depth(DepthUpdate {
            depth: raw.into(),
            depth_mm,
            world_points: output.world_points.into(),
            registered_color: output
                .registered_color
                .map(|rgb| (Arc::from(rgb), registered_color_frame)),
            labels,
            timestamp_us,
        });

        self.stats.conversion_batches.fetch_add(1, Ordering::Relaxed);
        self.stats
            .last_world_tasks
            .store(counts.world_tasks, Ordering::Relaxed);
        self.stats
            .last_registration_tasks
            .store(counts.registration_tasks, Ordering::Relaxed);

        if published % FRAME_LOG_INTERVAL == 0 {
            debug!(
                frame = published,
                world_tasks = counts.world_tasks,
                registration_tasks = counts.registration_tasks,
                "Depth frames published"
            );
        }
    }

    fn labels_for(
        &mut self,
        depth_mm: &[u16],
        world_points: &[WorldPoint],
        frame_number: u64,
    ) -> Arc<[u8]> {
        let dims = self.snapshots.dims().depth;
        let produced = self.labels.as_mut().and_then(|source| {
            source.labels(LabelInput {
                depth_mm,
                world_points,
                width: dims.width,
                height: dims.height,
                frame_number,
            })
        });

        match produced {
            Some(labels) if labels.len() == depth_mm.len() => labels.into(),
            Some(labels) => {
                warn!(
                    got = labels.len(),
                    expected = depth_mm.len(),
                    "Label buffer size mismatch, publishing zeroed labels"
                );
                vec![0; depth_mm.len()].into()
            }
            None => vec![0; depth_mm.len()].into(),
        }
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        // Drain in-flight conversions before the device goes away
        self.synchronizer.shutdown();
        self.session.stop_all();
        info!(
            frames = self.snapshots.depth_frame_number(),
            "Acquisition loop finished"
        );
    }
}
