// SPDX-License-Identifier: GPL-3.0-only

//! In-process synthetic sensor
//!
//! Generates depth, color and infrared frames from a scripted [`Scene`] at
//! the negotiated frame rate. Used by the CLI when no hardware driver is
//! linked in and by the test suite, which relies on its fault injection:
//! corrupt depth frames, failing stream starts, failing waits and devices
//! without an infrared sensor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::types::{
    DeviceInfo, FieldOfView, FramePayload, PixelFormat, RawFrame, SensorMode, StreamKind,
};
use super::{SensorBackend, SensorDevice};
use crate::constants::{depth, kinect};
use crate::errors::SensorError;
use crate::processing::calibration::ColorCalibration;

/// Depth generator signature: `(x, y, frame_index) -> millimetres`
pub type SceneFn = dyn Fn(u32, u32, u64) -> u16 + Send + Sync;

/// Depth content of a synthetic device
#[derive(Clone)]
pub enum Scene {
    /// Every pixel at the same distance
    Constant(u16),
    /// Horizontal ramp from `near_mm` at the left edge to `far_mm` at the right
    Ramp { near_mm: u16, far_mm: u16 },
    /// Arbitrary generator
    Custom(Arc<SceneFn>),
}

impl Scene {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32, u32, u64) -> u16 + Send + Sync + 'static,
    {
        Scene::Custom(Arc::new(f))
    }

    fn sample(&self, x: u32, y: u32, width: u32, frame: u64) -> u16 {
        match self {
            Scene::Constant(mm) => *mm,
            Scene::Ramp { near_mm, far_mm } => {
                let t = x as f32 / width.saturating_sub(1).max(1) as f32;
                let near = *near_mm as f32;
                (near + (*far_mm as f32 - near) * t).round() as u16
            }
            Scene::Custom(f) => f(x, y, frame),
        }
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scene::Constant(mm) => write!(f, "Constant({})", mm),
            Scene::Ramp { near_mm, far_mm } => write!(f, "Ramp({}..{})", near_mm, far_mm),
            Scene::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Description of one synthetic device
#[derive(Debug, Clone)]
pub struct SyntheticDeviceSpec {
    pub info: DeviceInfo,
    pub depth_modes: Vec<SensorMode>,
    /// Empty when the device has no color camera
    pub color_modes: Vec<SensorMode>,
    /// Empty when the device has no infrared camera
    pub ir_modes: Vec<SensorMode>,
    pub depth_fov: Option<FieldOfView>,
    pub calibration: Option<ColorCalibration>,
    pub scene: Scene,
    /// Truncate every n-th depth frame
    pub corrupt_depth_every: Option<u64>,
    /// Fail every n-th depth wait with a driver error
    pub fail_wait_every: Option<u64>,
    /// Refuse to start this stream
    pub fail_start: Option<StreamKind>,
}

impl SyntheticDeviceSpec {
    /// A Kinect-like device: 640x480 depth, color and infrared
    pub fn kinect(uri: &str) -> Self {
        Self {
            info: DeviceInfo {
                uri: uri.to_string(),
                name: "Synthetic Kinect".to_string(),
                vendor: "Synthetic".to_string(),
            },
            depth_modes: vec![
                SensorMode::new(320, 240, 30, PixelFormat::Depth1Mm),
                SensorMode::new(640, 480, 30, PixelFormat::Depth1Mm),
                SensorMode::new(640, 480, 30, PixelFormat::Depth100Um),
                SensorMode::new(640, 480, 30, PixelFormat::Shift9_2),
            ],
            color_modes: vec![
                SensorMode::new(640, 480, 30, PixelFormat::Rgb888),
                SensorMode::new(640, 480, 15, PixelFormat::Yuv422),
                SensorMode::new(1280, 1024, 15, PixelFormat::Rgb888),
            ],
            ir_modes: vec![SensorMode::new(640, 480, 30, PixelFormat::Gray16)],
            depth_fov: Some(FieldOfView {
                horizontal: kinect::DEPTH_HFOV,
                vertical: kinect::DEPTH_VFOV,
            }),
            calibration: Some(ColorCalibration::kinect_default()),
            scene: Scene::Ramp {
                near_mm: 800,
                far_mm: 3500,
            },
            corrupt_depth_every: None,
            fail_wait_every: None,
            fail_start: None,
        }
    }

    /// A device with a single mode per stream, all at the same geometry
    pub fn with_geometry(uri: &str, width: u32, height: u32, fps: u32) -> Self {
        let mut spec = Self::kinect(uri);
        spec.depth_modes = vec![SensorMode::new(width, height, fps, PixelFormat::Depth1Mm)];
        spec.color_modes = vec![SensorMode::new(width, height, fps, PixelFormat::Rgb888)];
        spec.ir_modes = vec![SensorMode::new(width, height, fps, PixelFormat::Gray16)];
        spec
    }

    pub fn scene(mut self, scene: Scene) -> Self {
        self.scene = scene;
        self
    }

    pub fn without_ir(mut self) -> Self {
        self.ir_modes.clear();
        self
    }

    pub fn corrupt_depth_every(mut self, n: u64) -> Self {
        self.corrupt_depth_every = Some(n.max(1));
        self
    }

    pub fn fail_wait_every(mut self, n: u64) -> Self {
        self.fail_wait_every = Some(n.max(1));
        self
    }

    pub fn fail_start(mut self, stream: StreamKind) -> Self {
        self.fail_start = Some(stream);
        self
    }

    fn modes(&self, stream: StreamKind) -> &[SensorMode] {
        match stream {
            StreamKind::Depth => &self.depth_modes,
            StreamKind::Color => &self.color_modes,
            StreamKind::Infrared => &self.ir_modes,
        }
    }
}

/// Synthetic driver library
pub struct SyntheticBackend {
    name: String,
    devices: Vec<SyntheticDeviceSpec>,
    fail_initialize: bool,
    initialize_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    stopped_streams: Arc<Mutex<Vec<StreamKind>>>,
}

impl SyntheticBackend {
    /// Backend with one Kinect-like device at `synthetic://0`
    pub fn new(name: &str) -> Self {
        Self::with_devices(name, vec![SyntheticDeviceSpec::kinect("synthetic://0")])
    }

    pub fn with_devices(name: &str, devices: Vec<SyntheticDeviceSpec>) -> Self {
        Self {
            name: name.to_string(),
            devices,
            fail_initialize: false,
            initialize_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            stopped_streams: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make `initialize` report a driver error
    pub fn fail_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    /// Streams stopped on any device of this backend, in order
    pub fn stopped_streams(&self) -> Vec<StreamKind> {
        self.stopped_streams.lock().clone()
    }
}

impl SensorBackend for SyntheticBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self) -> Result<(), SensorError> {
        if self.fail_initialize {
            return Err(SensorError::driver("initialize", "driver unavailable"));
        }
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, SensorError> {
        Ok(self.devices.iter().map(|d| d.info.clone()).collect())
    }

    fn open_device(&self, uri: Option<&str>) -> Result<Box<dyn SensorDevice>, SensorError> {
        let spec = match uri {
            Some(uri) => self.devices.iter().find(|d| d.info.uri == uri),
            None => self.devices.first(),
        }
        .ok_or_else(|| SensorError::DeviceNotFound(uri.unwrap_or("<any>").to_string()))?;

        info!(backend = %self.name, device = %spec.info.uri, "Opened synthetic device");
        Ok(Box::new(SyntheticDevice {
            stop_log: Arc::clone(&self.stopped_streams),
            ..SyntheticDevice::new(spec.clone())
        }))
    }
}

#[derive(Debug, Default)]
struct StreamState {
    mode: Option<SensorMode>,
    started: bool,
    next_due: Option<Instant>,
    pending: bool,
    frames: u64,
    waits: u64,
}

/// Open synthetic device session
pub struct SyntheticDevice {
    spec: SyntheticDeviceSpec,
    streams: HashMap<StreamKind, StreamState>,
    depth_color_sync: bool,
    image_registration: bool,
    epoch: Instant,
    stop_log: Arc<Mutex<Vec<StreamKind>>>,
}

impl SyntheticDevice {
    pub fn new(spec: SyntheticDeviceSpec) -> Self {
        let streams = StreamKind::ALL
            .iter()
            .map(|s| (*s, StreamState::default()))
            .collect();
        Self {
            spec,
            streams,
            depth_color_sync: false,
            image_registration: false,
            epoch: Instant::now(),
            stop_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn depth_color_sync(&self) -> bool {
        self.depth_color_sync
    }

    pub fn image_registration(&self) -> bool {
        self.image_registration
    }

    fn state_mut(&mut self, stream: StreamKind) -> &mut StreamState {
        self.streams.entry(stream).or_default()
    }

    fn generate(&self, stream: StreamKind, mode: SensorMode, frame: u64) -> FramePayload {
        let (w, h) = (mode.width, mode.height);
        match stream {
            StreamKind::Depth => {
                let scale = match mode.format {
                    PixelFormat::Depth100Um => depth::HUNDRED_UM_PER_MM,
                    _ => 1,
                };
                let mut data = Vec::with_capacity(mode.pixel_count());
                for y in 0..h {
                    for x in 0..w {
                        let mm = self.spec.scene.sample(x, y, w, frame);
                        data.push(mm.saturating_mul(scale));
                    }
                }
                FramePayload::Depth(data)
            }
            StreamKind::Color => {
                let mut data = Vec::with_capacity(mode.pixel_count() * 3);
                for y in 0..h {
                    for x in 0..w {
                        data.push((x * 255 / w.max(1)) as u8);
                        data.push((y * 255 / h.max(1)) as u8);
                        data.push((frame % 256) as u8);
                    }
                }
                FramePayload::Rgb(data)
            }
            StreamKind::Infrared => {
                let mut data = Vec::with_capacity(mode.pixel_count());
                for y in 0..h {
                    for x in 0..w {
                        data.push((((x + y) as u64 + frame) & 0x03ff) as u16);
                    }
                }
                FramePayload::Gray16(data)
            }
        }
    }
}

impl SensorDevice for SyntheticDevice {
    fn info(&self) -> &DeviceInfo {
        &self.spec.info
    }

    fn has_sensor(&self, stream: StreamKind) -> bool {
        !self.spec.modes(stream).is_empty()
    }

    fn supported_modes(&self, stream: StreamKind) -> Vec<SensorMode> {
        self.spec.modes(stream).to_vec()
    }

    fn set_mode(&mut self, stream: StreamKind, mode: SensorMode) -> Result<(), SensorError> {
        if !self.has_sensor(stream) {
            return Err(SensorError::NoSensor(stream));
        }
        if !self.spec.modes(stream).contains(&mode) {
            return Err(SensorError::ModeNotFound {
                stream,
                detail: mode.to_string(),
            });
        }
        debug!(stream = %stream, mode = %mode, "Synthetic mode set");
        self.state_mut(stream).mode = Some(mode);
        Ok(())
    }

    fn current_mode(&self, stream: StreamKind) -> Option<SensorMode> {
        self.streams.get(&stream).and_then(|s| s.mode)
    }

    fn field_of_view(&self, stream: StreamKind) -> Option<FieldOfView> {
        match stream {
            StreamKind::Depth | StreamKind::Infrared => self.spec.depth_fov,
            StreamKind::Color => None,
        }
    }

    fn color_calibration(&self) -> Option<ColorCalibration> {
        self.spec.calibration
    }

    fn set_depth_color_sync(&mut self, enabled: bool) -> Result<(), SensorError> {
        self.depth_color_sync = enabled;
        Ok(())
    }

    fn set_image_registration(&mut self, enabled: bool) -> Result<(), SensorError> {
        self.image_registration = enabled;
        Ok(())
    }

    fn start_stream(&mut self, stream: StreamKind) -> Result<(), SensorError> {
        if self.spec.fail_start == Some(stream) {
            return Err(SensorError::StreamStart(
                stream,
                "injected start failure".to_string(),
            ));
        }
        let state = self.state_mut(stream);
        if state.mode.is_none() {
            return Err(SensorError::driver(
                format!("start {} stream", stream),
                "no mode set",
            ));
        }
        state.started = true;
        state.next_due = Some(Instant::now());
        info!(stream = %stream, "Synthetic stream started");
        Ok(())
    }

    fn stop_stream(&mut self, stream: StreamKind) {
        let state = self.state_mut(stream);
        if state.started {
            state.started = false;
            state.pending = false;
            self.stop_log.lock().push(stream);
            debug!(stream = %stream, "Synthetic stream stopped");
        }
    }

    fn wait_for_frame(
        &mut self,
        stream: StreamKind,
        timeout: Duration,
    ) -> Result<bool, SensorError> {
        let fail_every = match stream {
            StreamKind::Depth => self.spec.fail_wait_every,
            _ => None,
        };
        let state = self.state_mut(stream);
        if !state.started {
            return Err(SensorError::NotStarted(stream));
        }
        if state.pending {
            return Ok(true);
        }

        state.waits += 1;
        if let Some(n) = fail_every
            && state.waits % n == 0
        {
            return Err(SensorError::driver("wait for frame", "injected wait failure"));
        }

        let fps = state.mode.map(|m| m.fps).unwrap_or(30).max(1);
        let period = Duration::from_secs_f64(1.0 / fps as f64);
        let now = Instant::now();
        let due = state.next_due.unwrap_or(now);

        if due > now {
            let remaining = due - now;
            if remaining > timeout {
                thread::sleep(timeout);
                return Ok(false);
            }
            thread::sleep(remaining);
        }

        let now = Instant::now();
        // Fall back to the current time when the reader lags behind by more than a period
        let next = due + period;
        state.next_due = Some(if next < now { now + period } else { next });
        state.pending = true;
        Ok(true)
    }

    fn read_frame(&mut self, stream: StreamKind) -> Result<RawFrame, SensorError> {
        let epoch = self.epoch;
        let corrupt_every = self.spec.corrupt_depth_every;
        let state = self.state_mut(stream);
        if !state.started {
            return Err(SensorError::NotStarted(stream));
        }
        if !state.pending {
            return Err(SensorError::driver(
                format!("read {} frame", stream),
                "no frame ready",
            ));
        }
        let Some(mode) = state.mode else {
            return Err(SensorError::NotStarted(stream));
        };
        state.pending = false;
        state.frames += 1;
        let frame = state.frames;

        let mut payload = self.generate(stream, mode, frame);
        if stream == StreamKind::Depth
            && let Some(n) = corrupt_every
            && frame % n == 0
            && let FramePayload::Depth(data) = &mut payload
        {
            data.truncate(data.len() / 2);
        }

        trace!(stream = %stream, frame, "Synthetic frame generated");
        Ok(RawFrame {
            stream,
            width: mode.width,
            height: mode.height,
            format: mode.format,
            timestamp_us: epoch.elapsed().as_micros() as u64,
            payload,
        })
    }
}
