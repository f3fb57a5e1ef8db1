// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot buffer manager
//!
//! The latest complete frame set lives behind one mutex as reference-counted
//! buffers. The acquisition thread converts into fresh buffers without
//! holding the lock and then swaps them in with a single short critical
//! section, so a reader holding a [`Snapshot`] sees depth, world points,
//! registered color and labels from the same frame and never stalls
//! conversion for longer than one publish.
//!
//! Frame counters are mirrored into atomics and can be read without the lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::processing::{Rgb, WorldPoint};
use crate::sensor::Dimensions;

/// Grid dimensions of each stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamDims {
    pub depth: Dimensions,
    pub color: Dimensions,
    pub infrared: Dimensions,
}

/// All buffers of one published frame
#[derive(Debug, Clone)]
pub struct FrameSet {
    /// Depth as delivered by the driver
    pub depth: Arc<[u16]>,
    /// Depth in millimetres
    pub depth_mm: Arc<[u16]>,
    pub infrared: Arc<[u16]>,
    /// RGB888 color as delivered by the driver
    pub color: Arc<[u8]>,
    /// Color resampled onto the depth grid
    pub registered_color: Arc<[Rgb]>,
    /// Color frame the registered color was sampled from, 0 before the first
    pub registered_color_frame: u64,
    pub world_points: Arc<[WorldPoint]>,
    pub labels: Arc<[u8]>,
    pub depth_frame: u64,
    pub color_frame: u64,
    pub ir_frame: u64,
    /// Driver timestamp of the depth frame (microseconds)
    pub depth_timestamp_us: u64,
}

impl FrameSet {
    /// Zero-filled buffers sized for `dims`
    pub fn empty(dims: StreamDims) -> Self {
        let depth_len = dims.depth.pixel_count();
        Self {
            depth: zeroed(depth_len),
            depth_mm: zeroed(depth_len),
            infrared: zeroed(dims.infrared.pixel_count()),
            color: zeroed(dims.color.pixel_count() * 3),
            registered_color: zeroed(depth_len),
            registered_color_frame: 0,
            world_points: zeroed(depth_len),
            labels: zeroed(depth_len),
            depth_frame: 0,
            color_frame: 0,
            ir_frame: 0,
            depth_timestamp_us: 0,
        }
    }
}

fn zeroed<T: Default + Clone>(len: usize) -> Arc<[T]> {
    vec![T::default(); len].into()
}

/// Buffers produced by one depth frame
#[derive(Debug, Clone)]
pub struct DepthUpdate {
    pub depth: Arc<[u16]>,
    pub depth_mm: Arc<[u16]>,
    pub world_points: Arc<[WorldPoint]>,
    /// Registered color and its source color frame; `None` leaves the
    /// previous registered color in place
    pub registered_color: Option<(Arc<[Rgb]>, u64)>,
    pub labels: Arc<[u8]>,
    pub timestamp_us: u64,
}

#[derive(Debug, Default)]
struct FrameCounters {
    depth: AtomicU64,
    color: AtomicU64,
    infrared: AtomicU64,
    /// `f64` seconds stored as bits
    depth_time: AtomicU64,
}

/// Owner of the published frame set
#[derive(Debug)]
pub struct SnapshotManager {
    frames: Mutex<FrameSet>,
    counters: FrameCounters,
    dims: StreamDims,
}

impl SnapshotManager {
    pub fn new(dims: StreamDims) -> Self {
        Self {
            frames: Mutex::new(FrameSet::empty(dims)),
            counters: FrameCounters::default(),
            dims,
        }
    }

    /// Lock the frame set for reading
    ///
    /// Publication blocks until the returned guard is dropped.
    pub fn lock(&self) -> Snapshot<'_> {
        Snapshot {
            frames: self.frames.lock(),
        }
    }

    pub fn dims(&self) -> StreamDims {
        self.dims
    }

    pub fn depth_frame_number(&self) -> u64 {
        self.counters.depth.load(Ordering::Acquire)
    }

    pub fn color_frame_number(&self) -> u64 {
        self.counters.color.load(Ordering::Acquire)
    }

    pub fn ir_frame_number(&self) -> u64 {
        self.counters.infrared.load(Ordering::Acquire)
    }

    /// Timestamp of the latest depth frame in seconds
    pub fn depth_frame_time(&self) -> f64 {
        f64::from_bits(self.counters.depth_time.load(Ordering::Acquire))
    }

    /// Swap in the buffers of a converted depth frame
    pub fn publish_depth(&self, update: DepthUpdate) -> u64 {
        let mut frames = self.frames.lock();
        frames.depth = update.depth;
        frames.depth_mm = update.depth_mm;
        frames.world_points = update.world_points;
        if let Some((registered, color_frame)) = update.registered_color {
            frames.registered_color = registered;
            frames.registered_color_frame = color_frame;
        }
        frames.labels = update.labels;
        frames.depth_timestamp_us = update.timestamp_us;

        let seconds = update.timestamp_us as f64 / 1_000_000.0;
        self.counters
            .depth_time
            .store(seconds.to_bits(), Ordering::Release);
        let number = self.counters.depth.fetch_add(1, Ordering::AcqRel) + 1;
        frames.depth_frame = number;
        trace!(frame = number, "Published depth frame");
        number
    }

    pub fn publish_color(&self, color: Arc<[u8]>) -> u64 {
        let mut frames = self.frames.lock();
        frames.color = color;
        let number = self.counters.color.fetch_add(1, Ordering::AcqRel) + 1;
        frames.color_frame = number;
        number
    }

    pub fn publish_infrared(&self, infrared: Arc<[u16]>) -> u64 {
        let mut frames = self.frames.lock();
        frames.infrared = infrared;
        let number = self.counters.infrared.fetch_add(1, Ordering::AcqRel) + 1;
        frames.ir_frame = number;
        number
    }
}

/// Read access to the latest frame set
///
/// Views borrow from the guard and cannot outlive it.
pub struct Snapshot<'a> {
    frames: MutexGuard<'a, FrameSet>,
}

impl Snapshot<'_> {
    pub fn depth(&self) -> &[u16] {
        &self.frames.depth
    }

    pub fn depth_1mm(&self) -> &[u16] {
        &self.frames.depth_mm
    }

    pub fn infrared(&self) -> &[u16] {
        &self.frames.infrared
    }

    pub fn color(&self) -> &[u8] {
        &self.frames.color
    }

    pub fn registered_color(&self) -> &[Rgb] {
        &self.frames.registered_color
    }

    pub fn world_points(&self) -> &[WorldPoint] {
        &self.frames.world_points
    }

    pub fn labels(&self) -> &[u8] {
        &self.frames.labels
    }

    /// Color frame number the registered color belongs to
    pub fn registered_color_frame(&self) -> u64 {
        self.frames.registered_color_frame
    }

    /// World points as packed `[x, y, z]` f32 triples, ready for a vertex buffer
    pub fn world_point_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.frames.world_points[..])
    }

    /// Depth frame number the buffers belong to
    pub fn depth_frame_number(&self) -> u64 {
        self.frames.depth_frame
    }

    pub fn color_frame_number(&self) -> u64 {
        self.frames.color_frame
    }

    pub fn ir_frame_number(&self) -> u64 {
        self.frames.ir_frame
    }

    pub fn depth_frame_time(&self) -> f64 {
        self.frames.depth_timestamp_us as f64 / 1_000_000.0
    }

    /// Keep the buffers past the lock by cloning their handles
    pub fn to_frame_set(&self) -> FrameSet {
        self.frames.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> StreamDims {
        StreamDims {
            depth: Dimensions::new(4, 2),
            color: Dimensions::new(4, 2),
            infrared: Dimensions::new(4, 2),
        }
    }

    fn update(value: u16) -> DepthUpdate {
        DepthUpdate {
            depth: vec![value; 8].into(),
            depth_mm: vec![value; 8].into(),
            world_points: vec![WorldPoint::new(0.0, 0.0, value as f32 / 1000.0); 8].into(),
            registered_color: None,
            labels: vec![0; 8].into(),
            timestamp_us: 1_500_000,
        }
    }

    #[test]
    fn test_empty_frame_set_is_zeroed() {
        let manager = SnapshotManager::new(dims());
        let snapshot = manager.lock();
        assert_eq!(snapshot.depth().len(), 8);
        assert_eq!(snapshot.color().len(), 24);
        assert!(snapshot.world_points().iter().all(|p| !p.is_valid()));
        assert_eq!(snapshot.depth_frame_number(), 0);
    }

    #[test]
    fn test_publish_advances_counters_by_one() {
        let manager = SnapshotManager::new(dims());
        assert_eq!(manager.publish_depth(update(1000)), 1);
        assert_eq!(manager.publish_depth(update(1100)), 2);
        assert_eq!(manager.publish_color(vec![9; 24].into()), 1);

        assert_eq!(manager.depth_frame_number(), 2);
        assert_eq!(manager.color_frame_number(), 1);
        assert_eq!(manager.ir_frame_number(), 0);
        assert_eq!(manager.depth_frame_time(), 1.5);

        let snapshot = manager.lock();
        assert_eq!(snapshot.depth_frame_number(), 2);
        assert!(snapshot.depth_1mm().iter().all(|&d| d == 1100));
    }

    #[test]
    fn test_missing_registration_keeps_previous_buffer() {
        let manager = SnapshotManager::new(dims());
        let mut first = update(1000);
        first.registered_color = Some((vec![[1, 2, 3]; 8].into(), 4));
        manager.publish_depth(first);
        manager.publish_depth(update(1200));

        let snapshot = manager.lock();
        assert!(snapshot.registered_color().iter().all(|px| *px == [1, 2, 3]));
        assert_eq!(snapshot.registered_color_frame(), 4);
    }

    #[test]
    fn test_held_snapshot_survives_publication() {
        let manager = SnapshotManager::new(dims());
        manager.publish_depth(update(1000));
        let kept = manager.lock().to_frame_set();
        manager.publish_depth(update(2000));

        assert!(kept.depth_mm.iter().all(|&d| d == 1000));
        assert!(manager.lock().depth_1mm().iter().all(|&d| d == 2000));
    }

    #[test]
    fn test_world_point_bytes_are_packed() {
        let manager = SnapshotManager::new(dims());
        manager.publish_depth(update(1500));

        let snapshot = manager.lock();
        let bytes = snapshot.world_point_bytes();
        assert_eq!(bytes.len(), 8 * 12);
        assert_eq!(f32::from_ne_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), 1.5);
    }
}
