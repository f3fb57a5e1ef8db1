// SPDX-License-Identifier: GPL-3.0-only

//! Per-frame dispatch and completion
//!
//! For each depth frame the synchronizer splits the grid into ascending,
//! non-overlapping ranges, submits one world-conversion task per range and,
//! when a color frame is available, one registration task per range. Every
//! task allocates its own output chunk and hands it to a shared
//! [`CompletionTracker`]. The acquisition thread blocks on the tracker until
//! every dispatched task has reported, then stitches the chunks together in
//! range order.
//!
//! With a single converter thread the same kernels run inline on the caller
//! and the pool is never touched.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::conversion::{ColorRegistration, DepthToWorld, Rgb, WorldPoint};
use super::pool::{WorkerPool, contract_violation};
use crate::errors::PipelineResult;

/// Lifecycle of one frame inside the synchronizer
///
/// `Dispatched` and `Waiting` are only held while [`FrameSynchronizer::process`]
/// runs on the calling thread, so [`FrameSynchronizer::state`] reports `Idle`
/// before the first frame and after shutdown, and `Complete` between frames.
/// Inline conversion has no waiting phase and goes from `Dispatched` straight
/// to `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Dispatched,
    Waiting,
    Complete,
}

/// Conversion jobs run per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    World,
    Registration,
}

/// Split `[0, len)` into at most `parts` ascending ranges
///
/// The first `len % parts` ranges are one element longer. Empty ranges are
/// not returned, so a grid smaller than `parts` yields `len` ranges.
pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let base = len / parts;
    let extra = len % parts;

    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let size = base + usize::from(i < extra);
        if size == 0 {
            continue;
        }
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

/// Output of one task
#[derive(Debug)]
pub enum TaskOutput {
    World(Vec<WorldPoint>),
    Registration(Vec<Rgb>),
}

#[derive(Debug)]
struct Completion {
    completed: usize,
    slots: Vec<Option<TaskOutput>>,
}

/// Counter plus condition variable shared by the tasks of one frame
#[derive(Debug)]
pub struct CompletionTracker {
    state: Mutex<Completion>,
    done: Condvar,
}

impl CompletionTracker {
    pub fn new(expected: usize) -> Self {
        Self {
            state: Mutex::new(Completion {
                completed: 0,
                slots: (0..expected).map(|_| None).collect(),
            }),
            done: Condvar::new(),
        }
    }

    /// Store the output of task `slot` and wake the waiter
    pub fn complete(&self, slot: usize, output: TaskOutput) {
        let mut state = self.state.lock();
        let Some(entry) = state.slots.get_mut(slot) else {
            contract_violation("task slot out of range");
        };
        if entry.is_some() {
            contract_violation("task completed twice");
        }
        *entry = Some(output);
        state.completed += 1;
        if state.completed == state.slots.len() {
            self.done.notify_all();
        }
    }

    /// Block until every slot is filled, then take the outputs in slot order
    pub fn wait(&self) -> Vec<TaskOutput> {
        let mut state = self.state.lock();
        while state.completed < state.slots.len() {
            self.done.wait(&mut state);
        }
        std::mem::take(&mut state.slots)
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| contract_violation("missing task output")))
            .collect()
    }
}

/// Inputs of the registration job
#[derive(Debug, Clone)]
pub struct RegistrationInput {
    pub params: ColorRegistration,
    /// RGB888 color grid
    pub color: Arc<[u8]>,
}

/// Converted buffers of one frame
#[derive(Debug, Default)]
pub struct FrameOutput {
    pub world_points: Vec<WorldPoint>,
    /// `None` when no registration was dispatched
    pub registered_color: Option<Vec<Rgb>>,
}

/// Task counts of the most recent frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    pub world_tasks: usize,
    pub registration_tasks: usize,
}

impl DispatchCounts {
    pub fn tasks(&self, job: JobKind) -> usize {
        match job {
            JobKind::World => self.world_tasks,
            JobKind::Registration => self.registration_tasks,
        }
    }
}

/// Drives the conversion jobs of each frame
pub struct FrameSynchronizer {
    pool: Option<WorkerPool>,
    converter_threads: usize,
    state: SyncState,
    last_dispatch: DispatchCounts,
}

impl FrameSynchronizer {
    /// `converter_threads` ranges per job on a pool of `worker_threads`
    ///
    /// A single converter thread converts inline and spawns no pool.
    pub fn new(worker_threads: usize, converter_threads: usize) -> PipelineResult<Self> {
        let converter_threads = converter_threads.max(1);
        let pool = if converter_threads > 1 {
            Some(WorkerPool::new(worker_threads)?)
        } else {
            None
        };

        Ok(Self {
            pool,
            converter_threads,
            state: SyncState::Idle,
            last_dispatch: DispatchCounts::default(),
        })
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn converter_threads(&self) -> usize {
        self.converter_threads
    }

    pub fn last_dispatch(&self) -> DispatchCounts {
        self.last_dispatch
    }

    /// Convert one depth frame, blocking until every dispatched task is done
    pub fn process(
        &mut self,
        depth_mm: Arc<[u16]>,
        world: DepthToWorld,
        registration: Option<RegistrationInput>,
    ) -> FrameOutput {
        let ranges = partition(depth_mm.len(), self.converter_threads);
        let counts = DispatchCounts {
            world_tasks: ranges.len(),
            registration_tasks: if registration.is_some() { ranges.len() } else { 0 },
        };

        let output = match &self.pool {
            Some(pool) => {
                self.state = SyncState::Dispatched;
                let tracker = dispatch(pool, &ranges, &depth_mm, world, registration.as_ref());
                self.state = SyncState::Waiting;
                let outputs = tracker.wait();
                assemble(outputs, depth_mm.len(), counts)
            }
            None => {
                self.state = SyncState::Dispatched;
                convert_inline(&ranges, &depth_mm, world, registration.as_ref())
            }
        };

        self.state = SyncState::Complete;
        self.last_dispatch = counts;
        trace!(
            world_tasks = counts.world_tasks,
            registration_tasks = counts.registration_tasks,
            "Frame conversion complete"
        );
        output
    }

    /// Drain the pool; later frames are converted inline
    pub fn shutdown(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            debug!("Frame synchronizer shutting down pool");
            pool.shutdown();
        }
        self.state = SyncState::Idle;
    }
}

fn dispatch(
    pool: &WorkerPool,
    ranges: &[Range<usize>],
    depth_mm: &Arc<[u16]>,
    world: DepthToWorld,
    registration: Option<&RegistrationInput>,
) -> Arc<CompletionTracker> {
    let jobs = if registration.is_some() { 2 } else { 1 };
    let tracker = Arc::new(CompletionTracker::new(ranges.len() * jobs));

    for (slot, range) in ranges.iter().cloned().enumerate() {
        let depth = Arc::clone(depth_mm);
        let tracker = Arc::clone(&tracker);
        pool.submit(move || {
            let chunk = world.convert_range(&depth, range);
            tracker.complete(slot, TaskOutput::World(chunk));
        });
    }

    if let Some(input) = registration {
        for (i, range) in ranges.iter().cloned().enumerate() {
            let slot = ranges.len() + i;
            let depth = Arc::clone(depth_mm);
            let color = Arc::clone(&input.color);
            let params = input.params;
            let tracker = Arc::clone(&tracker);
            pool.submit(move || {
                let chunk = params.register_range(&depth, &color, range);
                tracker.complete(slot, TaskOutput::Registration(chunk));
            });
        }
    }

    tracker
}

fn assemble(outputs: Vec<TaskOutput>, len: usize, counts: DispatchCounts) -> FrameOutput {
    let mut world_points = Vec::with_capacity(len);
    let mut registered = (counts.registration_tasks > 0).then(|| Vec::with_capacity(len));

    for output in outputs {
        match (output, registered.as_mut()) {
            (TaskOutput::World(chunk), _) => world_points.extend_from_slice(&chunk),
            (TaskOutput::Registration(chunk), Some(buffer)) => buffer.extend_from_slice(&chunk),
            (TaskOutput::Registration(_), None) => {
                contract_violation("registration output without registration job")
            }
        }
    }

    if world_points.len() != len || registered.as_ref().is_some_and(|r| r.len() != len) {
        contract_violation("converted chunks do not cover the depth grid");
    }

    FrameOutput {
        world_points,
        registered_color: registered,
    }
}

fn convert_inline(
    ranges: &[Range<usize>],
    depth_mm: &[u16],
    world: DepthToWorld,
    registration: Option<&RegistrationInput>,
) -> FrameOutput {
    let mut output = FrameOutput {
        world_points: Vec::with_capacity(depth_mm.len()),
        registered_color: registration.map(|_| Vec::with_capacity(depth_mm.len())),
    };

    for range in ranges {
        output
            .world_points
            .extend(world.convert_range(depth_mm, range.clone()));
        if let (Some(input), Some(buffer)) = (registration, output.registered_color.as_mut()) {
            buffer.extend(input.params.register_range(depth_mm, &input.color, range.clone()));
        }
    }
    output
}
