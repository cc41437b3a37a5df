//! Work dispatch to downstream pipeline stages.
//!
//! Once a frame is fully decided, the dispatcher acquires its reference
//! object (for frames other frames will hold) and a shared motion-estimation
//! buffer, then emits one work unit per spatial segment. Frames planned for
//! temporal filtering emit their filter units first, since filtering is a
//! synchronization barrier ahead of motion estimation. Alt-ref frames with
//! an overlay companion emit the overlay as a zero-delay follower carrying a
//! hardcoded self-reference.
//!
//! Live-count increments performed here must balance exactly against the
//! decrements downstream reference cleanup performs on completion.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, warn};

use crate::frame::{FrameDescriptor, FrameType};
use crate::rps::{RefRole, ResolvedRef};

/// Kind of downstream work a unit carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// First-pass motion estimation for lookahead rate control.
    FirstPassMe,
    /// Pre-encode temporal filtering.
    TemporalFilter,
    /// Full motion estimation for encoding.
    MotionEstimation,
}

/// Per-frame completion signal for workloads that act as pipeline barriers.
///
/// Temporal filtering runs synchronously inside an otherwise pipelined
/// system: the decision stage hands out one unit per segment and blocks on
/// this signal until every segment's consumer has called [`complete`].
///
/// [`complete`]: CompletionBarrier::complete
#[derive(Debug)]
pub struct CompletionBarrier {
    remaining: Mutex<u32>,
    done: Condvar,
}

impl CompletionBarrier {
    /// Create a barrier waiting on `count` completions.
    pub fn new(count: u32) -> Self {
        Self {
            remaining: Mutex::new(count),
            done: Condvar::new(),
        }
    }

    /// Signal one segment's completion.
    pub fn complete(&self) {
        let mut remaining = self.remaining.lock().expect("barrier lock");
        if *remaining == 0 {
            warn!("completion signaled on an already-open barrier");
            return;
        }
        *remaining -= 1;
        if *remaining == 0 {
            self.done.notify_all();
        }
    }

    /// Block until every segment has completed.
    pub fn wait(&self) {
        let mut remaining = self.remaining.lock().expect("barrier lock");
        while *remaining > 0 {
            remaining = self.done.wait(remaining).expect("barrier lock");
        }
    }
}

/// One spatial segment of work for a downstream stage.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    /// What the downstream stage should do.
    pub task: TaskKind,
    /// The decided frame the segment belongs to.
    pub frame: Arc<FrameDescriptor>,
    /// Segment index within the frame.
    pub segment_index: u32,
    /// Total segments in the frame.
    pub segment_count: u32,
    /// Completion signal shared by the frame's segments, for workloads the
    /// pipeline must block on.
    pub barrier: Option<Arc<CompletionBarrier>>,
}

impl WorkUnit {
    /// Signal this segment's completion, if the unit carries a barrier.
    pub fn complete(&self) {
        if let Some(barrier) = &self.barrier {
            barrier.complete();
        }
    }
}

/// External allocator of reusable, counted reference-frame buffers.
///
/// The decision core only acquires and releases; buffer storage and reuse
/// policy belong to the caller.
pub trait ReferencePool {
    /// Take one hold on the reference buffer for `poc`.
    fn acquire(&mut self, poc: u64);
    /// Drop one hold on the reference buffer for `poc`.
    fn release(&mut self, poc: u64);
}

/// Simple counting pool for tests and standalone use.
#[derive(Debug, Default)]
pub struct CountingPool {
    live: HashMap<u64, u32>,
}

impl CountingPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding holds for one POC.
    pub fn live(&self, poc: u64) -> u32 {
        self.live.get(&poc).copied().unwrap_or(0)
    }

    /// Outstanding holds across all POCs.
    pub fn total_live(&self) -> u32 {
        self.live.values().sum()
    }
}

impl ReferencePool for CountingPool {
    fn acquire(&mut self, poc: u64) {
        *self.live.entry(poc).or_insert(0) += 1;
    }

    fn release(&mut self, poc: u64) {
        match self.live.get_mut(&poc) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    self.live.remove(&poc);
                }
            }
            _ => warn!(poc, "release without matching acquire"),
        }
    }
}

/// Emits per-segment work units and manages reference-object lifecycle.
#[derive(Debug)]
pub struct Dispatcher {
    segment_count: u32,
    /// Shared motion-estimation buffers handed out and not yet returned.
    me_buffers_live: u32,
}

impl Dispatcher {
    /// Create a dispatcher splitting each frame into `segment_count` units.
    pub fn new(segment_count: u32) -> Self {
        assert!(segment_count > 0, "segment count must be non-zero");
        Self {
            segment_count,
            me_buffers_live: 0,
        }
    }

    fn segments(
        &self,
        task: TaskKind,
        frame: &Arc<FrameDescriptor>,
        barrier: Option<&Arc<CompletionBarrier>>,
    ) -> Vec<WorkUnit> {
        (0..self.segment_count)
            .map(|segment_index| WorkUnit {
                task,
                frame: Arc::clone(frame),
                segment_index,
                segment_count: self.segment_count,
                barrier: barrier.map(Arc::clone),
            })
            .collect()
    }

    /// Emit the work units for one decided frame, in decode order.
    ///
    /// Filter units precede motion-estimation units and share one
    /// completion barrier; the pipeline stage blocks on it before letting
    /// the frame's encode work proceed.
    pub fn dispatch(
        &mut self,
        frame: FrameDescriptor,
        pool: &mut dyn ReferencePool,
    ) -> Vec<WorkUnit> {
        if frame.is_reference {
            pool.acquire(frame.poc());
        }
        self.me_buffers_live += 1;

        let needs_overlay = frame.controls.enable_overlays
            && !frame.show_frame
            && frame.temporal_layer == 0
            && frame.filter_window.is_some();
        let frame = Arc::new(frame);

        let mut units = Vec::new();
        if frame.filter_window.is_some() {
            let barrier = Arc::new(CompletionBarrier::new(self.segment_count));
            units.extend(self.segments(TaskKind::TemporalFilter, &frame, Some(&barrier)));
        }
        units.extend(self.segments(TaskKind::MotionEstimation, &frame, None));

        if needs_overlay {
            let overlay = Arc::new(make_overlay(&frame));
            units.extend(self.segments(TaskKind::MotionEstimation, &overlay, None));
        }

        debug!(
            poc = frame.poc(),
            units = units.len(),
            "dispatched frame segments"
        );
        units
    }

    /// Emit first-pass motion-estimation work for a lookahead frame.
    pub fn dispatch_first_pass(&self, frame: Arc<FrameDescriptor>) -> Vec<WorkUnit> {
        self.segments(TaskKind::FirstPassMe, &frame, None)
    }

    /// Downstream returned one motion-estimation buffer.
    pub fn me_buffer_released(&mut self) {
        if self.me_buffers_live == 0 {
            warn!("motion-estimation buffer released twice");
            return;
        }
        self.me_buffers_live -= 1;
    }

    /// Motion-estimation buffers currently handed out.
    pub fn me_buffers_live(&self) -> u32 {
        self.me_buffers_live
    }
}

/// The overlay companion of a filtered alt-ref frame: redisplays the same
/// POC with zero delay, referencing only the alt-ref itself.
fn make_overlay(altref: &FrameDescriptor) -> FrameDescriptor {
    let slot = altref.rps.refresh_mask.trailing_zeros() as u8;
    let mut overlay = FrameDescriptor::new(altref.analyzed.clone(), altref.controls);
    overlay.frame_type = FrameType::Overlay;
    overlay.decode_order = altref.decode_order + 1;
    overlay.temporal_layer = altref.temporal_layer;
    overlay.hierarchical_depth = altref.hierarchical_depth;
    overlay.gop_position = altref.gop_position;
    overlay.show_frame = true;
    overlay.is_reference = false;
    overlay.rps.list0 = vec![ResolvedRef {
        role: RefRole::Last,
        slot,
        poc: altref.poc(),
    }];
    overlay
}
