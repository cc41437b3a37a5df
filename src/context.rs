//! The decision context: owned, encoder-instance-wide mutable state.
//!
//! `DecisionContext` drives the whole picture-decision flow for one stream:
//! reorder queue, scene-change detection, pending-buffer assembly, mini-GOP
//! partitioning, reference-dependency tracking, RPS generation (or manual
//! DPB emulation), temporal-filter planning, and dispatch. It is constructed
//! from a validated `SequenceConfig`, passed by mutable reference, and torn
//! down with the encoder instance; nothing here is global.
//!
//! Frame decisions run in display order; dispatch runs in decode order. A
//! corrupted-frame condition poisons the context: the frame's processing is
//! abandoned with no partial output, and every later call fails with the
//! same error, since a desynchronized DPB invalidates all subsequent
//! references.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{IntraRefreshType, SequenceConfig};
use crate::dispatch::{Dispatcher, ReferencePool, WorkUnit};
use crate::error::{CorruptKind, FramePlanError, Result};
use crate::frame::{AnalyzedFrame, FrameControls, FrameDescriptor, FrameType};
use crate::gop::GopTemplateSet;
use crate::minigop::{partition_mini_gops, MiniGop};
use crate::refdeps::ReferenceQueue;
use crate::reorder::ReorderQueue;
use crate::rps::manual::ManualDpb;
use crate::rps::RpsGenerator;
use crate::scene::SceneChangeDetector;
use crate::tfilter::FilterWindowPlanner;

/// Admitted frames kept around for temporal-filter past windows.
const RECENT_WINDOW: usize = 16;

/// Farthest neighbour the temporal-filter planner will consider.
const MAX_FILTER_REACH: u64 = 8;

/// Encoder-instance-wide decision state.
#[derive(Debug)]
pub struct DecisionContext {
    config: SequenceConfig,
    controls: FrameControls,
    templates: GopTemplateSet,
    reorder: ReorderQueue,
    scene: Option<SceneChangeDetector>,
    manual: Option<ManualDpb>,
    refs: ReferenceQueue,
    rps: RpsGenerator,
    tf: FilterWindowPlanner,
    dispatcher: Dispatcher,
    /// Display-ordered frames awaiting partitioning.
    pending: Vec<FrameDescriptor>,
    /// Recently admitted analysis data, for filter past windows and the
    /// scene detector's previous-frame input.
    recent: VecDeque<AnalyzedFrame>,
    decode_counter: u64,
    frames_since_rap: u64,
    total_admitted: u64,
    /// Depth of the most recently processed mini-GOP.
    last_gop_depth: Option<u8>,
    /// POC of that group's base frame (the next group's opener).
    last_base_poc: Option<u64>,
    force_key: bool,
    /// First corrupted-frame condition observed; latches the stream dead.
    poisoned: Option<(u64, CorruptKind)>,
}

impl DecisionContext {
    /// Build a context from a validated configuration.
    pub fn new(config: SequenceConfig) -> Result<Self> {
        config.validate()?;
        if config.width == 0 || config.height == 0 {
            return Err(FramePlanError::MissingContext("stream dimensions"));
        }

        let controls = FrameControls::for_preset(config.preset);
        let templates = GopTemplateSet::build(config.hierarchical_depth, config.prediction);
        let scd_delay = config.scd_delay();
        let capacity = (2usize << config.hierarchical_depth) + scd_delay as usize + 8;
        let scene = config.scene_detection.then(|| {
            SceneChangeDetector::new(
                config.region_count() as usize,
                config.region_area(),
                config.abrupt_region_percent,
            )
        });
        let manual = config.manual_prediction.as_ref().map(ManualDpb::new);
        let tf = FilterWindowPlanner::new(config.filter_window, config.width, config.height);
        let dispatcher = Dispatcher::new(config.segment_count());

        info!(
            width = config.width,
            height = config.height,
            depth = config.hierarchical_depth,
            manual = manual.is_some(),
            "decision context initialized"
        );

        Ok(Self {
            reorder: ReorderQueue::new(capacity, scd_delay),
            scene,
            manual,
            refs: ReferenceQueue::default(),
            rps: RpsGenerator::new(),
            tf,
            dispatcher,
            pending: Vec::new(),
            recent: VecDeque::new(),
            decode_counter: 0,
            frames_since_rap: 0,
            total_admitted: 0,
            last_gop_depth: None,
            last_base_poc: None,
            force_key: false,
            poisoned: None,
            controls,
            templates,
            config,
        })
    }

    /// Force the next admitted frame to be a key frame.
    pub fn request_key_frame(&mut self) {
        self.force_key = true;
    }

    /// Feed one analyzed frame, in any arrival order. Returns the work
    /// units whose decisions completed.
    pub fn on_frame(
        &mut self,
        frame: AnalyzedFrame,
        pool: &mut dyn ReferencePool,
    ) -> Result<Vec<WorkUnit>> {
        self.check_poisoned()?;
        self.reorder.push(frame)?;

        let mut units = Vec::new();
        self.emit_first_pass(&mut units);
        let result = self.drain_reorder(pool, &mut units);
        self.latch(result)?;
        Ok(units)
    }

    /// Flag end of stream: drains the reorder queue without lookahead,
    /// flushes the partial pending buffer, and releases reference state.
    pub fn flush(&mut self, pool: &mut dyn ReferencePool) -> Result<Vec<WorkUnit>> {
        self.check_poisoned()?;
        self.reorder.set_eos();

        let mut units = Vec::new();
        let result = self
            .drain_reorder(pool, &mut units)
            .and_then(|_| self.process_pending(pool, &mut units));
        self.latch(result)?;

        let leftover = self.refs.drain();
        if !leftover.is_empty() {
            debug!(?leftover, "references undrained at end of stream");
        }
        info!(frames = self.total_admitted, "stream flushed");
        Ok(units)
    }

    fn check_poisoned(&self) -> Result<()> {
        if let Some((poc, kind)) = self.poisoned {
            return Err(FramePlanError::corrupt(poc, kind));
        }
        Ok(())
    }

    /// Latch corrupted-frame conditions: the stream is unrecoverable.
    fn latch(&mut self, result: Result<()>) -> Result<()> {
        if let Err(FramePlanError::CorruptFrame { poc, kind }) = &result {
            warn!(poc, %kind, "stream poisoned by corrupted frame");
            self.poisoned = Some((*poc, *kind));
        }
        result
    }

    /// Lazy first-pass trigger for lookahead rate control: frames become
    /// first-pass work as soon as they are visible in the reorder queue.
    fn emit_first_pass(&mut self, units: &mut Vec<WorkUnit>) {
        if !self.config.lookahead_first_pass {
            return;
        }
        let head = self.reorder.head_poc();
        for poc in self.reorder.take_first_pass_candidates() {
            if let Some(analyzed) = self.reorder.lookahead(poc - head) {
                let descriptor =
                    Arc::new(FrameDescriptor::new(analyzed.clone(), self.controls));
                units.extend(self.dispatcher.dispatch_first_pass(descriptor));
            }
        }
    }

    /// Release every frame the reorder queue has forward context for.
    fn drain_reorder(
        &mut self,
        pool: &mut dyn ReferencePool,
        units: &mut Vec<WorkUnit>,
    ) -> Result<()> {
        while self.reorder.front_ready() {
            let decision = self.detect_scene();
            let analyzed = self.reorder.pop_front().expect("front was ready");
            self.admit(analyzed, decision, pool, units)?;
        }
        Ok(())
    }

    /// Run the scene-change window over the queue head before popping it.
    fn detect_scene(&mut self) -> (bool, bool) {
        let Some(detector) = self.scene.as_mut() else {
            return (false, false);
        };
        let Some(prev) = self.recent.back() else {
            return (false, false);
        };
        let cur = self.reorder.front().expect("front was ready");
        let next = self.reorder.lookahead(1);
        let decision = detector.evaluate(prev, cur, next);
        (decision.scene_change, decision.flash)
    }

    /// Admit one display-ordered frame into the pending buffer (or, in
    /// manual mode, process it immediately).
    fn admit(
        &mut self,
        analyzed: AnalyzedFrame,
        (scene_change, flash): (bool, bool),
        pool: &mut dyn ReferencePool,
        units: &mut Vec<WorkUnit>,
    ) -> Result<()> {
        self.recent.push_back(analyzed.clone());
        if self.recent.len() > RECENT_WINDOW {
            self.recent.pop_front();
        }

        let mut frame = FrameDescriptor::new(analyzed, self.controls);
        frame.scene_change = scene_change;
        frame.flash = flash;
        frame.frame_type = self.decide_frame_type(&frame);
        if frame.frame_type.is_random_access_point() {
            self.frames_since_rap = 0;
        } else {
            self.frames_since_rap += 1;
        }
        self.total_admitted += 1;

        if self.manual.is_some() {
            return self.process_manual(frame, pool, units);
        }

        let is_rap = frame.frame_type.is_random_access_point();
        self.pending.push(frame);
        // A random-access point closes the pending buffer; otherwise it
        // fills to the hierarchy cap.
        if is_rap || self.pending.len() >= 1usize << self.config.hierarchical_depth {
            self.process_pending(pool, units)?;
        }
        Ok(())
    }

    fn decide_frame_type(&mut self, frame: &FrameDescriptor) -> FrameType {
        let rap_kind = match self.config.intra_refresh {
            IntraRefreshType::Closed => FrameType::Key,
            IntraRefreshType::Open => FrameType::Intra,
        };
        if frame.poc() == 0 {
            return FrameType::Key;
        }
        if self.force_key {
            self.force_key = false;
            return FrameType::Key;
        }
        match self.config.intra_period {
            Some(0) => return rap_kind,
            Some(n) if self.frames_since_rap + 1 >= n as u64 => return rap_kind,
            _ => {}
        }
        if frame.scene_change {
            return rap_kind;
        }
        FrameType::Inter
    }

    /// Partition the pending buffer and process each mini-GOP in order.
    fn process_pending(
        &mut self,
        pool: &mut dyn ReferencePool,
        units: &mut Vec<WorkUnit>,
    ) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let frames = std::mem::take(&mut self.pending);
        let gops = partition_mini_gops(&frames, self.config.hierarchical_depth);
        debug_assert_eq!(gops.iter().map(|g| g.len).sum::<usize>(), frames.len());

        let mut frames = frames.into_iter();
        for gop in gops {
            let group: Vec<FrameDescriptor> = frames.by_ref().take(gop.len).collect();
            self.process_mini_gop(gop, group, pool, units)?;
        }
        Ok(())
    }

    /// Process one mini-GOP: boundary corrections, then every frame in
    /// decode order through RPS, dependency tracking, filter planning, and
    /// dispatch.
    fn process_mini_gop(
        &mut self,
        gop: MiniGop,
        group: Vec<FrameDescriptor>,
        pool: &mut dyn ReferencePool,
        units: &mut Vec<WorkUnit>,
    ) -> Result<()> {
        let first_poc = group[0].poc();
        let (period, decode_order, future_deps0, future_deps1) = {
            let template = self.templates.get(gop.depth);
            (
                template.period,
                template.decode_order.clone(),
                template.future_base_deps0.clone(),
                template.future_base_deps1.clone(),
            )
        };

        // Hierarchy switch: rewrite the boundary slot's anticipated
        // dependents and drop what the new group makes unreachable.
        if let (Some(prev_depth), Some(boundary_poc)) = (self.last_gop_depth, self.last_base_poc)
        {
            if prev_depth != gop.depth {
                self.refs
                    .correct_boundary(boundary_poc, &future_deps0, &future_deps1);
                self.refs.prune_unreachable(first_poc, boundary_poc);
            }
        }

        let mut slots: Vec<Option<FrameDescriptor>> = group.into_iter().map(Some).collect();
        for p in decode_order {
            let mut frame = slots[(p - 1) as usize]
                .take()
                .ok_or(FramePlanError::CorruptFrame {
                    poc: first_poc,
                    kind: CorruptKind::GopIndex,
                })?;
            let plan = self
                .templates
                .get(gop.depth)
                .plan(p)
                .ok_or(FramePlanError::corrupt(frame.poc(), CorruptKind::GopIndex))?
                .clone();

            frame.temporal_layer = plan.temporal_layer;
            frame.hierarchical_depth = gop.depth;
            frame.gop_position = p;
            frame.decode_order = self.decode_counter;
            self.decode_counter += 1;
            frame.is_reference =
                plan.is_reference || frame.frame_type.is_random_access_point();
            frame.controls = self.controls.for_layer(plan.temporal_layer);

            if frame.frame_type.is_key() {
                // Closed GOP: all prior reference state dies here.
                let leftover = self.refs.drain();
                if !leftover.is_empty() {
                    debug!(?leftover, "key frame dropped outstanding references");
                }
            }

            self.rps.assign(&mut frame, &plan)?;
            self.prune_unanticipated(&mut frame)?;
            self.rps.update_show(&mut frame, self.config.prediction);

            if frame.is_reference {
                if p == period {
                    // Base frames also anticipate dependents from the
                    // following mini-GOP generations.
                    let mut deps0 = plan.dep_list0.clone();
                    deps0.extend_from_slice(&future_deps0);
                    let mut deps1 = plan.dep_list1.clone();
                    deps1.extend_from_slice(&future_deps1);
                    self.refs.admit(frame.poc(), &deps0, &deps1)?;
                } else {
                    self.refs.admit(frame.poc(), &plan.dep_list0, &plan.dep_list1)?;
                }
            }

            let held: Vec<u64> = frame.rps.refs().map(|r| r.poc).collect();
            for target in held {
                self.refs.consume(target, frame.poc())?;
            }
            if frame.show_frame {
                self.refs.mark_displayed(frame.poc());
            }
            let shown: Vec<u64> = frame.rps.show_existing.iter().map(|s| s.poc).collect();
            for poc in shown {
                self.refs.mark_displayed(poc);
            }
            // This POC is spent; release any reservation it never consumed
            // (capped reference lists, intra frames referencing nothing).
            let released = self.refs.absolve(frame.poc());
            if released > 0 {
                debug!(poc = frame.poc(), released, "released unconsumed reservations");
            }

            self.plan_filter(&mut frame, &slots);
            self.dispatch(frame, pool, units);
        }

        self.last_gop_depth = Some(gop.depth);
        self.last_base_poc = Some(first_poc + period as u64 - 1);
        Ok(())
    }

    /// Drop resolved references the dependency tracker does not anticipate,
    /// keeping the two decrement sources in agreement. Backward references
    /// carry no forward count and always survive.
    fn prune_unanticipated(&self, frame: &mut FrameDescriptor) -> Result<()> {
        let poc = frame.poc();
        let refs = &self.refs;
        let keep = |r: &crate::rps::ResolvedRef| {
            let delta = poc as i64 - r.poc as i64;
            delta <= 0 || refs.knows_dependent(r.poc, delta)
        };
        frame.rps.list0.retain(keep);
        frame.rps.list1.retain(keep);
        if frame.rps.list0.is_empty() && !frame.frame_type.is_intra() {
            return Err(FramePlanError::corrupt(poc, CorruptKind::UnresolvedReference));
        }
        Ok(())
    }

    /// Plan the temporal-filter window for eligible frames: key frames and
    /// base-layer anchors.
    fn plan_filter(&mut self, frame: &mut FrameDescriptor, gop_slots: &[Option<FrameDescriptor>]) {
        if !self.config.temporal_filter || !frame.controls.enable_temporal_filter {
            return;
        }
        let is_rap = frame.frame_type.is_random_access_point();
        if !is_rap && frame.temporal_layer != 0 {
            return;
        }

        let center_poc = frame.poc();
        // Future neighbours: undecided frames of this group, then the
        // pending buffer, then the reorder queue.
        let mut future: Vec<&AnalyzedFrame> = Vec::new();
        for d in 1..=MAX_FILTER_REACH {
            let poc = center_poc + d;
            let from_gop = gop_slots
                .iter()
                .flatten()
                .find(|f| f.poc() == poc)
                .map(|f| &f.analyzed);
            let found = from_gop
                .or_else(|| self.pending.iter().find(|f| f.poc() == poc).map(|f| &f.analyzed))
                .or_else(|| {
                    poc.checked_sub(self.reorder.head_poc())
                        .and_then(|k| self.reorder.lookahead(k))
                });
            match found {
                Some(f) => future.push(f),
                None => break,
            }
        }

        let window = if is_rap {
            // Delayed-intra and key frames filter forward only.
            self.tf.plan_forward_only(&frame.analyzed, &future)
        } else {
            let mut past: Vec<&AnalyzedFrame> = Vec::new();
            for d in 1..=MAX_FILTER_REACH {
                let Some(poc) = center_poc.checked_sub(d) else {
                    break;
                };
                match self.recent.iter().find(|f| f.poc == poc) {
                    Some(f) => past.push(f),
                    None => break,
                }
            }
            self.tf.plan(&frame.analyzed, &past, &future)
        };
        if window != (0, 0) {
            frame.filter_window = Some(window);
        }
    }

    /// Manual prediction mode: the explicit DPB replaces partitioning and
    /// the RPS generator; every admitted frame dispatches immediately.
    fn process_manual(
        &mut self,
        mut frame: FrameDescriptor,
        pool: &mut dyn ReferencePool,
        units: &mut Vec<WorkUnit>,
    ) -> Result<()> {
        frame.decode_order = self.decode_counter;
        self.decode_counter += 1;
        frame.hierarchical_depth = 0;
        frame.gop_position = 1;
        let dpb = self.manual.as_mut().expect("manual mode checked");
        dpb.process(&mut frame)?;
        self.plan_filter(&mut frame, &[]);
        self.dispatch(frame, pool, units);
        Ok(())
    }

    fn dispatch(
        &mut self,
        frame: FrameDescriptor,
        pool: &mut dyn ReferencePool,
        units: &mut Vec<WorkUnit>,
    ) {
        let emitted = self.dispatcher.dispatch(frame, pool);
        // An overlay follower occupies its own decode slot.
        if emitted
            .iter()
            .any(|u| u.frame.frame_type == FrameType::Overlay)
        {
            self.decode_counter += 1;
        }
        units.extend(emitted);
    }

    /// Read-only view of the configuration.
    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// Frames admitted from the reorder queue so far.
    pub fn total_admitted(&self) -> u64 {
        self.total_admitted
    }

    /// Live entries in the reference ring (diagnostics).
    pub fn live_references(&self) -> usize {
        self.refs.live_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PredictionStructure;
    use crate::dispatch::{CountingPool, TaskKind};
    use crate::frame::RegionStats;

    fn analyzed(poc: u64) -> AnalyzedFrame {
        AnalyzedFrame {
            frame_id: poc,
            poc,
            regions: vec![RegionStats::default(); 16],
            variance: 1.0,
            mean_luma: 64.0,
        }
    }

    fn quiet_config(depth: u8) -> SequenceConfig {
        SequenceConfig::new(640, 360)
            .with_hierarchical_depth(depth)
            .with_scene_detection(false)
            .with_temporal_filter(false)
            .with_intra_period(None)
    }

    /// Feed `count` frames in display order and flush, returning every
    /// decided frame in decode order.
    fn run_stream(config: SequenceConfig, count: u64) -> Vec<Arc<FrameDescriptor>> {
        let mut ctx = DecisionContext::new(config).unwrap();
        let mut pool = CountingPool::new();
        let mut units = Vec::new();
        for poc in 0..count {
            units.extend(ctx.on_frame(analyzed(poc), &mut pool).unwrap());
        }
        units.extend(ctx.flush(&mut pool).unwrap());

        let mut frames: Vec<Arc<FrameDescriptor>> = Vec::new();
        for unit in units {
            if unit.task == TaskKind::MotionEstimation
                && !frames.iter().any(|f| Arc::ptr_eq(f, &unit.frame))
            {
                frames.push(unit.frame);
            }
        }
        frames
    }

    #[test]
    fn test_eight_frame_gop_scenario() {
        // Key frame plus eight inter frames at depth 3: one mini-GOP of
        // length eight.
        let frames = run_stream(quiet_config(3), 9);
        assert_eq!(frames.len(), 9);

        let gop_frames: Vec<&Arc<FrameDescriptor>> =
            frames.iter().filter(|f| f.poc() > 0).collect();
        assert_eq!(gop_frames.len(), 8);
        for f in &gop_frames {
            assert_eq!(f.hierarchical_depth, 3);
        }

        // The temporal-layer-0 frame refreshes the oldest base slot (the
        // key took slot 0, so the base rotation hands out slot 1).
        let base = gop_frames.iter().find(|f| f.temporal_layer == 0).unwrap();
        assert_eq!(base.poc(), 8);
        assert_eq!(base.rps.refresh_mask, 1 << 1);

        // The last decoded frame shows immediately.
        let last = frames.iter().max_by_key(|f| f.decode_order).unwrap();
        assert!(last.show_frame);
    }

    #[test]
    fn test_single_frame_flush_uses_fallback_depth() {
        // Key plus one trailing frame: the one-frame pending buffer at EOS
        // becomes a single mini-GOP at the minimum fallback depth.
        let frames = run_stream(quiet_config(4), 2);
        let tail = frames.iter().find(|f| f.poc() == 1).unwrap();
        assert_eq!(tail.hierarchical_depth, 0);
        assert_eq!(tail.gop_position, 1);
        assert!(tail.show_frame);
    }

    #[test]
    fn test_intra_period_zero_collapses_gops() {
        let config = quiet_config(3).with_intra_period(Some(0));
        let frames = run_stream(config, 6);
        assert_eq!(frames.len(), 6);
        for f in &frames {
            assert!(f.frame_type.is_random_access_point());
            assert_eq!(f.hierarchical_depth, 0);
            assert!(f.show_frame);
        }
    }

    #[test]
    fn test_display_order_reconstructed_from_arrivals() {
        let mut ctx = DecisionContext::new(quiet_config(2)).unwrap();
        let mut pool = CountingPool::new();
        let mut units = Vec::new();
        // Arrival order scrambled; decisions must still be display-ordered.
        for poc in [2u64, 0, 1, 4, 3] {
            units.extend(ctx.on_frame(analyzed(poc), &mut pool).unwrap());
        }
        units.extend(ctx.flush(&mut pool).unwrap());
        let mut pocs: Vec<u64> = units
            .iter()
            .filter(|u| u.task == TaskKind::MotionEstimation)
            .map(|u| u.frame.poc())
            .collect();
        pocs.dedup();
        // Key first, then the depth-2 group in its decode order.
        assert_eq!(pocs[0], 0);
        assert_eq!(pocs.len(), 5);
    }

    #[test]
    fn test_all_references_point_backward_in_decode_order() {
        let frames = run_stream(quiet_config(3), 25);
        let mut seen: Vec<u64> = Vec::new();
        for f in &frames {
            for r in f.rps.refs() {
                assert!(seen.contains(&r.poc), "poc {} -> undecoded {}", f.poc(), r.poc);
            }
            seen.push(f.poc());
        }
    }

    #[test]
    fn test_hierarchy_switch_stream_stays_consistent() {
        // 13 inter frames after the key: 8 + 4 + 1 forces two hierarchy
        // switches. Any dependency mismatch would poison the stream.
        let frames = run_stream(quiet_config(3), 14);
        assert_eq!(frames.len(), 14);
        let depths: Vec<u8> = {
            let mut v: Vec<(u64, u8)> =
                frames.iter().map(|f| (f.poc(), f.hierarchical_depth)).collect();
            v.sort_unstable();
            v.into_iter().map(|(_, d)| d).collect()
        };
        assert_eq!(depths[0], 0); // key
        assert!(depths[1..9].iter().all(|&d| d == 3));
        assert!(depths[9..13].iter().all(|&d| d == 2));
        assert_eq!(depths[13], 0);
    }

    #[test]
    fn test_reference_ring_drains_over_long_stream() {
        let config = quiet_config(3);
        let mut ctx = DecisionContext::new(config).unwrap();
        let mut pool = CountingPool::new();
        for poc in 0..64u64 {
            ctx.on_frame(analyzed(poc), &mut pool).unwrap();
        }
        // Multi-generation anticipation drains as later groups consume it;
        // the ring must stay bounded well under its capacity.
        assert!(ctx.live_references() <= 8, "ring at {}", ctx.live_references());
        ctx.flush(&mut pool).unwrap();
        assert_eq!(ctx.live_references(), 0);
    }

    #[test]
    fn test_low_delay_shows_every_frame() {
        let config = quiet_config(2).with_prediction(PredictionStructure::LowDelayP);
        let frames = run_stream(config, 9);
        for f in &frames {
            assert!(f.show_frame);
            assert!(f.rps.show_existing.is_empty());
            for r in f.rps.refs() {
                assert!(r.poc < f.poc());
            }
        }
    }

    #[test]
    fn test_forced_key_frame() {
        let mut ctx = DecisionContext::new(quiet_config(2)).unwrap();
        let mut pool = CountingPool::new();
        let mut units = Vec::new();
        for poc in 0..3u64 {
            units.extend(ctx.on_frame(analyzed(poc), &mut pool).unwrap());
        }
        ctx.request_key_frame();
        for poc in 3..6u64 {
            units.extend(ctx.on_frame(analyzed(poc), &mut pool).unwrap());
        }
        units.extend(ctx.flush(&mut pool).unwrap());
        let forced = units
            .iter()
            .find(|u| u.frame.poc() == 3)
            .expect("frame 3 decided");
        assert!(forced.frame.frame_type.is_key());
    }

    #[test]
    fn test_first_pass_units_emitted_for_lookahead() {
        let config = quiet_config(2).with_lookahead_first_pass(true);
        let mut ctx = DecisionContext::new(config).unwrap();
        let mut pool = CountingPool::new();
        let units = ctx.on_frame(analyzed(0), &mut pool).unwrap();
        assert!(units.iter().any(|u| u.task == TaskKind::FirstPassMe));
    }

    #[test]
    fn test_manual_mode_dispatches_immediately() {
        use crate::config::{ManualPrediction, ManualRefEntry};
        let manual = ManualPrediction {
            period: vec![ManualRefEntry {
                temporal_layer: 0,
                list0_offsets: vec![-1],
                list1_offsets: vec![],
                is_reference: true,
            }],
        };
        let config = quiet_config(3).with_manual_prediction(manual);
        let mut ctx = DecisionContext::new(config).unwrap();
        let mut pool = CountingPool::new();
        for poc in 0..4u64 {
            let units = ctx.on_frame(analyzed(poc), &mut pool).unwrap();
            // No pending-buffer latency in manual mode.
            assert!(units.iter().any(|u| u.frame.poc() == poc));
        }
    }

    #[test]
    fn test_poisoned_context_stays_dead() {
        use crate::config::{ManualPrediction, ManualRefEntry};
        // A manual structure whose offset can never resolve corrupts the
        // second frame.
        let manual = ManualPrediction {
            period: vec![ManualRefEntry {
                temporal_layer: 0,
                list0_offsets: vec![-7],
                list1_offsets: vec![],
                is_reference: true,
            }],
        };
        let config = quiet_config(3).with_manual_prediction(manual);
        let mut ctx = DecisionContext::new(config).unwrap();
        let mut pool = CountingPool::new();
        ctx.on_frame(analyzed(0), &mut pool).unwrap();
        assert!(ctx.on_frame(analyzed(1), &mut pool).is_err());
        // The stream is latched dead.
        assert!(ctx.on_frame(analyzed(2), &mut pool).is_err());
    }

    #[test]
    fn test_scene_cut_opens_random_access_point() {
        let config = SequenceConfig::new(640, 360)
            .with_hierarchical_depth(3)
            .with_temporal_filter(false)
            .with_intra_period(None);
        let mut ctx = DecisionContext::new(config).unwrap();
        let mut pool = CountingPool::new();
        let mut units = Vec::new();

        // Static content, then an abrupt histogram jump at POC 4.
        for poc in 0..8u64 {
            let mut frame = analyzed(poc);
            let bin = if poc >= 4 { 50 } else { 10 };
            for r in &mut frame.regions {
                r.luma = [0; crate::frame::HIST_BINS];
                r.luma[bin] = 14_400;
                r.mean_luma = bin as f64;
            }
            units.extend(ctx.on_frame(frame, &mut pool).unwrap());
        }
        units.extend(ctx.flush(&mut pool).unwrap());

        let cut = units
            .iter()
            .find(|u| u.frame.poc() == 4)
            .expect("frame 4 decided");
        assert!(cut.frame.scene_change);
        assert!(cut.frame.frame_type.is_random_access_point());
    }
}
