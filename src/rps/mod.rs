//! Reference picture set generation.
//!
//! The RPS generator is a state machine keyed by hierarchical depth and
//! temporal layer. For each frame it resolves the GOP template's relative
//! reference offsets to concrete DPB slots and POCs, prunes roles that
//! cannot be satisfied (collapsing duplicate slots), assigns the refresh
//! mask through per-layer slot rings, and tracks show / show-existing
//! semantics across the deferred display order of random-access pyramids.
//!
//! A user-supplied manual prediction structure bypasses this generator
//! entirely; see the `manual` module.

pub mod manual;
mod ring;

pub use ring::SlotRing;

use tracing::debug;

use crate::config::{PredictionStructure, DPB_SLOT_COUNT, MAX_HIERARCHICAL_DEPTH};
use crate::error::{CorruptKind, FramePlanError, Result};
use crate::frame::FrameDescriptor;
use crate::gop::PositionPlan;

/// The seven canonical reference roles.
///
/// The first four form list 0 (past anchors, nearest first); the last
/// three form list 1 (future anchors, nearest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefRole {
    /// Nearest past anchor.
    Last,
    /// Second past anchor.
    Last2,
    /// Third past anchor.
    Last3,
    /// Farthest past anchor.
    Golden,
    /// Nearest future anchor.
    Bwdref,
    /// Second future anchor.
    Altref2,
    /// Farthest future anchor (the mini-GOP base).
    Altref,
}

impl RefRole {
    /// Number of roles.
    pub const COUNT: usize = 7;

    /// All roles in canonical order.
    pub const ALL: [RefRole; RefRole::COUNT] = [
        RefRole::Last,
        RefRole::Last2,
        RefRole::Last3,
        RefRole::Golden,
        RefRole::Bwdref,
        RefRole::Altref2,
        RefRole::Altref,
    ];

    /// Canonical index of this role.
    pub fn index(self) -> usize {
        match self {
            RefRole::Last => 0,
            RefRole::Last2 => 1,
            RefRole::Last3 => 2,
            RefRole::Golden => 3,
            RefRole::Bwdref => 4,
            RefRole::Altref2 => 5,
            RefRole::Altref => 6,
        }
    }

    /// Which reference list this role belongs to (0 or 1).
    pub fn list(self) -> usize {
        if self.index() < 4 {
            0
        } else {
            1
        }
    }
}

/// When fewer references fit than the template names, roles are kept in
/// this order: the nearest anchor of each kind first.
const ROLE_PRIORITY: [RefRole; RefRole::COUNT] = [
    RefRole::Last,
    RefRole::Bwdref,
    RefRole::Golden,
    RefRole::Altref,
    RefRole::Last2,
    RefRole::Altref2,
    RefRole::Last3,
];

/// One resolved reference of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRef {
    /// The role this reference fills.
    pub role: RefRole,
    /// DPB slot holding the reference.
    pub slot: u8,
    /// POC of the referenced frame.
    pub poc: u64,
}

/// A deferred display event: redisplay an already-decoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowExisting {
    /// DPB slot to redisplay.
    pub slot: u8,
    /// POC of the frame in that slot.
    pub poc: u64,
}

/// The reference picture set assigned to one frame.
#[derive(Debug, Clone, Default)]
pub struct RpsNode {
    /// List-0 references (past anchors).
    pub list0: Vec<ResolvedRef>,
    /// List-1 references (future anchors).
    pub list1: Vec<ResolvedRef>,
    /// Bitmask over DPB slots this frame overwrites once encoded.
    pub refresh_mask: u8,
    /// Display events to signal after this frame's data.
    pub show_existing: Vec<ShowExisting>,
}

impl RpsNode {
    /// Iterate both lists.
    pub fn refs(&self) -> impl Iterator<Item = &ResolvedRef> {
        self.list0.iter().chain(self.list1.iter())
    }

    /// Total resolved references.
    pub fn ref_count(&self) -> usize {
        self.list0.len() + self.list1.len()
    }
}

/// Template-driven RPS generator.
#[derive(Debug)]
pub struct RpsGenerator {
    /// Per-layer slot rings: layer 0 rotates the base slots, each higher
    /// layer owns a single slot.
    rings: Vec<SlotRing>,
    /// POC currently held by each DPB slot.
    slot_poc: [Option<u64>; DPB_SLOT_COUNT],
    /// Temporal layer of the frame held by each slot.
    slot_layer: [u8; DPB_SLOT_COUNT],
    /// Next POC the display order expects.
    next_display_poc: u64,
    /// Encoded-but-hidden frames awaiting their display position.
    hidden: Vec<(u64, u8)>,
}

impl Default for RpsGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RpsGenerator {
    /// Create a generator with the canonical slot layout: three rotating
    /// base slots, one slot per enhancement layer.
    pub fn new() -> Self {
        let mut rings = vec![SlotRing::new(vec![0, 1, 2])];
        for layer in 1..=MAX_HIERARCHICAL_DEPTH {
            rings.push(SlotRing::new(vec![2 + layer]));
        }
        Self {
            rings,
            slot_poc: [None; DPB_SLOT_COUNT],
            slot_layer: [0; DPB_SLOT_COUNT],
            next_display_poc: 0,
            hidden: Vec::new(),
        }
    }

    /// Reset all rings and slots. Invoked for key frames.
    pub fn reset(&mut self) {
        for ring in &mut self.rings {
            ring.reset();
        }
        self.slot_poc = [None; DPB_SLOT_COUNT];
        self.slot_layer = [0; DPB_SLOT_COUNT];
        self.hidden.clear();
    }

    fn find_slot(&self, poc: u64) -> Option<(u8, u64)> {
        self.slot_poc
            .iter()
            .position(|&p| p == Some(poc))
            .map(|i| (i as u8, poc))
    }

    /// Nearest held reference before `poc`, at or below `max_layer`: a
    /// fallback substitute may not climb the pyramid.
    fn nearest_past(&self, poc: u64, max_layer: u8) -> Option<(u8, u64)> {
        self.slot_poc
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| p.map(|p| (i as u8, p)))
            .filter(|&(i, p)| p < poc && self.slot_layer[i as usize] <= max_layer)
            .max_by_key(|&(_, p)| p)
    }

    fn nearest_future(&self, poc: u64, max_layer: u8) -> Option<(u8, u64)> {
        self.slot_poc
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| p.map(|p| (i as u8, p)))
            .filter(|&(i, p)| p > poc && self.slot_layer[i as usize] <= max_layer)
            .min_by_key(|&(_, p)| p)
    }

    /// Resolve the template's roles for one frame and assign its refresh
    /// slot. Must be called in decode order.
    pub fn assign(&mut self, frame: &mut FrameDescriptor, plan: &PositionPlan) -> Result<()> {
        let poc = frame.poc();
        let mut node = RpsNode::default();

        if frame.frame_type.is_key() {
            self.reset();
        }

        if !frame.frame_type.is_intra() {
            let max_refs = frame.controls.max_reference_count as usize;
            let mut used_slots: Vec<u8> = Vec::new();

            for role in ROLE_PRIORITY {
                if node.ref_count() >= max_refs {
                    break;
                }
                let Some(off) = plan.ref_offsets[role.index()] else {
                    continue;
                };
                let target = poc as i64 + off;
                let direct = if target >= 0 {
                    self.find_slot(target as u64)
                } else {
                    None
                };
                // Pruning: an unavailable target collapses onto the nearest
                // held reference on the same side, or drops out entirely.
                let resolved = direct.or_else(|| {
                    if role.list() == 0 {
                        self.nearest_past(poc, frame.temporal_layer)
                    } else {
                        self.nearest_future(poc, frame.temporal_layer)
                    }
                });
                let Some((slot, ref_poc)) = resolved else {
                    continue;
                };
                if used_slots.contains(&slot) {
                    continue;
                }
                used_slots.push(slot);
                let entry = ResolvedRef {
                    role,
                    slot,
                    poc: ref_poc,
                };
                if role.list() == 0 {
                    node.list0.push(entry);
                } else {
                    node.list1.push(entry);
                }
            }

            if node.list0.is_empty() {
                // An inter frame with no decodable past anchor means the
                // stream bookkeeping is broken.
                return Err(FramePlanError::corrupt(poc, CorruptKind::UnresolvedReference));
            }
        }

        if frame.is_reference || frame.frame_type.is_intra() {
            let layer = (frame.temporal_layer as usize).min(self.rings.len() - 1);
            let slot = self.rings[layer].next();
            node.refresh_mask = 1 << slot;
            self.slot_poc[slot as usize] = Some(poc);
            self.slot_layer[slot as usize] = frame.temporal_layer;
        }

        debug!(
            poc,
            layer = frame.temporal_layer,
            refs = node.ref_count(),
            refresh = node.refresh_mask,
            "rps assigned"
        );
        frame.rps = node;
        Ok(())
    }

    /// Decide show / show-existing semantics for a frame, in decode order.
    pub fn update_show(&mut self, frame: &mut FrameDescriptor, prediction: PredictionStructure) {
        if prediction.is_low_delay() {
            // Low delay: decode order is display order.
            frame.show_frame = true;
            self.next_display_poc = frame.poc() + 1;
            return;
        }

        if frame.poc() == self.next_display_poc {
            frame.show_frame = true;
            self.next_display_poc += 1;
            // Flush hidden frames whose display position has arrived.
            loop {
                let Some(idx) = self
                    .hidden
                    .iter()
                    .position(|&(p, _)| p == self.next_display_poc)
                else {
                    break;
                };
                let (p, slot) = self.hidden.remove(idx);
                frame.rps.show_existing.push(ShowExisting { slot, poc: p });
                self.next_display_poc += 1;
            }
        } else {
            frame.show_frame = false;
            let slot = frame.rps.refresh_mask.trailing_zeros() as u8;
            self.hidden.push((frame.poc(), slot));
        }
    }

    /// POC the display order expects next.
    pub fn next_display_poc(&self) -> u64 {
        self.next_display_poc
    }

    /// Number of encoded-but-hidden frames.
    pub fn hidden_count(&self) -> usize {
        self.hidden.len()
    }
}
