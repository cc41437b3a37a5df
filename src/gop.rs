//! GOP templates: per-depth reference topology tables.
//!
//! A mini-GOP of hierarchical depth `d` spans `2^d` frames in display order.
//! Positions are 1-based offsets from the frame that precedes the mini-GOP
//! (its "opener": the previous mini-GOP's base-layer frame, or a
//! random-access point). Each depth has one template giving, per position:
//! the temporal layer, the decode order, the relative POC offset for each of
//! the seven reference roles, and the dependent lists used by the reference
//! dependency tracker.
//!
//! Templates are plain data built once per sequence; a single resolver in
//! the RPS generator consumes them for every depth. There is no per-depth
//! special casing here beyond the dyadic arithmetic that generates the
//! tables.

use crate::config::{PredictionStructure, MAX_HIERARCHICAL_DEPTH};
use crate::rps::RefRole;

/// How many past anchors the reference ladder reaches back.
pub const PAST_LADDER_LEN: usize = 4;

/// How many future mini-GOP generations a base frame anticipates
/// dependents from. The base slot rings keep a base resolvable for two
/// generations before it is overwritten, so anticipating further would
/// leave counts that can never drain.
pub const DEP_GENERATIONS: u32 = 2;

/// One position of a GOP template.
#[derive(Debug, Clone)]
pub struct PositionPlan {
    /// 1-based display position within the mini-GOP.
    pub position: u32,
    /// Temporal layer (0 = base).
    pub temporal_layer: u8,
    /// Index of this position in the mini-GOP's decode order.
    pub decode_index: u32,
    /// Whether later frames reference this position.
    pub is_reference: bool,
    /// Relative POC offset per reference role (display-order delta).
    pub ref_offsets: [Option<i64>; RefRole::COUNT],
    /// Deltas of frames referencing this position through list 0.
    pub dep_list0: Vec<i64>,
    /// Deltas of frames referencing this position through list 1.
    pub dep_list1: Vec<i64>,
}

impl PositionPlan {
    /// Iterate the assigned roles with their offsets.
    pub fn roles(&self) -> impl Iterator<Item = (RefRole, i64)> + '_ {
        RefRole::ALL
            .iter()
            .filter_map(|&role| self.ref_offsets[role.index()].map(|off| (role, off)))
    }
}

/// Reference topology table for one hierarchical depth.
#[derive(Debug, Clone)]
pub struct GopTemplate {
    /// Hierarchical depth (mini-GOP holds `2^depth` frames).
    pub depth: u8,
    /// Frames per mini-GOP.
    pub period: u32,
    /// Per-position plans, indexed by `position - 1`.
    positions: Vec<PositionPlan>,
    /// Display positions in decode order.
    pub decode_order: Vec<u32>,
    /// List-0 dependent deltas a base-layer frame anticipates from the
    /// following mini-GOPs (assuming they share this depth).
    pub future_base_deps0: Vec<i64>,
    /// Same, for list 1.
    pub future_base_deps1: Vec<i64>,
}

/// Temporal layer of a display position within a mini-GOP.
fn temporal_layer(depth: u8, position: u32) -> u8 {
    let period = 1u32 << depth;
    if position == period {
        0
    } else {
        depth - position.trailing_zeros() as u8
    }
}

/// Recursive dyadic decode order: anchor of the interval first, then the
/// two halves, left before right.
fn fill_decode_order(lo: u32, hi: u32, out: &mut Vec<u32>) {
    if hi - lo <= 1 {
        return;
    }
    let mid = (lo + hi) / 2;
    out.push(mid);
    fill_decode_order(lo, mid, out);
    fill_decode_order(mid, hi, out);
}

/// The past-anchor ladder for a position: offsets of the nearest distinct
/// past anchors, nearest first, padded with bases of earlier mini-GOPs.
fn past_ladder(position: u32, period: u32) -> Vec<i64> {
    let step = 1i64 << position.trailing_zeros();
    let p = position as i64;
    let mut ladder = vec![-step];
    if p != step {
        // The mini-GOP opener, unless the nearest anchor already is it.
        ladder.push(-p);
    }
    let mut generation = 1i64;
    while ladder.len() < PAST_LADDER_LEN {
        ladder.push(-(p + generation * period as i64));
        generation += 1;
    }
    ladder
}

/// The future-anchor climb for a position: each hop lands on the anchor
/// that owns the current interval, ending at the mini-GOP base.
fn future_climb(position: u32, period: u32) -> Vec<i64> {
    let mut offsets = Vec::new();
    let mut q = position;
    while q < period {
        q += 1 << q.trailing_zeros();
        offsets.push(q as i64 - position as i64);
    }
    offsets
}

/// Assign the three future roles from the climb: nearest first, but the
/// farthest hop (the mini-GOP base) always lands on ALTREF.
fn assign_future_roles(offsets: &mut [Option<i64>; RefRole::COUNT], climb: &[i64]) {
    match climb.len() {
        0 => {}
        1 => offsets[RefRole::Bwdref.index()] = Some(climb[0]),
        2 => {
            offsets[RefRole::Bwdref.index()] = Some(climb[0]);
            offsets[RefRole::Altref.index()] = Some(climb[1]);
        }
        n => {
            offsets[RefRole::Bwdref.index()] = Some(climb[0]);
            offsets[RefRole::Altref2.index()] = Some(climb[1]);
            offsets[RefRole::Altref.index()] = Some(climb[n - 1]);
        }
    }
}

impl GopTemplate {
    /// Build the template for one depth and prediction structure.
    pub fn build(depth: u8, prediction: PredictionStructure) -> Self {
        assert!(depth <= MAX_HIERARCHICAL_DEPTH);
        let period = 1u32 << depth;

        let mut decode_order = vec![period];
        fill_decode_order(0, period, &mut decode_order);
        debug_assert_eq!(decode_order.len(), period as usize);

        let mut positions: Vec<PositionPlan> = (1..=period)
            .map(|p| {
                let mut ref_offsets = [None; RefRole::COUNT];
                let past = if prediction.uses_forward_refs() {
                    past_ladder(p, period)
                } else {
                    low_delay_ladder(p, period)
                };
                for (i, role) in [
                    RefRole::Last,
                    RefRole::Last2,
                    RefRole::Last3,
                    RefRole::Golden,
                ]
                .iter()
                .enumerate()
                {
                    if let Some(&off) = past.get(i) {
                        ref_offsets[role.index()] = Some(off);
                    }
                }
                if prediction.uses_forward_refs() {
                    let climb = future_climb(p, period);
                    assign_future_roles(&mut ref_offsets, &climb);
                }

                // Each role must map to a distinct offset; a duplicate would
                // double-count in the dependent inversion below.
                let mut seen = Vec::new();
                for slot in ref_offsets.iter_mut() {
                    if let Some(off) = *slot {
                        if seen.contains(&off) {
                            *slot = None;
                        } else {
                            seen.push(off);
                        }
                    }
                }

                PositionPlan {
                    position: p,
                    temporal_layer: temporal_layer(depth, p),
                    decode_index: 0,
                    is_reference: false,
                    ref_offsets,
                    dep_list0: Vec::new(),
                    dep_list1: Vec::new(),
                }
            })
            .collect();

        for (idx, &p) in decode_order.iter().enumerate() {
            positions[(p - 1) as usize].decode_index = idx as u32;
        }

        // Invert the reference map into per-position dependent lists.
        // Targets at or below position 0 land on bases of earlier
        // mini-GOPs; by symmetry those are the dependents a base frame
        // anticipates from the mini-GOPs after it.
        let mut future_base_deps0 = Vec::new();
        let mut future_base_deps1 = Vec::new();
        let mut internal: Vec<(usize, usize, i64)> = Vec::new();
        for plan in &positions {
            for (role, off) in plan.roles() {
                let target = plan.position as i64 + off;
                let delta = -off;
                if target >= 1 && target <= period as i64 {
                    internal.push((target as usize - 1, role.list(), delta));
                } else {
                    let behind = -target;
                    if behind >= 0
                        && behind % period as i64 == 0
                        && (behind / period as i64) < DEP_GENERATIONS as i64
                    {
                        let anticipated = plan.position as i64 + behind;
                        if role.list() == 0 {
                            future_base_deps0.push(anticipated);
                        } else {
                            future_base_deps1.push(anticipated);
                        }
                    }
                }
            }
        }
        for (idx, list, delta) in internal {
            if list == 0 {
                positions[idx].dep_list0.push(delta);
            } else {
                positions[idx].dep_list1.push(delta);
            }
        }
        future_base_deps0.sort_unstable();
        future_base_deps1.sort_unstable();

        for plan in &mut positions {
            plan.dep_list0.sort_unstable();
            plan.dep_list1.sort_unstable();
            let is_base = plan.position == period;
            plan.is_reference =
                is_base || !plan.dep_list0.is_empty() || !plan.dep_list1.is_empty();
        }

        Self {
            depth,
            period,
            positions,
            decode_order,
            future_base_deps0,
            future_base_deps1,
        }
    }

    /// Plan for a 1-based display position. `None` if out of range.
    pub fn plan(&self, position: u32) -> Option<&PositionPlan> {
        if position >= 1 && position <= self.period {
            self.positions.get((position - 1) as usize)
        } else {
            None
        }
    }

    /// Number of temporal layers in this template.
    pub fn layer_count(&self) -> u8 {
        self.depth + 1
    }
}

/// Past offsets for low-delay structures: the three previous frames plus
/// the mini-GOP opener as the long-range anchor. When the opener is closer
/// than three frames the anchor falls back one period to stay distinct.
fn low_delay_ladder(position: u32, period: u32) -> Vec<i64> {
    let p = position as i64;
    let golden = if p > 3 { -p } else { -(p + period as i64) };
    vec![-1, -2, -3, golden]
}

/// The per-sequence set of templates, one per depth.
#[derive(Debug, Clone)]
pub struct GopTemplateSet {
    templates: Vec<GopTemplate>,
}

impl GopTemplateSet {
    /// Build all templates up to the configured depth cap.
    pub fn build(max_depth: u8, prediction: PredictionStructure) -> Self {
        let templates = (0..=max_depth)
            .map(|d| GopTemplate::build(d, prediction))
            .collect();
        Self { templates }
    }

    /// Template for a depth. Panics if beyond the built cap.
    pub fn get(&self, depth: u8) -> &GopTemplate {
        &self.templates[depth as usize]
    }

    /// Largest depth available.
    pub fn max_depth(&self) -> u8 {
        (self.templates.len() - 1) as u8
    }
}
