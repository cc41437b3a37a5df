//! Manual prediction: explicit DPB emulation.
//!
//! When the user supplies a manual prediction structure, the template-driven
//! RPS generator is bypassed. Each frame's references are resolved by
//! matching the requested POC offsets against an explicit DPB array whose
//! slots carry their own dependency counts. A slot is recycled only once its
//! count reaches zero *and* the frame in it has been displayed.
//!
//! The emulator is order-agnostic: it processes frames in whatever order the
//! caller feeds them (decode order for pyramids, display order for low-delay
//! structures) and flushes displayable slots forward via show-existing
//! signaling.

use tracing::debug;

use crate::config::{ManualPrediction, ManualRefEntry, DPB_SLOT_COUNT};
use crate::error::{CorruptKind, FramePlanError, Result};
use crate::frame::FrameDescriptor;
use crate::rps::{RefRole, ResolvedRef, RpsNode, ShowExisting};

/// One slot of the emulated DPB.
#[derive(Debug, Clone)]
struct ManualSlot {
    poc: u64,
    temporal_layer: u8,
    dep_count: u32,
    displayed: bool,
}

/// Explicit DPB emulator for manual prediction structures.
#[derive(Debug)]
pub struct ManualDpb {
    slots: [Option<ManualSlot>; DPB_SLOT_COUNT],
    period: Vec<ManualRefEntry>,
    /// Per-position dependency count a stored frame starts with, derived
    /// once from the period's own reference requests.
    initial_deps: Vec<u32>,
    frame_index: u64,
    next_display_poc: u64,
}

impl ManualDpb {
    /// Build the emulator from a validated manual prediction structure.
    pub fn new(manual: &ManualPrediction) -> Self {
        let period_len = manual.period.len();
        let mut initial_deps = vec![0u32; period_len];
        for (j, entry) in manual.period.iter().enumerate() {
            for &off in entry.list0_offsets.iter().chain(entry.list1_offsets.iter()) {
                let target = (j as i64 + off).rem_euclid(period_len as i64) as usize;
                initial_deps[target] += 1;
            }
        }
        Self {
            slots: std::array::from_fn(|_| None),
            period: manual.period.clone(),
            initial_deps,
            frame_index: 0,
            next_display_poc: 0,
        }
    }

    /// The period entry the next processed frame will use.
    pub fn current_entry(&self) -> &ManualRefEntry {
        &self.period[(self.frame_index % self.period.len() as u64) as usize]
    }

    fn find_slot(&self, poc: u64) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.poc == poc))
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }

    /// Release every slot that is fully dereferenced and already displayed.
    fn recycle(&mut self) {
        for slot in self.slots.iter_mut() {
            if slot
                .as_ref()
                .is_some_and(|s| s.dep_count == 0 && s.displayed)
            {
                *slot = None;
            }
        }
    }

    fn resolve_list(
        &mut self,
        frame_poc: u64,
        frame_layer: u8,
        offsets: &[i64],
        roles: &[RefRole],
        out: &mut Vec<ResolvedRef>,
    ) -> Result<()> {
        for (i, &off) in offsets.iter().enumerate() {
            let target = frame_poc as i64 + off;
            let idx = if target >= 0 {
                self.find_slot(target as u64)
            } else {
                None
            };
            let Some(idx) = idx else {
                return Err(FramePlanError::corrupt(
                    frame_poc,
                    CorruptKind::UnresolvedReference,
                ));
            };
            let slot = self.slots[idx].as_mut().expect("slot checked above");
            if slot.temporal_layer > frame_layer {
                return Err(FramePlanError::corrupt(
                    frame_poc,
                    CorruptKind::TemporalLayerOrder,
                ));
            }
            if slot.dep_count == 0 {
                return Err(FramePlanError::corrupt(
                    frame_poc,
                    CorruptKind::DependencyUnderflow,
                ));
            }
            slot.dep_count -= 1;
            let role = roles[i.min(roles.len() - 1)];
            out.push(ResolvedRef {
                role,
                slot: idx as u8,
                poc: slot.poc,
            });
        }
        Ok(())
    }

    /// Process one frame against the emulated DPB.
    ///
    /// Resolves both lists, recycles fully released slots, stores the frame
    /// (or marks no-refresh for an immediately shown non-reference frame),
    /// then flushes displayable slots forward.
    ///
    /// Intra frames sit outside the periodic structure: they consume no
    /// period position, and a key frame restarts the period (and clears the
    /// emulated DPB) the same way it resets the generator's slot rings.
    pub fn process(&mut self, frame: &mut FrameDescriptor) -> Result<()> {
        let poc = frame.poc();
        let intra = frame.frame_type.is_intra();
        if frame.frame_type.is_key() {
            self.slots = std::array::from_fn(|_| None);
            self.frame_index = 0;
        }
        let position = (self.frame_index % self.period.len() as u64) as usize;
        let entry = if intra {
            // Stands in for the period's opening position.
            ManualRefEntry {
                temporal_layer: 0,
                list0_offsets: Vec::new(),
                list1_offsets: Vec::new(),
                is_reference: true,
            }
        } else {
            self.period[position].clone()
        };
        frame.temporal_layer = entry.temporal_layer;
        frame.is_reference = entry.is_reference;

        let mut node = RpsNode::default();
        if !intra {
            self.resolve_list(
                poc,
                entry.temporal_layer,
                &entry.list0_offsets,
                &[RefRole::Last, RefRole::Last2, RefRole::Last3, RefRole::Golden],
                &mut node.list0,
            )?;
            self.resolve_list(
                poc,
                entry.temporal_layer,
                &entry.list1_offsets,
                &[RefRole::Bwdref, RefRole::Altref2, RefRole::Altref],
                &mut node.list1,
            )?;
        }

        self.recycle();

        let shows_now = poc == self.next_display_poc;
        if entry.is_reference || intra {
            let Some(idx) = self.free_slot() else {
                return Err(FramePlanError::corrupt(poc, CorruptKind::DpbFull));
            };
            // An intra frame inherits the dependency budget of the position
            // it opens.
            let dep_position = if intra { 0 } else { position };
            self.slots[idx] = Some(ManualSlot {
                poc,
                temporal_layer: entry.temporal_layer,
                dep_count: self.initial_deps[dep_position],
                displayed: false,
            });
            node.refresh_mask = 1 << idx;
        } else if shows_now {
            // Immediately shown non-reference frame: nothing to store.
            node.refresh_mask = 0;
        } else {
            // A hidden frame that nothing may reference can never be
            // displayed later.
            return Err(FramePlanError::corrupt(poc, CorruptKind::GopIndex));
        }

        frame.show_frame = shows_now;
        if shows_now {
            self.next_display_poc += 1;
            if let Some(idx) = self.find_slot(poc) {
                self.slots[idx].as_mut().expect("slot exists").displayed = true;
            }
            // Walk forward, redisplaying any slot whose position arrived.
            loop {
                let Some(idx) = self.find_slot(self.next_display_poc) else {
                    break;
                };
                let slot = self.slots[idx].as_mut().expect("slot exists");
                slot.displayed = true;
                node.show_existing.push(ShowExisting {
                    slot: idx as u8,
                    poc: slot.poc,
                });
                self.next_display_poc += 1;
            }
            self.recycle();
        }

        debug!(
            poc,
            show = frame.show_frame,
            refs = node.ref_count(),
            "manual dpb processed"
        );
        frame.rps = node;
        if !intra {
            self.frame_index += 1;
        }
        Ok(())
    }

    /// Number of occupied slots.
    pub fn occupancy(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{AnalyzedFrame, FrameControls, FrameType};

    fn frame(poc: u64) -> FrameDescriptor {
        let analyzed = AnalyzedFrame {
            frame_id: poc,
            poc,
            regions: Vec::new(),
            variance: 0.0,
            mean_luma: 0.0,
        };
        FrameDescriptor::new(analyzed, FrameControls::for_preset(0))
    }

    fn low_delay_manual() -> ManualPrediction {
        ManualPrediction {
            period: vec![ManualRefEntry {
                temporal_layer: 0,
                list0_offsets: vec![-1],
                list1_offsets: vec![],
                is_reference: true,
            }],
        }
    }

    #[test]
    fn test_low_delay_chain() {
        let mut dpb = ManualDpb::new(&low_delay_manual());

        let mut key = frame(0);
        key.frame_type = FrameType::Key;
        dpb.process(&mut key).unwrap();
        assert!(key.show_frame);
        assert_eq!(key.rps.refresh_mask, 1 << 0);

        for poc in 1..=5u64 {
            let mut f = frame(poc);
            dpb.process(&mut f).unwrap();
            assert!(f.show_frame);
            assert_eq!(f.rps.list0.len(), 1);
            assert_eq!(f.rps.list0[0].poc, poc - 1);
        }
        // Each frame releases its predecessor; at most two slots live.
        assert!(dpb.occupancy() <= 2);
    }

    #[test]
    fn test_unresolvable_offset_is_corrupt() {
        let manual = ManualPrediction {
            period: vec![ManualRefEntry {
                temporal_layer: 0,
                list0_offsets: vec![-4],
                list1_offsets: vec![],
                is_reference: true,
            }],
        };
        let mut dpb = ManualDpb::new(&manual);
        let mut key = frame(0);
        key.frame_type = FrameType::Key;
        dpb.process(&mut key).unwrap();

        let mut f = frame(1);
        let err = dpb.process(&mut f).unwrap_err();
        assert!(matches!(
            err,
            FramePlanError::CorruptFrame {
                kind: CorruptKind::UnresolvedReference,
                ..
            }
        ));
    }

    #[test]
    fn test_temporal_layer_violation() {
        let manual = ManualPrediction {
            period: vec![
                ManualRefEntry {
                    temporal_layer: 1,
                    list0_offsets: vec![],
                    list1_offsets: vec![],
                    is_reference: true,
                },
                ManualRefEntry {
                    temporal_layer: 0,
                    list0_offsets: vec![-1],
                    list1_offsets: vec![],
                    is_reference: true,
                },
            ],
        };
        let mut dpb = ManualDpb::new(&manual);
        let mut first = frame(0);
        dpb.process(&mut first).unwrap();
        assert_eq!(first.temporal_layer, 1);

        // A layer-0 frame referencing the layer-1 frame violates ordering.
        let mut second = frame(1);
        let err = dpb.process(&mut second).unwrap_err();
        assert!(matches!(
            err,
            FramePlanError::CorruptFrame {
                kind: CorruptKind::TemporalLayerOrder,
                ..
            }
        ));
    }

    #[test]
    fn test_pyramid_show_existing_flush() {
        // Two-frame manual pyramid processed in decode order: the anchor
        // at POC+2 first (hidden), then the middle frame, which flushes
        // the anchor via show-existing.
        let manual = ManualPrediction {
            period: vec![
                ManualRefEntry {
                    temporal_layer: 0,
                    list0_offsets: vec![-2],
                    list1_offsets: vec![],
                    is_reference: true,
                },
                ManualRefEntry {
                    temporal_layer: 1,
                    list0_offsets: vec![-1],
                    list1_offsets: vec![1],
                    is_reference: false,
                },
            ],
        };
        let mut dpb = ManualDpb::new(&manual);

        let mut key = frame(0);
        key.frame_type = FrameType::Key;
        dpb.process(&mut key).unwrap();
        assert!(key.show_frame);

        // Anchor for POC 2, decoded ahead of display.
        let mut anchor = frame(2);
        dpb.process(&mut anchor).unwrap();
        assert!(!anchor.show_frame);
        assert_eq!(anchor.rps.list0[0].poc, 0);

        // Middle frame at POC 1: shows, then flushes POC 2.
        let mut mid = frame(1);
        dpb.process(&mut mid).unwrap();
        assert!(mid.show_frame);
        assert_eq!(mid.rps.list1[0].poc, 2);
        assert_eq!(mid.rps.show_existing.len(), 1);
        assert_eq!(mid.rps.show_existing[0].poc, 2);
    }

    #[test]
    fn test_dpb_full_is_corrupt() {
        // Every other display position is skipped, so stored frames are
        // never displayed and never recycled: the DPB must overflow.
        let manual = ManualPrediction {
            period: vec![ManualRefEntry {
                temporal_layer: 0,
                list0_offsets: vec![-2],
                list1_offsets: vec![],
                is_reference: true,
            }],
        };
        let mut dpb = ManualDpb::new(&manual);
        let mut err = None;
        for poc in (0..=2 * DPB_SLOT_COUNT as u64 + 4).step_by(2) {
            let mut f = frame(poc);
            f.frame_type = if poc == 0 {
                FrameType::Key
            } else {
                FrameType::Inter
            };
            if let Err(e) = dpb.process(&mut f) {
                err = Some(e);
                break;
            }
        }
        assert!(matches!(
            err,
            Some(FramePlanError::CorruptFrame {
                kind: CorruptKind::DpbFull,
                ..
            })
        ));
    }
}
