//! Frame descriptors and per-frame analysis data.
//!
//! An `AnalyzedFrame` is what the upstream picture-analysis stage hands to
//! the decision core: a frame handle with its POC and per-region histogram
//! statistics. The core wraps it in a `FrameDescriptor`, decides its role in
//! the temporal hierarchy, and hands the descriptor downstream.

use crate::rps::RpsNode;

/// Number of bins in each per-region histogram.
pub const HIST_BINS: usize = 64;

/// Frame type in the encoding plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Key frame: closed random-access point, reference state reset.
    Key,
    /// Intra frame: open-GOP random-access point.
    Intra,
    /// Inter frame (P or B slice depending on the prediction structure).
    Inter,
    /// Overlay companion redisplaying a filtered alt-ref frame.
    Overlay,
}

impl FrameType {
    /// Whether this frame codes only intra blocks.
    pub fn is_intra(&self) -> bool {
        matches!(self, Self::Key | Self::Intra)
    }

    /// Whether this frame is a random-access point.
    pub fn is_random_access_point(&self) -> bool {
        matches!(self, Self::Key | Self::Intra)
    }

    /// Whether this is a key frame (closed GOP).
    pub fn is_key(&self) -> bool {
        matches!(self, Self::Key)
    }
}

/// Per-region histogram statistics for one analyzed frame.
#[derive(Debug, Clone)]
pub struct RegionStats {
    /// Luma histogram.
    pub luma: [u32; HIST_BINS],
    /// Cb histogram.
    pub cb: [u32; HIST_BINS],
    /// Cr histogram.
    pub cr: [u32; HIST_BINS],
    /// Mean luma intensity of the region.
    pub mean_luma: f64,
    /// Luma sample variance of the region.
    pub variance: f64,
}

impl Default for RegionStats {
    fn default() -> Self {
        Self {
            luma: [0; HIST_BINS],
            cb: [0; HIST_BINS],
            cr: [0; HIST_BINS],
            mean_luma: 0.0,
            variance: 0.0,
        }
    }
}

fn histogram_abs_diff(a: &[u32; HIST_BINS], b: &[u32; HIST_BINS]) -> u64 {
    let mut sum = 0u64;
    for i in 0..HIST_BINS {
        sum += (a[i] as i64 - b[i] as i64).unsigned_abs();
    }
    sum
}

impl RegionStats {
    /// Accumulated histogram difference on the luma plane.
    pub fn luma_ahd(&self, other: &RegionStats) -> u64 {
        histogram_abs_diff(&self.luma, &other.luma)
    }

    /// Accumulated histogram difference on the Cb plane.
    pub fn cb_ahd(&self, other: &RegionStats) -> u64 {
        histogram_abs_diff(&self.cb, &other.cb)
    }

    /// Accumulated histogram difference on the Cr plane.
    pub fn cr_ahd(&self, other: &RegionStats) -> u64 {
        histogram_abs_diff(&self.cr, &other.cr)
    }
}

/// An analyzed input frame, as delivered by the picture-analysis stage.
///
/// The pixel data itself lives in an external frame buffer; the decision
/// core only sees the handle (`frame_id`) plus the derived statistics.
#[derive(Debug, Clone)]
pub struct AnalyzedFrame {
    /// Opaque handle to the external frame buffer.
    pub frame_id: u64,
    /// Picture order count (display-order index).
    pub poc: u64,
    /// Per-region histogram statistics, row-major over the region grid.
    pub regions: Vec<RegionStats>,
    /// Frame-level luma variance.
    pub variance: f64,
    /// Frame-level mean luma intensity.
    pub mean_luma: f64,
}

impl AnalyzedFrame {
    /// Accumulated luma histogram difference over all regions.
    pub fn total_luma_ahd(&self, other: &AnalyzedFrame) -> u64 {
        self.regions
            .iter()
            .zip(other.regions.iter())
            .map(|(a, b)| a.luma_ahd(b))
            .sum()
    }
}

/// Flat per-frame encode-control settings derived from the preset.
///
/// The decision core fills these in; it does not define the preset policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControls {
    /// Whether pre-encode temporal filtering may run for this frame.
    pub enable_temporal_filter: bool,
    /// Whether an overlay companion is emitted for filtered alt-refs.
    pub enable_overlays: bool,
    /// Maximum total references the RPS may assign.
    pub max_reference_count: u8,
    /// Motion-estimation effort level handed to the downstream stage.
    pub motion_search_level: u8,
}

impl FrameControls {
    /// Narrow the controls for a frame's temporal layer: the top of the
    /// pyramid carries fewer references and a lighter motion search.
    pub fn for_layer(mut self, temporal_layer: u8) -> Self {
        if temporal_layer >= 3 {
            self.max_reference_count = self.max_reference_count.min(3);
            self.motion_search_level = self.motion_search_level.saturating_sub(1);
        }
        self
    }

    /// Derive controls from the preset index (0 = slowest/highest quality).
    pub fn for_preset(preset: u8) -> Self {
        // Latest-active derivation only; superseded tuning branches from
        // older versions are intentionally not reproduced.
        match preset {
            0..=3 => Self {
                enable_temporal_filter: true,
                enable_overlays: true,
                max_reference_count: 7,
                motion_search_level: 3,
            },
            4..=7 => Self {
                enable_temporal_filter: true,
                enable_overlays: true,
                max_reference_count: 5,
                motion_search_level: 2,
            },
            8..=10 => Self {
                enable_temporal_filter: true,
                enable_overlays: false,
                max_reference_count: 4,
                motion_search_level: 1,
            },
            _ => Self {
                enable_temporal_filter: false,
                enable_overlays: false,
                max_reference_count: 2,
                motion_search_level: 0,
            },
        }
    }
}

/// A fully decided frame: the unit this core hands to downstream stages.
#[derive(Debug, Clone)]
pub struct FrameDescriptor {
    /// The analyzed input this descriptor wraps.
    pub analyzed: AnalyzedFrame,
    /// Decided frame type.
    pub frame_type: FrameType,
    /// Decode-order index assigned by the decision core.
    pub decode_order: u64,
    /// Temporal layer within the mini-GOP (0 = base).
    pub temporal_layer: u8,
    /// Hierarchical depth of the mini-GOP this frame belongs to.
    pub hierarchical_depth: u8,
    /// Position within the mini-GOP, 1-based in display order (0 for
    /// random-access points that open their own mini-GOP).
    pub gop_position: u32,
    /// Whether the scene-change detector flagged this frame as a cut.
    pub scene_change: bool,
    /// Whether the detector classified the change as a transient flash.
    pub flash: bool,
    /// Whether this frame is displayed as soon as it is decoded.
    pub show_frame: bool,
    /// Whether other frames may reference this one.
    pub is_reference: bool,
    /// Reference picture set assigned by the RPS generator.
    pub rps: RpsNode,
    /// Derived encode-control settings.
    pub controls: FrameControls,
    /// Planned temporal-filter window (past, future), if filtering applies.
    pub filter_window: Option<(u32, u32)>,
}

impl FrameDescriptor {
    /// Wrap an analyzed frame with undecided defaults.
    pub fn new(analyzed: AnalyzedFrame, controls: FrameControls) -> Self {
        Self {
            analyzed,
            frame_type: FrameType::Inter,
            decode_order: 0,
            temporal_layer: 0,
            hierarchical_depth: 0,
            gop_position: 0,
            scene_change: false,
            flash: false,
            show_frame: true,
            is_reference: true,
            rps: RpsNode::default(),
            controls,
            filter_window: None,
        }
    }

    /// Display-order index.
    pub fn poc(&self) -> u64 {
        self.analyzed.poc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(poc: u64, level: u32, regions: usize) -> AnalyzedFrame {
        let mut stats = RegionStats::default();
        let bin = (level as usize).min(HIST_BINS - 1);
        stats.luma[bin] = 1000;
        stats.cb[bin / 2] = 250;
        stats.cr[bin / 2] = 250;
        stats.mean_luma = level as f64 * 4.0;
        stats.variance = 10.0;
        AnalyzedFrame {
            frame_id: poc,
            poc,
            regions: vec![stats; regions],
            variance: 10.0,
            mean_luma: level as f64 * 4.0,
        }
    }

    #[test]
    fn test_frame_type_predicates() {
        assert!(FrameType::Key.is_intra());
        assert!(FrameType::Intra.is_random_access_point());
        assert!(!FrameType::Inter.is_intra());
        assert!(!FrameType::Overlay.is_random_access_point());
        assert!(FrameType::Key.is_key());
        assert!(!FrameType::Intra.is_key());
    }

    #[test]
    fn test_ahd_zero_for_identical() {
        let a = solid_frame(0, 16, 4);
        let b = solid_frame(1, 16, 4);
        assert_eq!(a.total_luma_ahd(&b), 0);
    }

    #[test]
    fn test_ahd_counts_moved_mass() {
        let a = solid_frame(0, 16, 1);
        let b = solid_frame(1, 48, 1);
        // All 1000 luma samples moved bins: 1000 out plus 1000 in.
        assert_eq!(a.regions[0].luma_ahd(&b.regions[0]), 2000);
    }

    #[test]
    fn test_preset_controls_monotone() {
        let slow = FrameControls::for_preset(0);
        let mid = FrameControls::for_preset(8);
        let fast = FrameControls::for_preset(13);
        assert!(slow.max_reference_count >= mid.max_reference_count);
        assert!(mid.max_reference_count >= fast.max_reference_count);
        assert!(slow.enable_overlays);
        assert!(!fast.enable_temporal_filter);
    }

    #[test]
    fn test_layer_controls_narrow_at_the_top() {
        let base = FrameControls::for_preset(0);
        assert_eq!(base.for_layer(0), base);
        assert_eq!(base.for_layer(2), base);
        let leaf = base.for_layer(4);
        assert_eq!(leaf.max_reference_count, 3);
        assert_eq!(leaf.motion_search_level, base.motion_search_level - 1);
    }
}
