//! Sequence configuration for the decision core.
//!
//! `SequenceConfig` is the immutable per-stream configuration: everything the
//! decision core needs to know about the stream before the first frame
//! arrives. It is read-only once a `DecisionContext` has been built from it.

use crate::error::{FramePlanError, Result};

/// Maximum supported hierarchical depth (mini-GOP of 2^5 = 32 frames).
pub const MAX_HIERARCHICAL_DEPTH: u8 = 5;

/// Number of DPB slots available to the reference picture set.
pub const DPB_SLOT_COUNT: usize = 8;

/// Maximum references a frame may carry across both lists.
pub const MAX_TOTAL_REFS: usize = 7;

/// Default hierarchical depth for random-access encoding.
pub const DEFAULT_HIERARCHICAL_DEPTH: u8 = 4;

/// Default scene-detection region grid (columns x rows).
pub const DEFAULT_REGION_GRID: (u32, u32) = (4, 4);

/// Default percentage of abrupt regions required for a frame-level cut.
pub const DEFAULT_ABRUPT_REGION_PERCENT: u32 = 50;

/// Default base temporal-filter window, in frames, on each side.
pub const DEFAULT_FILTER_WINDOW: u32 = 3;

/// Prediction structure for the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PredictionStructure {
    /// Hierarchical B pyramid with forward references and deferred display.
    #[default]
    RandomAccess,
    /// Low-delay P: past references only, display order == decode order.
    LowDelayP,
    /// Low-delay B: past references only, but B slices (both lists point
    /// backwards in display order).
    LowDelayB,
}

impl PredictionStructure {
    /// Whether this structure may reference frames ahead in display order.
    pub fn uses_forward_refs(&self) -> bool {
        matches!(self, Self::RandomAccess)
    }

    /// Whether decode order equals display order.
    pub fn is_low_delay(&self) -> bool {
        !self.uses_forward_refs()
    }
}

/// How periodic intra frames are inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntraRefreshType {
    /// Open GOP: a clean-random-access intra; prior references survive for
    /// leading frames.
    #[default]
    Open,
    /// Closed GOP: a key frame; all reference state is reset.
    Closed,
}

/// Manual reference assignment for one position of the manual prediction
/// period.
#[derive(Debug, Clone, Default)]
pub struct ManualRefEntry {
    /// Temporal layer of this position.
    pub temporal_layer: u8,
    /// Requested list-0 POC offsets (negative = past in display order).
    pub list0_offsets: Vec<i64>,
    /// Requested list-1 POC offsets.
    pub list1_offsets: Vec<i64>,
    /// Whether the frame at this position is itself kept as a reference.
    pub is_reference: bool,
}

/// User-specified manual prediction structure (DPB emulation mode).
///
/// When present, the template-driven RPS generator is bypassed and each
/// frame's references are resolved against an explicit DPB array instead.
#[derive(Debug, Clone, Default)]
pub struct ManualPrediction {
    /// Per-position entries, cycled over the stream.
    pub period: Vec<ManualRefEntry>,
}

/// Immutable per-stream configuration.
#[derive(Debug, Clone)]
#[must_use]
pub struct SequenceConfig {
    /// Luma width in pixels.
    pub width: u32,
    /// Luma height in pixels.
    pub height: u32,
    /// Hierarchical-level cap: mini-GOPs hold at most 2^cap frames.
    pub hierarchical_depth: u8,
    /// Prediction structure.
    pub prediction: PredictionStructure,
    /// Whether histogram-based scene-change detection runs.
    pub scene_detection: bool,
    /// Scene-detection region grid (columns, rows).
    pub region_grid: (u32, u32),
    /// Percentage of abrupt regions required for a frame-level cut (50 or 75).
    pub abrupt_region_percent: u32,
    /// Distance between random-access points. `None` = only the first frame;
    /// `Some(0)` = every frame; `Some(n)` = every n frames.
    pub intra_period: Option<u32>,
    /// Open or closed GOP at random-access points.
    pub intra_refresh: IntraRefreshType,
    /// Manual prediction structure; `Some` bypasses the RPS generator.
    pub manual_prediction: Option<ManualPrediction>,
    /// Whether pre-encode temporal filtering is planned for eligible frames.
    pub temporal_filter: bool,
    /// Base past/future filter window in frames.
    pub filter_window: u32,
    /// Whether lookahead first-pass statistics are collected (two-pass /
    /// lookahead rate control).
    pub lookahead_first_pass: bool,
    /// Encoder preset index used to derive flat per-frame controls (0 =
    /// highest quality, 13 = fastest).
    pub preset: u8,
}

impl SequenceConfig {
    /// Create a configuration with defaults for the given dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        assert!(width > 0, "width must be non-zero");
        assert!(height > 0, "height must be non-zero");

        Self {
            width,
            height,
            hierarchical_depth: DEFAULT_HIERARCHICAL_DEPTH,
            prediction: PredictionStructure::RandomAccess,
            scene_detection: true,
            region_grid: DEFAULT_REGION_GRID,
            abrupt_region_percent: DEFAULT_ABRUPT_REGION_PERCENT,
            intra_period: Some(64),
            intra_refresh: IntraRefreshType::Open,
            manual_prediction: None,
            temporal_filter: true,
            filter_window: DEFAULT_FILTER_WINDOW,
            lookahead_first_pass: false,
            preset: 8,
        }
    }

    /// Set the hierarchical depth cap.
    pub fn with_hierarchical_depth(mut self, depth: u8) -> Self {
        self.hierarchical_depth = depth;
        self
    }

    /// Set the prediction structure.
    pub fn with_prediction(mut self, prediction: PredictionStructure) -> Self {
        self.prediction = prediction;
        self
    }

    /// Enable or disable scene-change detection.
    pub fn with_scene_detection(mut self, enabled: bool) -> Self {
        self.scene_detection = enabled;
        self
    }

    /// Set the scene-detection region grid.
    pub fn with_region_grid(mut self, cols: u32, rows: u32) -> Self {
        self.region_grid = (cols, rows);
        self
    }

    /// Set the abrupt-region percentage for the frame-level decision.
    pub fn with_abrupt_region_percent(mut self, percent: u32) -> Self {
        self.abrupt_region_percent = percent;
        self
    }

    /// Set the intra period.
    pub fn with_intra_period(mut self, period: Option<u32>) -> Self {
        self.intra_period = period;
        self
    }

    /// Set the intra refresh type.
    pub fn with_intra_refresh(mut self, refresh: IntraRefreshType) -> Self {
        self.intra_refresh = refresh;
        self
    }

    /// Supply a manual prediction structure.
    pub fn with_manual_prediction(mut self, manual: ManualPrediction) -> Self {
        self.manual_prediction = Some(manual);
        self
    }

    /// Enable or disable temporal-filter planning.
    pub fn with_temporal_filter(mut self, enabled: bool) -> Self {
        self.temporal_filter = enabled;
        self
    }

    /// Set the base filter window.
    pub fn with_filter_window(mut self, window: u32) -> Self {
        self.filter_window = window;
        self
    }

    /// Enable lookahead first-pass statistics collection.
    pub fn with_lookahead_first_pass(mut self, enabled: bool) -> Self {
        self.lookahead_first_pass = enabled;
        self
    }

    /// Set the encoder preset index.
    pub fn with_preset(mut self, preset: u8) -> Self {
        self.preset = preset;
        self
    }

    /// Number of scene-detection regions.
    pub fn region_count(&self) -> u32 {
        self.region_grid.0 * self.region_grid.1
    }

    /// Pixel area of one scene-detection region.
    pub fn region_area(&self) -> u32 {
        (self.width / self.region_grid.0.max(1)) * (self.height / self.region_grid.1.max(1))
    }

    /// Lookahead slots the reorder queue must fill before admitting a frame.
    ///
    /// The scene-change detector classifies over a previous/current/next
    /// window, so it needs one decoded-ahead frame when enabled.
    pub fn scd_delay(&self) -> u64 {
        if self.scene_detection {
            1
        } else {
            0
        }
    }

    /// Number of spatial segments a frame's work is split into.
    ///
    /// One segment per row of 64-pixel superblocks, clamped so small frames
    /// still produce a single unit and tall frames do not flood the queue.
    pub fn segment_count(&self) -> u32 {
        self.height.div_ceil(64).clamp(1, 16)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.hierarchical_depth > MAX_HIERARCHICAL_DEPTH {
            return Err(FramePlanError::InvalidConfig(format!(
                "hierarchical depth {} exceeds maximum {}",
                self.hierarchical_depth, MAX_HIERARCHICAL_DEPTH
            )));
        }
        if self.region_grid.0 == 0 || self.region_grid.1 == 0 {
            return Err(FramePlanError::InvalidConfig(
                "region grid dimensions must be > 0".to_string(),
            ));
        }
        if self.abrupt_region_percent != 50 && self.abrupt_region_percent != 75 {
            return Err(FramePlanError::InvalidConfig(format!(
                "abrupt region percent must be 50 or 75, got {}",
                self.abrupt_region_percent
            )));
        }
        if let Some(manual) = &self.manual_prediction {
            if manual.period.is_empty() {
                return Err(FramePlanError::InvalidConfig(
                    "manual prediction period must not be empty".to_string(),
                ));
            }
            for (i, entry) in manual.period.iter().enumerate() {
                if entry.list0_offsets.len() > 4 || entry.list1_offsets.len() > 3 {
                    return Err(FramePlanError::InvalidConfig(format!(
                        "manual entry {i} exceeds list widths (4 past, 3 future)"
                    )));
                }
                if entry.list0_offsets.len() + entry.list1_offsets.len() > MAX_TOTAL_REFS {
                    return Err(FramePlanError::InvalidConfig(format!(
                        "manual entry {} requests more than {} references",
                        i, MAX_TOTAL_REFS
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SequenceConfig::new(1920, 1080);
        assert_eq!(config.hierarchical_depth, DEFAULT_HIERARCHICAL_DEPTH);
        assert_eq!(config.prediction, PredictionStructure::RandomAccess);
        assert!(config.scene_detection);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chaining() {
        let config = SequenceConfig::new(640, 360)
            .with_hierarchical_depth(3)
            .with_prediction(PredictionStructure::LowDelayP)
            .with_intra_period(Some(0))
            .with_abrupt_region_percent(75);

        assert_eq!(config.hierarchical_depth, 3);
        assert_eq!(config.prediction, PredictionStructure::LowDelayP);
        assert_eq!(config.intra_period, Some(0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_depth_cap_rejected() {
        let config = SequenceConfig::new(640, 360).with_hierarchical_depth(6);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_percent_rejected() {
        let config = SequenceConfig::new(640, 360).with_abrupt_region_percent(60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_manual_period_rejected() {
        let config =
            SequenceConfig::new(640, 360).with_manual_prediction(ManualPrediction::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scd_delay_follows_detection() {
        let on = SequenceConfig::new(640, 360);
        assert_eq!(on.scd_delay(), 1);
        let off = SequenceConfig::new(640, 360).with_scene_detection(false);
        assert_eq!(off.scd_delay(), 0);
    }

    #[test]
    fn test_segment_count_clamped() {
        assert_eq!(SequenceConfig::new(64, 64).segment_count(), 1);
        assert_eq!(SequenceConfig::new(1920, 1080).segment_count(), 16);
        assert_eq!(SequenceConfig::new(1920, 4320).segment_count(), 16);
    }

    #[test]
    fn test_low_delay_predicates() {
        assert!(PredictionStructure::RandomAccess.uses_forward_refs());
        assert!(!PredictionStructure::LowDelayP.uses_forward_refs());
        assert!(PredictionStructure::LowDelayB.is_low_delay());
    }
}
