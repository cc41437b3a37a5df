//! Histogram-based scene-change detection.
//!
//! The detector classifies the current frame over a three-frame window
//! (previous / current / next). Per spatial region it compares the
//! accumulated histogram difference (AHD) between the previous and current
//! frame against a decaying per-region running average; a region whose luma
//! or chroma AHD deviates beyond an area-scaled threshold is abrupt. Abrupt
//! regions are then disambiguated into transient flashes (fast luma spike
//! that recovers by the next frame) and true cuts. The frame-level decision
//! compares the abrupt-region count to a configured percentage.
//!
//! Classification is a pure function of the window and the running
//! averages; the averages are only updated by `evaluate`.

use tracing::debug;

use crate::frame::AnalyzedFrame;

/// Fraction of a region's pixels whose histogram mass must move for the
/// AHD deviation to count as abrupt.
const AHD_THRESHOLD_SCALE: f64 = 0.05;

/// Luma variance above which a region's threshold doubles, separating
/// noise churn from structural change.
const HIGH_VARIANCE_BOUND: f64 = 900.0;

/// Chroma planes carry a quarter of the luma samples (4:2:0), so their
/// thresholds scale down accordingly.
const CHROMA_THRESHOLD_DIV: f64 = 4.0;

/// Minimum mean-luma jump from previous to current for a flash signature.
const FLASH_DELTA: f64 = 24.0;

/// Maximum mean-luma distance between previous and next for the spike to
/// count as recovered.
const FLASH_RECOVERY: f64 = 8.0;

/// Outcome of one window evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneDecision {
    /// The frame starts a new scene.
    pub scene_change: bool,
    /// The abrupt change is a transient flash, not a cut.
    pub flash: bool,
    /// Number of regions classified abrupt.
    pub abrupt_regions: u32,
}

/// Per-region running-average state plus the frame-level vote.
#[derive(Debug)]
pub struct SceneChangeDetector {
    region_count: usize,
    region_area: u32,
    abrupt_percent: u32,
    avg_luma: Vec<f64>,
    avg_cb: Vec<f64>,
    avg_cr: Vec<f64>,
    /// Averages were never seeded.
    cold: bool,
    /// The previous evaluation was a region-majority burst; the averages
    /// reset wholesale on the next one.
    reset_pending: bool,
}

impl SceneChangeDetector {
    /// Create a detector for the given region grid.
    pub fn new(region_count: usize, region_area: u32, abrupt_percent: u32) -> Self {
        Self {
            region_count,
            region_area,
            abrupt_percent,
            avg_luma: vec![0.0; region_count],
            avg_cb: vec![0.0; region_count],
            avg_cr: vec![0.0; region_count],
            cold: true,
            reset_pending: false,
        }
    }

    fn region_threshold(&self, prev: &AnalyzedFrame, cur: &AnalyzedFrame, region: usize) -> f64 {
        let mut threshold = self.region_area as f64 * AHD_THRESHOLD_SCALE;
        let high_variance = prev.regions[region].variance > HIGH_VARIANCE_BOUND
            || cur.regions[region].variance > HIGH_VARIANCE_BOUND;
        if high_variance {
            threshold *= 2.0;
        }
        threshold
    }

    /// Classify the window against the current running averages.
    ///
    /// Pure: repeated calls on the same window and state return the same
    /// decision.
    pub fn classify(
        &self,
        prev: &AnalyzedFrame,
        cur: &AnalyzedFrame,
        next: Option<&AnalyzedFrame>,
    ) -> SceneDecision {
        let regions = self.region_count.min(prev.regions.len()).min(cur.regions.len());
        let mut abrupt = 0u32;
        let mut flash_regions = 0u32;

        for i in 0..regions {
            let threshold = self.region_threshold(prev, cur, i);
            let luma = prev.regions[i].luma_ahd(&cur.regions[i]) as f64;
            let cb = prev.regions[i].cb_ahd(&cur.regions[i]) as f64;
            let cr = prev.regions[i].cr_ahd(&cur.regions[i]) as f64;

            let luma_dev = (luma - self.avg_luma[i]).abs() > threshold;
            let cb_dev = (cb - self.avg_cb[i]).abs() > threshold / CHROMA_THRESHOLD_DIV;
            let cr_dev = (cr - self.avg_cr[i]).abs() > threshold / CHROMA_THRESHOLD_DIV;
            if !(luma_dev || cb_dev || cr_dev) {
                continue;
            }
            abrupt += 1;

            // A spike that recovers by the next frame is a flash, not a cut.
            let spike =
                cur.regions[i].mean_luma - prev.regions[i].mean_luma > FLASH_DELTA;
            let recovered = next.map(|n| {
                (n.regions[i].mean_luma - prev.regions[i].mean_luma).abs() < FLASH_RECOVERY
            });
            if spike && recovered == Some(true) {
                flash_regions += 1;
            }
        }

        let majority = abrupt as u64 * 100 >= regions as u64 * self.abrupt_percent as u64
            && regions > 0
            && abrupt > 0;
        let flash = majority && flash_regions * 2 > abrupt;
        SceneDecision {
            scene_change: majority && !flash,
            flash,
            abrupt_regions: abrupt,
        }
    }

    /// Classify the window, then fold it into the running averages.
    pub fn evaluate(
        &mut self,
        prev: &AnalyzedFrame,
        cur: &AnalyzedFrame,
        next: Option<&AnalyzedFrame>,
    ) -> SceneDecision {
        let decision = if self.cold {
            SceneDecision::default()
        } else {
            self.classify(prev, cur, next)
        };

        let regions = self.region_count.min(prev.regions.len()).min(cur.regions.len());
        let seed = self.cold || self.reset_pending;
        for i in 0..regions {
            let luma = prev.regions[i].luma_ahd(&cur.regions[i]) as f64;
            let cb = prev.regions[i].cb_ahd(&cur.regions[i]) as f64;
            let cr = prev.regions[i].cr_ahd(&cur.regions[i]) as f64;
            if seed {
                self.avg_luma[i] = luma;
                self.avg_cb[i] = cb;
                self.avg_cr[i] = cr;
            } else {
                self.avg_luma[i] = (3.0 * self.avg_luma[i] + luma) / 4.0;
                self.avg_cb[i] = (3.0 * self.avg_cb[i] + cb) / 4.0;
                self.avg_cr[i] = (3.0 * self.avg_cr[i] + cr) / 4.0;
            }
        }
        self.cold = false;
        self.reset_pending = decision.scene_change || decision.flash;

        if decision.scene_change {
            debug!(
                poc = cur.poc,
                abrupt = decision.abrupt_regions,
                "scene change detected"
            );
        }
        decision
    }

    /// Running luma average for a region (diagnostics).
    pub fn avg_luma(&self, region: usize) -> f64 {
        self.avg_luma[region]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{RegionStats, HIST_BINS};

    const REGIONS: usize = 4;
    const AREA: u32 = 32 * 32;

    /// A frame whose regions concentrate all mass in one histogram bin.
    fn frame_at_bin(poc: u64, bin: usize, mean: f64) -> AnalyzedFrame {
        let mut stats = RegionStats::default();
        stats.luma[bin.min(HIST_BINS - 1)] = AREA;
        stats.cb[bin.min(HIST_BINS - 1) / 2] = AREA / 4;
        stats.cr[bin.min(HIST_BINS - 1) / 2] = AREA / 4;
        stats.mean_luma = mean;
        stats.variance = 50.0;
        AnalyzedFrame {
            frame_id: poc,
            poc,
            regions: vec![stats; REGIONS],
            variance: 50.0,
            mean_luma: mean,
        }
    }

    fn warmed_detector() -> SceneChangeDetector {
        let mut det = SceneChangeDetector::new(REGIONS, AREA, 50);
        // Seed the averages with a static pair.
        let a = frame_at_bin(0, 10, 40.0);
        let b = frame_at_bin(1, 10, 40.0);
        det.evaluate(&a, &b, None);
        det
    }

    #[test]
    fn test_static_content_is_not_a_cut() {
        let mut det = warmed_detector();
        let prev = frame_at_bin(1, 10, 40.0);
        let cur = frame_at_bin(2, 10, 40.0);
        let next = frame_at_bin(3, 10, 40.0);
        let d = det.evaluate(&prev, &cur, Some(&next));
        assert!(!d.scene_change);
        assert_eq!(d.abrupt_regions, 0);
    }

    #[test]
    fn test_majority_abrupt_without_flash_is_a_cut() {
        let mut det = warmed_detector();
        let prev = frame_at_bin(1, 10, 40.0);
        // Content jumps bins and stays there: a cut, not a flash.
        let cur = frame_at_bin(2, 40, 60.0);
        let next = frame_at_bin(3, 40, 60.0);
        let d = det.evaluate(&prev, &cur, Some(&next));
        assert!(d.scene_change);
        assert!(!d.flash);
        assert_eq!(d.abrupt_regions, REGIONS as u32);
    }

    #[test]
    fn test_flash_is_not_a_cut() {
        let mut det = warmed_detector();
        let prev = frame_at_bin(1, 10, 40.0);
        // Bright spike that recovers by the next frame.
        let cur = frame_at_bin(2, 40, 90.0);
        let next = frame_at_bin(3, 10, 41.0);
        let d = det.evaluate(&prev, &cur, Some(&next));
        assert!(!d.scene_change);
        assert!(d.flash);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let det = warmed_detector();
        let prev = frame_at_bin(1, 10, 40.0);
        let cur = frame_at_bin(2, 40, 60.0);
        let next = frame_at_bin(3, 40, 60.0);
        let first = det.classify(&prev, &cur, Some(&next));
        let second = det.classify(&prev, &cur, Some(&next));
        assert_eq!(first, second);
    }

    #[test]
    fn test_average_resets_after_burst() {
        let mut det = warmed_detector();
        let prev = frame_at_bin(1, 10, 40.0);
        let cur = frame_at_bin(2, 40, 60.0);
        let next = frame_at_bin(3, 40, 60.0);
        let d = det.evaluate(&prev, &cur, Some(&next));
        assert!(d.scene_change);

        // The next evaluation reseeds the averages wholesale: the same
        // large AHD is the new baseline, so a repeat of it is quiet.
        let prev2 = frame_at_bin(2, 40, 60.0);
        let cur2 = frame_at_bin(3, 10, 40.0);
        let next2 = frame_at_bin(4, 10, 40.0);
        det.evaluate(&prev2, &cur2, Some(&next2));
        let settled = det.avg_luma(0);
        // Reseeded, not decayed: the average equals the new observation.
        assert_eq!(settled, 2.0 * AREA as f64);
    }

    #[test]
    fn test_high_variance_doubles_threshold() {
        let mut det = SceneChangeDetector::new(REGIONS, AREA, 50);
        let a = frame_at_bin(0, 10, 40.0);
        let b = frame_at_bin(1, 10, 40.0);
        det.evaluate(&a, &b, None);

        // A moderate shift: above the plain threshold (5% of the area),
        // below the doubled one.
        let prev = frame_at_bin(1, 10, 40.0);
        let mut cur = frame_at_bin(2, 10, 40.0);
        for r in &mut cur.regions {
            r.luma[10] = AREA - 40;
            r.luma[12] = 40;
        }
        let plain = det.classify(&prev, &cur, None);
        assert_eq!(plain.abrupt_regions, REGIONS as u32);

        let mut noisy = cur.clone();
        for r in &mut noisy.regions {
            r.variance = HIGH_VARIANCE_BOUND * 2.0;
        }
        let quiet = det.classify(&prev, &noisy, None);
        assert_eq!(quiet.abrupt_regions, 0);
    }

    #[test]
    fn test_seventy_five_percent_vote() {
        let mut det = SceneChangeDetector::new(REGIONS, AREA, 75);
        let a = frame_at_bin(0, 10, 40.0);
        let b = frame_at_bin(1, 10, 40.0);
        det.evaluate(&a, &b, None);

        // Change only half the regions: under the 75% bar.
        let prev = frame_at_bin(1, 10, 40.0);
        let mut cur = frame_at_bin(2, 10, 40.0);
        for region in cur.regions.iter_mut().take(REGIONS / 2) {
            region.luma = [0; HIST_BINS];
            region.luma[40] = AREA;
        }
        let d = det.classify(&prev, &cur, None);
        assert_eq!(d.abrupt_regions, (REGIONS / 2) as u32);
        assert!(!d.scene_change);
    }
}
