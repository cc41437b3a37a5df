//! Temporal-filter window planning.
//!
//! Frames selected for pre-encode filtering (key frames and base-layer
//! anchors) get an adaptive window of past and future neighbours. The
//! requested window is the configured baseline plus a noise-adaptive bonus;
//! the actual window is trimmed by comparing the accumulated histogram
//! difference between the center frame and each candidate at increasing
//! distance against an area-normalized threshold, so the filter never
//! averages across content changes. The actual window is always at most
//! the requested one.

use tracing::debug;

use crate::frame::AnalyzedFrame;

/// Fraction of the frame area the AHD may reach before a candidate falls
/// out of the window.
const TF_AHD_SCALE: f64 = 0.04;

/// Noise sigma bounds for the window bonus ladder.
const NOISE_LOW: f64 = 2.0;
const NOISE_HIGH: f64 = 4.0;

/// Plans past/future filter windows; the source noise estimate is computed
/// once and reused for the whole stream.
#[derive(Debug)]
pub struct FilterWindowPlanner {
    base_window: u32,
    frame_area: u64,
    noise_sigma: Option<f64>,
}

impl FilterWindowPlanner {
    /// Create a planner with the configured baseline window.
    pub fn new(base_window: u32, width: u32, height: u32) -> Self {
        Self {
            base_window,
            frame_area: width as u64 * height as u64,
            noise_sigma: None,
        }
    }

    /// Estimate source noise from a frame's region variances, once.
    ///
    /// The quietest regions of a frame approximate the noise floor: their
    /// variance is mostly sensor noise rather than texture.
    pub fn noise_sigma(&mut self, frame: &AnalyzedFrame) -> f64 {
        if let Some(sigma) = self.noise_sigma {
            return sigma;
        }
        let mut variances: Vec<f64> = frame.regions.iter().map(|r| r.variance).collect();
        let sigma = if variances.is_empty() {
            0.0
        } else {
            variances.sort_by(|a, b| a.total_cmp(b));
            let quiet = &variances[..variances.len().div_ceil(4)];
            let mean = quiet.iter().sum::<f64>() / quiet.len() as f64;
            mean.sqrt()
        };
        debug!(sigma, "estimated source noise");
        self.noise_sigma = Some(sigma);
        sigma
    }

    /// The requested per-side window: baseline plus noise bonus.
    pub fn requested_window(&mut self, frame: &AnalyzedFrame) -> u32 {
        let sigma = self.noise_sigma(frame);
        let bonus = if sigma < NOISE_LOW {
            0
        } else if sigma < NOISE_HIGH {
            1
        } else {
            2
        };
        self.base_window + bonus
    }

    fn ahd_threshold(&self) -> f64 {
        self.frame_area as f64 * TF_AHD_SCALE
    }

    /// Trim one side of the window: candidates are ordered by increasing
    /// distance from the center; the window extends while each candidate's
    /// AHD stays inside the threshold and stops at the first that leaves it.
    fn trim(&self, center: &AnalyzedFrame, candidates: &[&AnalyzedFrame], requested: u32) -> u32 {
        let threshold = self.ahd_threshold();
        let mut window = 0u32;
        for candidate in candidates.iter().take(requested as usize) {
            if center.total_luma_ahd(candidate) as f64 > threshold {
                break;
            }
            window += 1;
        }
        window
    }

    /// Plan the window for a regular filtered frame.
    ///
    /// `past` and `future` are ordered by increasing distance from the
    /// center: already-decided frames on the past side, reorder-queue or
    /// pending-buffer frames on the future side.
    pub fn plan(
        &mut self,
        center: &AnalyzedFrame,
        past: &[&AnalyzedFrame],
        future: &[&AnalyzedFrame],
    ) -> (u32, u32) {
        let requested = self.requested_window(center);
        let past_window = self.trim(center, past, requested);
        let future_window = self.trim(center, future, requested);
        debug!(
            poc = center.poc,
            past = past_window,
            future = future_window,
            requested,
            "temporal filter window planned"
        );
        (past_window, future_window)
    }

    /// Plan a forward-only window for a delayed-intra or key frame, whose
    /// past neighbours belong to the previous scene.
    pub fn plan_forward_only(
        &mut self,
        center: &AnalyzedFrame,
        future: &[&AnalyzedFrame],
    ) -> (u32, u32) {
        let requested = self.requested_window(center);
        (0, self.trim(center, future, requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{RegionStats, HIST_BINS};

    const W: u32 = 320;
    const H: u32 = 240;

    fn frame_with(poc: u64, bin: usize, variance: f64) -> AnalyzedFrame {
        let mut stats = RegionStats::default();
        stats.luma[bin.min(HIST_BINS - 1)] = (W * H / 16) as u32;
        stats.variance = variance;
        AnalyzedFrame {
            frame_id: poc,
            poc,
            regions: vec![stats; 16],
            variance,
            mean_luma: 64.0,
        }
    }

    #[test]
    fn test_noise_estimate_cached() {
        let mut planner = FilterWindowPlanner::new(3, W, H);
        let a = frame_with(0, 10, 9.0);
        let sigma = planner.noise_sigma(&a);
        assert!((sigma - 3.0).abs() < 1e-9);
        // A different frame does not change the cached estimate.
        let b = frame_with(1, 10, 100.0);
        assert_eq!(planner.noise_sigma(&b), sigma);
    }

    #[test]
    fn test_noise_bonus_widens_request() {
        let mut quiet = FilterWindowPlanner::new(3, W, H);
        assert_eq!(quiet.requested_window(&frame_with(0, 10, 1.0)), 3);

        let mut noisy = FilterWindowPlanner::new(3, W, H);
        assert_eq!(noisy.requested_window(&frame_with(0, 10, 25.0)), 5);
    }

    #[test]
    fn test_window_trims_at_content_change() {
        let mut planner = FilterWindowPlanner::new(3, W, H);
        let center = frame_with(4, 10, 1.0);
        let near = frame_with(3, 10, 1.0);
        let mid = frame_with(2, 10, 1.0);
        // The far frame sits on different content entirely.
        let far = frame_with(1, 50, 1.0);
        let past = [&near, &mid, &far];
        let (p, f) = planner.plan(&center, &past, &[]);
        assert_eq!(p, 2);
        assert_eq!(f, 0);
    }

    #[test]
    fn test_window_never_exceeds_requested() {
        let mut planner = FilterWindowPlanner::new(2, W, H);
        let center = frame_with(0, 10, 1.0);
        let same: Vec<AnalyzedFrame> = (1..=6).map(|p| frame_with(p, 10, 1.0)).collect();
        let refs: Vec<&AnalyzedFrame> = same.iter().collect();
        let (p, f) = planner.plan(&center, &refs, &refs);
        assert_eq!(p, 2);
        assert_eq!(f, 2);
    }

    #[test]
    fn test_forward_only_for_key_frames() {
        let mut planner = FilterWindowPlanner::new(3, W, H);
        let center = frame_with(8, 10, 1.0);
        let future: Vec<AnalyzedFrame> = (9..=11).map(|p| frame_with(p, 10, 1.0)).collect();
        let refs: Vec<&AnalyzedFrame> = future.iter().collect();
        let (p, f) = planner.plan_forward_only(&center, &refs);
        assert_eq!(p, 0);
        assert_eq!(f, 3);
    }
}
