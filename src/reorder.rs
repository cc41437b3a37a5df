//! Display-order reconstruction of the analyzed-frame stream.
//!
//! Frames arrive from the picture-analysis stage in arbitrary completion
//! order. The reorder queue buffers them in a POC-indexed ring and releases
//! them strictly by display order. A frame only becomes ready once its slot
//! and the next `scd_delay` slots are occupied, so the scene-change detector
//! always has its forward window when a frame is admitted; the end-of-stream
//! flag waives the lookahead requirement for the tail.

use tracing::{debug, warn};

use crate::error::{FramePlanError, Result};
use crate::frame::AnalyzedFrame;

/// POC-indexed ring releasing frames in strict display order.
#[derive(Debug)]
pub struct ReorderQueue {
    entries: Vec<Option<AnalyzedFrame>>,
    /// POC the head slot corresponds to (next frame to release).
    head_poc: u64,
    /// Forward slots that must be occupied before the head is released.
    scd_delay: u64,
    /// Highest POC handed to the lookahead first-pass trigger so far.
    first_pass_watermark: u64,
    eos: bool,
}

impl ReorderQueue {
    /// Create a queue able to buffer `capacity` frames of arrival skew.
    pub fn new(capacity: usize, scd_delay: u64) -> Self {
        assert!(capacity as u64 > scd_delay, "capacity must exceed scd delay");
        Self {
            entries: vec![None; capacity],
            head_poc: 0,
            scd_delay,
            first_pass_watermark: 0,
            eos: false,
        }
    }

    fn slot(&self, poc: u64) -> usize {
        (poc % self.entries.len() as u64) as usize
    }

    /// Insert an analyzed frame, in any arrival order.
    pub fn push(&mut self, frame: AnalyzedFrame) -> Result<()> {
        let poc = frame.poc;
        if poc < self.head_poc {
            // Late duplicate of an already-released POC; nothing references
            // the queue slot anymore.
            warn!(poc, head = self.head_poc, "dropping late reorder arrival");
            return Ok(());
        }
        if poc >= self.head_poc + self.entries.len() as u64 {
            return Err(FramePlanError::ReorderOverflow(poc));
        }
        let slot = self.slot(poc);
        if self.entries[slot].is_some() {
            warn!(poc, "dropping duplicate reorder arrival");
            return Ok(());
        }
        debug!(poc, "buffered out-of-order frame");
        self.entries[slot] = Some(frame);
        Ok(())
    }

    /// Flag end of stream: remaining frames drain without lookahead.
    pub fn set_eos(&mut self) {
        self.eos = true;
    }

    /// Whether end of stream has been flagged.
    pub fn eos(&self) -> bool {
        self.eos
    }

    /// Whether the head frame may be released.
    pub fn front_ready(&self) -> bool {
        if self.entries[self.slot(self.head_poc)].is_none() {
            return false;
        }
        if self.eos {
            return true;
        }
        (1..=self.scd_delay).all(|k| self.entries[self.slot(self.head_poc + k)].is_some())
    }

    /// The head frame, without releasing it.
    pub fn front(&self) -> Option<&AnalyzedFrame> {
        self.entries[self.slot(self.head_poc)].as_ref()
    }

    /// The frame `k` display positions past the head, if buffered.
    pub fn lookahead(&self, k: u64) -> Option<&AnalyzedFrame> {
        if k as usize >= self.entries.len() {
            return None;
        }
        self.entries[self.slot(self.head_poc + k)]
            .as_ref()
            .filter(|f| f.poc == self.head_poc + k)
    }

    /// Release the head frame if it is ready. The slot is reset.
    pub fn pop_front(&mut self) -> Option<AnalyzedFrame> {
        if !self.front_ready() {
            return None;
        }
        let slot = self.slot(self.head_poc);
        let frame = self.entries[slot].take();
        self.head_poc += 1;
        frame
    }

    /// POC the head currently waits for.
    pub fn head_poc(&self) -> u64 {
        self.head_poc
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Whether no frames are buffered.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.is_none())
    }

    /// POCs of buffered lookahead frames that have not yet been handed to
    /// the lazy first-pass trigger. Used by two-pass / lookahead rate
    /// control to schedule first-pass motion estimation as frames become
    /// visible, before they are admitted.
    pub fn take_first_pass_candidates(&mut self) -> Vec<u64> {
        let mut out = Vec::new();
        let start = self.first_pass_watermark.max(self.head_poc);
        for poc in start..self.head_poc + self.entries.len() as u64 {
            // Stop at the first gap so late arrivals are not skipped over.
            if self.entries[self.slot(poc)]
                .as_ref()
                .is_some_and(|f| f.poc == poc)
            {
                out.push(poc);
            } else {
                break;
            }
        }
        if let Some(&last) = out.last() {
            self.first_pass_watermark = last + 1;
        }
        out
    }
}
