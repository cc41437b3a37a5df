//! Mini-GOP partitioning of the pending buffer.
//!
//! Once the pending buffer is ready (full to the hierarchy cap, or cut
//! short by end of stream), it is split into contiguous mini-GOPs, each
//! with its own hierarchical depth. The walk tries candidate sizes from
//! largest to smallest through an activity array: a size is disabled when
//! the remaining run cannot fill it or when a random-access point sits
//! inside the span. Incomplete trailing runs fall back to the next smaller
//! depth, down to single-frame groups.

use tracing::debug;

use crate::frame::FrameDescriptor;

/// One contiguous group of the pending buffer sharing a prediction
/// template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniGop {
    /// Index of the first frame within the pending buffer.
    pub start: usize,
    /// Number of frames.
    pub len: usize,
    /// Hierarchical depth of the group's template (`len == 2^depth`).
    pub depth: u8,
    /// Number of intra frames inside the group.
    pub intra_count: u32,
    /// Number of key (closed-GOP) frames inside the group.
    pub key_count: u32,
}

impl MiniGop {
    /// Index one past the last frame.
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Candidate sizes enabled at one walk position.
fn activity_array(
    frames: &[FrameDescriptor],
    start: usize,
    max_depth: u8,
) -> Vec<bool> {
    let mut active = vec![false; max_depth as usize + 1];
    // Length of the run of non-RAP frames beginning at `start`.
    let run = frames[start..]
        .iter()
        .take_while(|f| !f.frame_type.is_random_access_point())
        .count();
    for (d, slot) in active.iter_mut().enumerate() {
        *slot = (1usize << d) <= run;
    }
    active
}

/// Split the pending buffer into mini-GOPs.
///
/// The result exactly partitions `frames`: group lengths sum to the buffer
/// length with no gaps or overlaps.
pub fn partition_mini_gops(frames: &[FrameDescriptor], max_depth: u8) -> Vec<MiniGop> {
    let mut gops = Vec::new();
    let mut start = 0usize;

    while start < frames.len() {
        if frames[start].frame_type.is_random_access_point() {
            // Random-access points open their own single-frame group.
            gops.push(MiniGop {
                start,
                len: 1,
                depth: 0,
                intra_count: 1,
                key_count: u32::from(frames[start].frame_type.is_key()),
            });
            start += 1;
            continue;
        }

        let active = activity_array(frames, start, max_depth);
        let depth = active
            .iter()
            .rposition(|&enabled| enabled)
            .unwrap_or(0) as u8;
        let len = 1usize << depth;

        gops.push(MiniGop {
            start,
            len,
            depth,
            intra_count: 0,
            key_count: 0,
        });
        start += len;
    }

    debug!(
        buffer = frames.len(),
        groups = gops.len(),
        "partitioned pending buffer"
    );
    debug_assert_eq!(
        gops.iter().map(|g| g.len).sum::<usize>(),
        frames.len(),
        "mini-GOPs must exactly partition the pending buffer"
    );
    gops
}

/// Pairs of adjacent mini-GOPs whose depth differs; each boundary needs a
/// reference-dependency correction pass.
pub fn hierarchy_switches(gops: &[MiniGop]) -> Vec<(usize, usize)> {
    gops.windows(2)
        .enumerate()
        .filter(|(_, w)| w[0].depth != w[1].depth)
        .map(|(i, _)| (i, i + 1))
        .collect()
}
