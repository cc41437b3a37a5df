//! Error types for frameplan.

use thiserror::Error;

/// Structured reason for a corrupted-frame condition.
///
/// These states indicate a logic or configuration bug, not a recoverable
/// input problem: once the reference bookkeeping for one frame is wrong,
/// every later frame that resolves references against the same buffers is
/// suspect. Callers are expected to stop the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptKind {
    /// A reference entry's dependent count would go below zero.
    DependencyUnderflow,
    /// A requested reference POC could not be found in the DPB.
    UnresolvedReference,
    /// A frame's position could not be mapped into its GOP template.
    GopIndex,
    /// No free DPB slot was available for a frame that must be stored.
    DpbFull,
    /// A reference violates temporal-layer ordering.
    TemporalLayerOrder,
}

impl std::fmt::Display for CorruptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CorruptKind::DependencyUnderflow => "dependency count underflow",
            CorruptKind::UnresolvedReference => "unresolved reference POC",
            CorruptKind::GopIndex => "impossible GOP indexing",
            CorruptKind::DpbFull => "no free DPB slot",
            CorruptKind::TemporalLayerOrder => "temporal layer ordering violated",
        };
        f.write_str(s)
    }
}

/// Main error type for frameplan operations.
#[derive(Error, Debug)]
pub enum FramePlanError {
    /// Invalid configuration (dimensions, hierarchy cap, region grid, ...).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required piece of context was missing at initialization.
    #[error("Missing required context: {0}")]
    MissingContext(&'static str),

    /// A frame's reference bookkeeping is corrupted. Processing of the
    /// frame is abandoned and the stream is unrecoverable.
    #[error("Corrupted frame at POC {poc}: {kind}")]
    CorruptFrame {
        /// Display-order index of the frame that failed.
        poc: u64,
        /// Structured reason code.
        kind: CorruptKind,
    },

    /// A frame arrived too far ahead of the reorder head to be buffered.
    #[error("Reorder queue overflow at POC {0}")]
    ReorderOverflow(u64),

    /// The decision stage worker disconnected unexpectedly.
    #[error("Decision stage disconnected: {0}")]
    StageDisconnected(String),
}

impl FramePlanError {
    /// Shorthand for a corrupted-frame error.
    pub fn corrupt(poc: u64, kind: CorruptKind) -> Self {
        FramePlanError::CorruptFrame { poc, kind }
    }
}

/// Result type for frameplan operations.
pub type Result<T> = std::result::Result<T, FramePlanError>;
