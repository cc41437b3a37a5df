//! frameplan: the temporal decision core of a block-based video encoder.
//!
//! The crate converts an unordered stream of analyzed input frames into a
//! temporally ordered encoding plan. For each frame it decides its role in
//! the hierarchical prediction pyramid, which previously encoded frames it
//! may reference, whether it starts a new scene, and how reference buffers
//! are retained or released.
//!
//! Flow through the core:
//!
//! 1. [`reorder::ReorderQueue`] reconstructs display order from arbitrary
//!    arrival order, holding each frame until its scene-detection lookahead
//!    is present.
//! 2. [`scene::SceneChangeDetector`] classifies cuts and flashes over a
//!    three-frame histogram window.
//! 3. [`minigop`] partitions the pending buffer into variable-depth
//!    mini-GOPs.
//! 4. [`refdeps::ReferenceQueue`] tracks forward dependency counts for
//!    every live reference, correcting across hierarchy switches.
//! 5. [`rps::RpsGenerator`] (or [`rps::manual::ManualDpb`]) resolves each
//!    frame's reference picture set, refresh mask, and show semantics.
//! 6. [`tfilter::FilterWindowPlanner`] derives adaptive pre-filter windows.
//! 7. [`dispatch::Dispatcher`] emits per-segment work units downstream.
//!
//! [`context::DecisionContext`] owns the whole flow for one stream;
//! [`stage::DecisionStage`] runs it as a worker thread between bounded
//! queues. Pixel-level motion search, mode decision, and entropy coding are
//! external collaborators and never appear here.

#![forbid(unsafe_code)]

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod gop;
pub mod minigop;
pub mod refdeps;
pub mod reorder;
pub mod rps;
pub mod scene;
pub mod stage;
pub mod tfilter;

pub use config::{IntraRefreshType, PredictionStructure, SequenceConfig};
pub use context::DecisionContext;
pub use dispatch::{CountingPool, ReferencePool, TaskKind, WorkUnit};
pub use error::{CorruptKind, FramePlanError, Result};
pub use frame::{AnalyzedFrame, FrameControls, FrameDescriptor, FrameType};
pub use stage::DecisionStage;
