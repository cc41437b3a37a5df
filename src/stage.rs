//! The picture-decision pipeline stage.
//!
//! The decision core runs as a single worker thread inside a larger
//! thread-per-stage pipeline connected by bounded queues:
//!
//! ```text
//! DecisionStage::spawn()
//!   |
//!   +-- Spawn "picture-decision" thread
//!   |     |
//!   |     +-- for each StageInput::Frame:
//!   |     |     1. reorder / scene detection / mini-GOP assembly
//!   |     |     2. RPS generation and dependency tracking
//!   |     |     3. send WorkUnits downstream (blocking when full)
//!   |     |
//!   |     +-- StageInput::EndOfStream: flush partial buffers, exit
//!   |
//!   +-- Returns the stage handle (input sender, output receiver, join)
//! ```
//!
//! Blocking points are the input `recv`, the bounded output `send`, and the
//! per-frame completion barrier of synchronously dispatched sub-picture
//! workloads (temporal filtering); there is no cancellation or timeout
//! model. End of stream is a terminal message that forces the partial
//! mini-GOP flush and drains every buffer, after which the output channel
//! disconnects.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender};
use tracing::{debug, info};

use crate::config::SequenceConfig;
use crate::context::DecisionContext;
use crate::dispatch::{CountingPool, ReferencePool, TaskKind, WorkUnit};
use crate::error::{FramePlanError, Result};
use crate::frame::AnalyzedFrame;

/// Depth of the analyzed-frame input queue.
const INPUT_QUEUE_DEPTH: usize = 16;

/// Depth of the downstream work-unit queue.
const OUTPUT_QUEUE_DEPTH: usize = 64;

/// Message consumed by the decision worker.
#[derive(Debug)]
enum StageInput {
    /// An analyzed frame from the picture-analysis stage.
    Frame(AnalyzedFrame),
    /// Terminal flag: flush and exit.
    EndOfStream,
}

/// Handle to a running picture-decision stage.
pub struct DecisionStage {
    input: Sender<StageInput>,
    output: Receiver<WorkUnit>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl DecisionStage {
    /// Spawn the stage with the built-in counting reference pool.
    pub fn spawn(config: SequenceConfig) -> Result<Self> {
        Self::spawn_with_pool(config, CountingPool::new())
    }

    /// Spawn the stage with an external reference-object pool.
    pub fn spawn_with_pool<P>(config: SequenceConfig, pool: P) -> Result<Self>
    where
        P: ReferencePool + Send + 'static,
    {
        config.validate()?;
        let (input_tx, input_rx) = bounded(INPUT_QUEUE_DEPTH);
        let (output_tx, output_rx) = bounded(OUTPUT_QUEUE_DEPTH);

        let handle = thread::Builder::new()
            .name("picture-decision".to_string())
            .spawn(move || worker(config, pool, input_rx, output_tx))
            .map_err(|e| FramePlanError::StageDisconnected(e.to_string()))?;

        Ok(Self {
            input: input_tx,
            output: output_rx,
            handle: Some(handle),
        })
    }

    /// Queue one analyzed frame; blocks while the input queue is full.
    pub fn send(&self, frame: AnalyzedFrame) -> Result<()> {
        self.input
            .send(StageInput::Frame(frame))
            .map_err(|_| FramePlanError::StageDisconnected("input queue closed".to_string()))
    }

    /// Signal end of stream. The worker flushes and exits; the output
    /// channel disconnects once the drain completes.
    pub fn end_of_stream(&self) -> Result<()> {
        self.input
            .send(StageInput::EndOfStream)
            .map_err(|_| FramePlanError::StageDisconnected("input queue closed".to_string()))
    }

    /// The downstream work-unit queue.
    pub fn output(&self) -> Receiver<WorkUnit> {
        self.output.clone()
    }

    /// Wait for the worker to exit and surface its result.
    ///
    /// Drain the output queue (until it disconnects) before joining, or
    /// the worker may still be blocked on a full downstream queue.
    pub fn join(mut self) -> Result<()> {
        drop(self.input);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| FramePlanError::StageDisconnected("worker panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

fn worker<P: ReferencePool>(
    config: SequenceConfig,
    mut pool: P,
    input: Receiver<StageInput>,
    output: Sender<WorkUnit>,
) -> Result<()> {
    let mut ctx = DecisionContext::new(config)?;
    info!("picture-decision stage running");

    for message in input.iter() {
        match message {
            StageInput::Frame(frame) => {
                let units = ctx.on_frame(frame, &mut pool)?;
                forward(&output, units)?;
            }
            StageInput::EndOfStream => {
                debug!("end of stream received, flushing");
                let units = ctx.flush(&mut pool)?;
                forward(&output, units)?;
                break;
            }
        }
    }
    info!("picture-decision stage exiting");
    Ok(())
}

/// Forward units downstream. A frame's temporal-filter units form a
/// synchronization barrier: the worker hands them out, then blocks on their
/// completion signal before releasing the frame's encode work.
fn forward(output: &Sender<WorkUnit>, units: Vec<WorkUnit>) -> Result<()> {
    let mut pending_wait = None;
    for unit in units {
        if unit.task == TaskKind::TemporalFilter {
            pending_wait = unit.barrier.clone();
        } else if let Some(barrier) = pending_wait.take() {
            debug!("waiting on temporal-filter completion");
            barrier.wait();
        }
        output
            .send(unit)
            .map_err(|_| FramePlanError::StageDisconnected("output queue closed".to_string()))?;
    }
    if let Some(barrier) = pending_wait.take() {
        barrier.wait();
    }
    Ok(())
}
