//! Processing stages.
//!
//! A stage receives one chunk at a time, may transform it, and may attach
//! a partial [`Results`] to the [`ProcessingContext`] that travels with the
//! chunk. Each stage declares two contracts:
//!
//! - *preconditions*: capabilities the data must already have when it
//!   reaches the stage;
//! - *postconditions*: capabilities the stage guarantees afterwards.
//!
//! The pipeline uses them to reject a stage sequence before any data is
//! loaded.

mod bookend;
mod energy;
mod gaps;

use std::collections::BTreeMap;
use std::fmt;

use arrow::error::ArrowError;
use snafu::prelude::*;

use crate::chunk::{Chunk, ChunkError};
use crate::contract::Contract;
use crate::results::{Results, ResultsError};

pub use bookend::BookendGapsStage;
pub use energy::{EnergyStage, JOULES_PER_KWH, POWER_KINDS};
pub use gaps::LocateGapsStage;

/// Errors raised while a stage processes a chunk.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StageError {
    /// An Arrow kernel failed.
    #[snafu(display("Arrow error: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// The transformed data could not be assembled into a chunk.
    #[snafu(display("Invalid chunk: {source}"))]
    Chunk {
        /// Underlying chunk error.
        source: ChunkError,
    },

    /// A computed statistic was rejected by its accumulator.
    #[snafu(display("Invalid result: {source}"))]
    Results {
        /// Underlying accumulator error.
        source: ResultsError,
    },

    /// A stage attached two results to the same chunk.
    #[snafu(display("Stage {name} already attached a result for this chunk"))]
    DuplicateResult {
        /// Name the result was attached under.
        name: String,
    },
}

/// Partial results attached to a single chunk, keyed by stage name.
#[derive(Debug, Default)]
pub struct ProcessingContext {
    results: BTreeMap<String, Results>,
}

impl ProcessingContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `results` under `name`.
    ///
    /// A stage may attach at most one result per chunk.
    pub fn attach(&mut self, name: &str, results: Results) -> Result<(), StageError> {
        ensure!(
            !self.results.contains_key(name),
            DuplicateResultSnafu { name }
        );
        self.results.insert(name.to_string(), results);
        Ok(())
    }

    /// Result attached under `name`.
    pub fn get(&self, name: &str) -> Option<&Results> {
        self.results.get(name)
    }

    /// True when nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Take every attached result, leaving the context empty.
    pub fn drain(&mut self) -> BTreeMap<String, Results> {
        std::mem::take(&mut self.results)
    }
}

/// `max_sample_period` in nanoseconds; periods too long for `i64` never
/// report a gap.
pub(crate) fn gap_threshold_nanos(max_sample_period: chrono::Duration) -> i64 {
    max_sample_period.num_nanoseconds().unwrap_or(i64::MAX).max(0)
}

/// Indices `i` where samples `i` and `i + 1` are more than `threshold`
/// nanoseconds apart.
pub(crate) fn gap_starts(timestamps: &[i64], threshold: i64) -> impl Iterator<Item = usize> + '_ {
    timestamps
        .windows(2)
        .enumerate()
        .filter(move |(_, pair)| pair[1].saturating_sub(pair[0]) > threshold)
        .map(|(i, _)| i)
}

/// One step of a pipeline.
pub trait Stage: fmt::Debug {
    /// Name under which the stage's results are reported.
    fn name(&self) -> &str;

    /// Capabilities the incoming data must have.
    fn preconditions(&self) -> &Contract;

    /// Capabilities the outgoing data has.
    fn postconditions(&self) -> &Contract;

    /// Process one chunk.
    fn process(&self, chunk: Chunk, ctx: &mut ProcessingContext) -> Result<Chunk, StageError>;

    /// Forget anything kept from a previous run.
    fn reset(&mut self) {}
}
