//! Linear processing pipelines.
//!
//! A [`Pipeline`] owns one [`Loader`] and an ordered list of stages. A run
//! pulls chunks from the loader one at a time; each chunk passes through
//! every stage before the next one is requested. After each chunk, every
//! partial result the stages attached is merged into the pipeline's
//! accumulator of the same name.
//!
//! Before loading anything, a run checks that the stage sequence is viable:
//! each stage's preconditions must be met by the source contract together
//! with the postconditions of the stages before it.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use snafu::prelude::*;
use tracing::{debug, info, warn};

use crate::chunk::ColumnSelection;
use crate::contract::Contract;
use crate::loader::Loader;
use crate::results::{Results, ResultsError};
use crate::stage::{ProcessingContext, Stage, StageError};
use crate::store::{ChunkStore, StoreError};

/// Errors that abort a pipeline run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PipelineError {
    /// A stage's preconditions are not met by what precedes it.
    #[snafu(display("Stage {stage} has unsatisfied preconditions: {}", unmet.join(" ")))]
    UnsatisfiedPreconditions {
        /// Name of the stage.
        stage: String,
        /// One description per unmet capability.
        unmet: Vec<String>,
    },

    /// Loading a chunk failed.
    #[snafu(display("Failed to load chunk: {source}"))]
    Store {
        /// Underlying store error.
        source: StoreError,
    },

    /// A stage failed to process a chunk.
    #[snafu(display("Stage {stage} failed: {source}"))]
    Stage {
        /// Name of the failing stage.
        stage: String,
        /// Underlying stage error.
        source: StageError,
    },

    /// A chunk's result could not be merged into the accumulated results.
    #[snafu(display("Failed to merge results of {stage}: {source}"))]
    Merge {
        /// Name the result was attached under.
        stage: String,
        /// Underlying accumulator error.
        source: ResultsError,
    },
}

/// Whether a pipeline is between runs or inside one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Not running.
    Idle,
    /// Inside [`Pipeline::run`].
    Running,
}

/// A loader followed by an ordered list of stages.
#[derive(Debug)]
pub struct Pipeline<S: ChunkStore> {
    loader: Loader<S>,
    stages: Vec<Box<dyn Stage>>,
    source_contract: Contract,
    columns: ColumnSelection,
    precondition_check: bool,
    results: BTreeMap<String, Results>,
    state: PipelineState,
    chunks_processed: usize,
}

impl<S: ChunkStore> Pipeline<S> {
    /// Pipeline with no stages, reading every column.
    pub fn new(loader: Loader<S>) -> Self {
        Self {
            loader,
            stages: Vec::new(),
            source_contract: Contract::new(),
            columns: ColumnSelection::All,
            precondition_check: true,
            results: BTreeMap::new(),
            state: PipelineState::Idle,
            chunks_processed: 0,
        }
    }

    /// Append a stage.
    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Declare what the stored data already guarantees.
    pub fn with_source_contract(mut self, contract: Contract) -> Self {
        self.source_contract = contract;
        self
    }

    /// Columns to load for each chunk.
    pub fn with_columns(mut self, columns: ColumnSelection) -> Self {
        self.columns = columns;
        self
    }

    /// Enable or disable the viability check at the start of each run.
    pub fn with_precondition_check(mut self, enabled: bool) -> Self {
        self.precondition_check = enabled;
        self
    }

    /// The loader.
    pub fn loader(&self) -> &Loader<S> {
        &self.loader
    }

    /// Stage names, in order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Chunks fully processed by the last run.
    pub fn chunks_processed(&self) -> usize {
        self.chunks_processed
    }

    /// Accumulated results, keyed by stage name.
    pub fn results(&self) -> &BTreeMap<String, Results> {
        &self.results
    }

    /// Accumulated results of one stage.
    pub fn result(&self, name: &str) -> Option<&Results> {
        self.results.get(name)
    }

    /// Drop accumulated results and reset every stage.
    pub fn reset(&mut self) {
        self.results.clear();
        self.chunks_processed = 0;
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    /// Check that every stage's preconditions are met by the source
    /// contract plus the postconditions of the stages before it.
    pub fn check_preconditions(&self) -> Result<(), PipelineError> {
        let mut available = self.source_contract.clone();
        for stage in &self.stages {
            let unmet = stage.preconditions().unsatisfied(&available);
            if !unmet.is_empty() {
                warn!(
                    stage = stage.name(),
                    available = %available,
                    unmet = ?unmet,
                    "pipeline is not viable"
                );
                return UnsatisfiedPreconditionsSnafu {
                    stage: stage.name(),
                    unmet,
                }
                .fail();
            }
            available.absorb(stage.postconditions());
        }
        Ok(())
    }

    /// Run the pipeline over every chunk the loader yields.
    ///
    /// Results from an earlier run are discarded first. On failure the run
    /// stops, results merged so far are kept, and the pipeline returns to
    /// [`PipelineState::Idle`].
    pub fn run(&mut self) -> Result<(), PipelineError> {
        self.reset();
        if self.precondition_check {
            self.check_preconditions()?;
        }

        info!(
            key = self.loader.key(),
            stages = self.stages.len(),
            "pipeline run started"
        );
        self.state = PipelineState::Running;
        let outcome = self.run_chunks();
        self.state = PipelineState::Idle;

        match &outcome {
            Ok(()) => info!(
                key = self.loader.key(),
                chunks = self.chunks_processed,
                results = self.results.len(),
                "pipeline run finished"
            ),
            Err(err) => warn!(
                key = self.loader.key(),
                chunks = self.chunks_processed,
                error = %err,
                "pipeline run aborted"
            ),
        }
        outcome
    }

    fn run_chunks(&mut self) -> Result<(), PipelineError> {
        let chunks = self
            .loader
            .load_chunks(self.columns.clone())
            .context(StoreSnafu)?;

        for chunk in chunks {
            let mut chunk = chunk.context(StoreSnafu)?;
            debug!(
                rows = chunk.num_rows(),
                period = %chunk.period(),
                "processing chunk"
            );

            let mut ctx = ProcessingContext::new();
            for stage in &self.stages {
                chunk = stage
                    .process(chunk, &mut ctx)
                    .context(StageSnafu { stage: stage.name() })?;
            }

            for (name, partial) in ctx.drain() {
                match self.results.entry(name) {
                    Entry::Vacant(entry) => {
                        entry.insert(partial);
                    }
                    Entry::Occupied(mut entry) => {
                        let stage = entry.key().clone();
                        entry
                            .get_mut()
                            .update(&partial)
                            .context(MergeSnafu { stage })?;
                    }
                }
            }
            self.chunks_processed += 1;
        }
        Ok(())
    }
}
