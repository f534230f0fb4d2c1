use arrow::array::{Array, Float32Builder, TimestampNanosecondArray};
use chrono::Duration;
use snafu::prelude::*;
use tracing::debug;

use crate::chunk::Chunk;
use crate::contract::{Capability, Contract};
use crate::stage::{
    ChunkSnafu, ProcessingContext, Stage, StageError, gap_starts, gap_threshold_nanos,
};

/// Brackets every gap in the recording with zero-valued samples.
///
/// Where consecutive samples are more than `max_sample_period` apart, one
/// zero sample is inserted `max_sample_period` after the earlier sample and
/// another 1 ns before the later one. Integrating the result with a left
/// Riemann sum then charges the earlier value only for `max_sample_period`
/// and zero for the rest of the gap.
#[derive(Debug, Clone)]
pub struct BookendGapsStage {
    name: String,
    max_sample_period: Duration,
    preconditions: Contract,
    postconditions: Contract,
}

impl BookendGapsStage {
    /// Stage treating anything longer than `max_sample_period` as a gap.
    pub fn new(max_sample_period: Duration) -> Self {
        Self {
            name: "bookend_gaps".to_string(),
            max_sample_period,
            preconditions: Contract::new(),
            postconditions: Contract::new().with(Capability::GapsBookendedWithZeros, true),
        }
    }

    /// Longest spacing between samples not treated as a gap.
    pub fn max_sample_period(&self) -> Duration {
        self.max_sample_period
    }
}

impl Stage for BookendGapsStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn preconditions(&self) -> &Contract {
        &self.preconditions
    }

    fn postconditions(&self) -> &Contract {
        &self.postconditions
    }

    fn process(&self, chunk: Chunk, _ctx: &mut ProcessingContext) -> Result<Chunk, StageError> {
        let threshold = gap_threshold_nanos(self.max_sample_period);
        let ts = chunk.timestamps().values();
        let gaps: Vec<usize> = gap_starts(ts, threshold).collect();
        if gaps.is_empty() {
            return Ok(chunk);
        }

        // Source row followed by the zero samples that bracket the gap after it.
        let mut layout: Vec<(usize, Vec<i64>)> = Vec::with_capacity(ts.len());
        let mut next_gap = gaps.iter().peekable();
        let mut inserted = 0;
        for (row, &t) in ts.iter().enumerate() {
            let mut zeros = Vec::new();
            if next_gap.next_if_eq(&&row).is_some() {
                let after = t + threshold;
                let before = ts[row + 1] - 1;
                zeros.push(after);
                if before > after {
                    zeros.push(before);
                }
                inserted += zeros.len();
            }
            layout.push((row, zeros));
        }

        let total = ts.len() + inserted;
        let mut timestamps = Vec::with_capacity(total);
        for (row, zeros) in &layout {
            timestamps.push(ts[*row]);
            timestamps.extend_from_slice(zeros);
        }

        let ids = chunk.column_ids();
        let mut columns = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(source) = chunk.column(&id) else {
                continue;
            };
            let mut builder = Float32Builder::with_capacity(total);
            for (row, zeros) in &layout {
                if source.is_valid(*row) {
                    builder.append_value(source.value(*row));
                } else {
                    builder.append_null();
                }
                for _ in zeros {
                    builder.append_value(0.0);
                }
            }
            columns.push((id, builder.finish()));
        }

        debug!(
            stage = %self.name,
            gaps = gaps.len(),
            inserted,
            "bookended gaps with zeros"
        );

        Chunk::from_parts(
            TimestampNanosecondArray::from(timestamps),
            columns,
            *chunk.period(),
        )
        .context(ChunkSnafu)
    }
}
