use chrono::Duration;
use snafu::prelude::*;
use tracing::debug;

use crate::chunk::Chunk;
use crate::contract::{Capability, Contract};
use crate::results::Results;
use crate::stage::{
    ProcessingContext, ResultsSnafu, Stage, StageError, gap_starts, gap_threshold_nanos,
};

/// Counts gaps longer than `max_sample_period` and their total length.
///
/// Reports `gap_count` and `gap_seconds` per chunk. Gaps that span a chunk
/// boundary are not seen.
#[derive(Debug, Clone)]
pub struct LocateGapsStage {
    name: String,
    max_sample_period: Duration,
    preconditions: Contract,
    postconditions: Contract,
}

impl LocateGapsStage {
    /// Stage reporting under `gaps`.
    pub fn new(max_sample_period: Duration) -> Self {
        Self {
            name: "gaps".to_string(),
            max_sample_period,
            preconditions: Contract::new(),
            postconditions: Contract::new().with(Capability::GapsLocated, true),
        }
    }
}

impl Stage for LocateGapsStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn preconditions(&self) -> &Contract {
        &self.preconditions
    }

    fn postconditions(&self) -> &Contract {
        &self.postconditions
    }

    fn process(&self, chunk: Chunk, ctx: &mut ProcessingContext) -> Result<Chunk, StageError> {
        let Some(timespan) = chunk.timespan() else {
            return Ok(chunk);
        };

        let ts = chunk.timestamps().values();
        let threshold = gap_threshold_nanos(self.max_sample_period);
        let (count, nanos) = gap_starts(ts, threshold).fold((0_u64, 0_i128), |(n, total), i| {
            (n + 1, total + i128::from(ts[i + 1] - ts[i]))
        });
        let seconds = nanos as f64 / 1e9;

        debug!(stage = %self.name, gaps = count, seconds, "located gaps");

        let mut results = Results::gaps();
        results
            .append(
                &timespan,
                [("gap_count", count as f64), ("gap_seconds", seconds)],
            )
            .context(ResultsSnafu)?;
        ctx.attach(&self.name, results)?;
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{TestResult, sample_chunk};

    #[test]
    fn counts_gaps_and_their_length() -> TestResult {
        let chunk = sample_chunk(&[0, 6, 60, 66, 200], &[1.0; 5])?;
        let mut ctx = ProcessingContext::new();
        LocateGapsStage::new(Duration::seconds(10)).process(chunk, &mut ctx)?;

        let totals = ctx.get("gaps").expect("gaps result").combined();
        assert_eq!(totals.get("gap_count"), Some(&2.0));
        assert_eq!(totals.get("gap_seconds"), Some(&(54.0 + 134.0)));
        Ok(())
    }

    #[test]
    fn no_gaps_reports_zero() -> TestResult {
        let chunk = sample_chunk(&[0, 1, 2], &[1.0; 3])?;
        let mut ctx = ProcessingContext::new();
        let stage = LocateGapsStage::new(Duration::seconds(5));
        stage.process(chunk, &mut ctx)?;

        let totals = ctx.get("gaps").expect("gaps result").combined();
        assert_eq!(totals.get("gap_count"), Some(&0.0));
        assert_eq!(stage.postconditions().get(Capability::GapsLocated), Some(true));
        Ok(())
    }
}
