use arrow::array::{Array, Float32Array};
use snafu::prelude::*;
use tracing::debug;

use crate::chunk::{Chunk, ColumnId};
use crate::contract::{Capability, Contract};
use crate::results::Results;
use crate::stage::{ProcessingContext, ResultsSnafu, Stage, StageError};

/// Joules in one kilowatt-hour.
pub const JOULES_PER_KWH: f64 = 3_600_000.0;

/// Power types energy is computed for.
pub const POWER_KINDS: [&str; 3] = ["active", "apparent", "reactive"];

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Computes energy in kWh for every power type present in a chunk.
///
/// A chunk that already carries an `(energy, type)` column contributes the
/// sum of that column. Otherwise `(power, type)` is integrated with the
/// left Riemann sum `Σ Δt_i × p_i` over every sample but the last, so the
/// samples must bracket each gap with zeros for the integral to hold.
///
/// The reported period runs from the chunk's first sample to its last, not
/// over the requested range.
#[derive(Debug, Clone)]
pub struct EnergyStage {
    name: String,
    preconditions: Contract,
    postconditions: Contract,
}

impl Default for EnergyStage {
    fn default() -> Self {
        Self::new("energy")
    }
}

impl EnergyStage {
    /// Stage reporting under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            preconditions: Contract::new().with(Capability::GapsBookendedWithZeros, true),
            postconditions: Contract::new().with(Capability::EnergyComputed, true),
        }
    }
}

fn sum_values(values: &Float32Array) -> f64 {
    values.iter().flatten().map(f64::from).sum()
}

fn integrate_kwh(timestamps: &[i64], power: &Float32Array) -> f64 {
    let joules: f64 = timestamps
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let dt_secs = (pair[1] - pair[0]) as f64 / NANOS_PER_SEC;
            let p = if power.is_valid(i) { f64::from(power.value(i)) } else { 0.0 };
            dt_secs * p
        })
        .sum();
    joules / JOULES_PER_KWH
}

impl Stage for EnergyStage {
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

        let timestamps = chunk.timestamps().values();
        let mut energy = Vec::with_capacity(POWER_KINDS.len());
        for kind in POWER_KINDS {
            if let Some(column) = chunk.column(&ColumnId::energy(kind)) {
                energy.push((kind, sum_values(column)));
            } else if let Some(column) = chunk.column(&ColumnId::power(kind)) {
                energy.push((kind, integrate_kwh(timestamps, column)));
            }
        }

        debug!(
            stage = %self.name,
            period = %timespan,
            kinds = energy.len(),
            "computed energy"
        );

        let mut results = Results::energy();
        results.append(&timespan, energy).context(ResultsSnafu)?;
        ctx.attach(&self.name, results)?;
        Ok(chunk)
    }
}
