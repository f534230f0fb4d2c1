#![allow(missing_docs)]

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Float64Builder, TimestampMillisecondBuilder};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Duration, TimeZone, Utc};
use meterflow_core::{
    chunk::ColumnSelection,
    contract::{Capability, Contract},
    interval::Interval,
    loader::Loader,
    pipeline::{Pipeline, PipelineError, PipelineState},
    stage::{EnergyStage, JOULES_PER_KWH},
    store::{ParquetStore, StoreConfig},
};
use parquet::arrow::ArrowWriter;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const KEY: &str = "building1/utility/electric/meter1";
const SAMPLES: i64 = 10_000;

fn t0() -> Result<DateTime<Utc>, &'static str> {
    Utc.with_ymd_and_hms(2013, 4, 1, 0, 0, 0)
        .single()
        .ok_or("invalid timestamp")
}

/// One sample per second with active power equal to the sample index, as an
/// importer would write it: millisecond UTC timestamps and `Float64` data.
fn write_ramp_table(path: &Path, start: DateTime<Utc>) -> TestResult {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new("power:active", DataType::Float64, false),
    ]));

    let mut ts = TimestampMillisecondBuilder::with_capacity(SAMPLES as usize).with_timezone("UTC");
    let mut power = Float64Builder::with_capacity(SAMPLES as usize);
    for i in 0..SAMPLES {
        ts.append_value((start + Duration::seconds(i)).timestamp_millis());
        power.append_value(i as f64);
    }

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(ts.finish()), Arc::new(power.finish())],
    )?;

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn windowed_loader(tmp: &TempDir) -> Result<Loader<ParquetStore>, Box<dyn std::error::Error>> {
    let start = t0()?;
    write_ramp_table(&tmp.path().join(format!("{KEY}.parquet")), start)?;

    let mut config = StoreConfig::new(tmp.path());
    config.window = Interval::bounded(
        start + Duration::seconds(1000),
        start + Duration::seconds(1600),
    )?;
    let store = ParquetStore::open(config)?;
    Ok(Loader::new(Arc::new(store), KEY))
}

#[test]
fn energy_pipeline_requires_bookended_source() -> TestResult {
    let tmp = TempDir::new()?;
    let loader = windowed_loader(&tmp)?;

    let mut pipeline = Pipeline::new(loader.clone()).with_stage(EnergyStage::default());
    let err = pipeline.run().expect_err("source does not declare bookended gaps");
    assert!(matches!(
        err,
        PipelineError::UnsatisfiedPreconditions { ref stage, ref unmet }
            if stage == "energy" && unmet.len() == 1
    ));
    assert!(err.to_string().contains("gaps_bookended_with_zeros"));
    assert_eq!(pipeline.chunks_processed(), 0);
    assert!(pipeline.results().is_empty());

    let pipeline = Pipeline::new(loader)
        .with_source_contract(Contract::new().with(Capability::GapsBookendedWithZeros, true))
        .with_stage(EnergyStage::default());
    pipeline.check_preconditions()?;
    Ok(())
}

#[test]
fn windowed_energy_matches_analytic_integral() -> TestResult {
    let tmp = TempDir::new()?;
    let start = t0()?;
    let loader = windowed_loader(&tmp)?;

    let mut pipeline = Pipeline::new(loader)
        .with_source_contract(Contract::new().with(Capability::GapsBookendedWithZeros, true))
        .with_columns(ColumnSelection::All)
        .with_stage(EnergyStage::default());
    pipeline.run()?;

    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert_eq!(pipeline.chunks_processed(), 1);

    let energy = pipeline.result("energy").ok_or("missing energy results")?;
    let periods = energy.per_period();
    assert_eq!(periods.len(), 1);
    assert_eq!(periods[0].start, start + Duration::seconds(1000));
    assert_eq!(periods[0].end, start + Duration::seconds(1599));

    // Σ_{i=1000}^{1598} i watts for one second each.
    let joules: f64 = (1000..=1598).map(|i| i as f64).sum();
    assert_eq!(joules, 778_101.0);
    let kwh = energy.combined()["active"];
    assert!((kwh - joules / JOULES_PER_KWH).abs() < 1e-12);
    Ok(())
}

#[test]
fn disabling_the_check_runs_anyway() -> TestResult {
    let tmp = TempDir::new()?;
    let loader = windowed_loader(&tmp)?.with_mask(vec![
        Interval::bounded(t0()? + Duration::seconds(1000), t0()? + Duration::seconds(1100))?,
        Interval::bounded(t0()? + Duration::seconds(1100), t0()? + Duration::seconds(1200))?,
        // Entirely outside the window: skipped, not an error.
        Interval::bounded(t0()? + Duration::seconds(5000), t0()? + Duration::seconds(6000))?,
    ]);

    let mut pipeline = Pipeline::new(loader)
        .with_precondition_check(false)
        .with_stage(EnergyStage::default());
    pipeline.run()?;

    assert_eq!(pipeline.chunks_processed(), 2);
    let energy = pipeline.result("energy").ok_or("missing energy results")?;
    assert_eq!(energy.len(), 2);

    // Each chunk integrates over all but its last sample.
    let joules: f64 = (1000..1099).chain(1100..1199).map(|i| i as f64).sum();
    let kwh = energy.combined()["active"];
    assert!((kwh - joules / JOULES_PER_KWH).abs() < 1e-12);
    Ok(())
}
