use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, Float32Array, Float64Builder, RecordBatch, TimestampMillisecondBuilder,
    TimestampNanosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::chunk::{Chunk, ColumnId};
use crate::interval::Interval;

pub(crate) type TestResult = Result<(), Box<dyn std::error::Error>>;

pub(crate) fn utc_datetime(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .expect("valid UTC timestamp")
}

/// Base instant used by fixtures: 2012-01-01T00:00:00Z.
pub(crate) fn epoch() -> DateTime<Utc> {
    utc_datetime(2012, 1, 1, 0, 0, 0)
}

/// `epoch() + secs` seconds.
pub(crate) fn secs(secs: i64) -> DateTime<Utc> {
    epoch() + Duration::seconds(secs)
}

pub(crate) fn interval_secs(start: i64, end: i64) -> Interval {
    Interval::bounded(secs(start), secs(end)).expect("ordered fixture bounds")
}

fn nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().expect("fixture timestamp fits in i64 nanos")
}

/// Chunk with a single `(power, active)` column sampled at `epoch() + offsets`.
pub(crate) fn sample_chunk(
    offsets: &[i64],
    active: &[f32],
) -> Result<Chunk, Box<dyn std::error::Error>> {
    chunk_with_columns(offsets, &[(ColumnId::power("active"), active)])
}

pub(crate) fn chunk_with_columns(
    offsets: &[i64],
    columns: &[(ColumnId, &[f32])],
) -> Result<Chunk, Box<dyn std::error::Error>> {
    let ts = TimestampNanosecondArray::from(
        offsets.iter().map(|s| nanos(secs(*s))).collect::<Vec<_>>(),
    );
    let columns = columns
        .iter()
        .map(|(id, values)| (id.clone(), Float32Array::from(values.to_vec())))
        .collect();
    Ok(Chunk::from_parts(ts, columns, Interval::unbounded())?)
}

/// Write a table the way an external importer would: millisecond timestamps
/// in a column named `time_column` and `Float64` data columns.
pub(crate) fn write_millis_table(
    path: &Path,
    time_column: &str,
    offsets: &[i64],
    columns: &[(&str, &[f64])],
    props: WriterProperties,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut fields = vec![Field::new(
        time_column,
        DataType::Timestamp(TimeUnit::Millisecond, None),
        false,
    )];
    fields.extend(
        columns
            .iter()
            .map(|(name, _)| Field::new(*name, DataType::Float64, false)),
    );
    let schema = Arc::new(Schema::new(fields));

    let mut ts_builder = TimestampMillisecondBuilder::with_capacity(offsets.len());
    for offset in offsets {
        ts_builder.append_value(secs(*offset).timestamp_millis());
    }

    let mut arrays: Vec<Arc<dyn Array>> = vec![Arc::new(ts_builder.finish())];
    for (_, values) in columns {
        let mut builder = Float64Builder::with_capacity(values.len());
        for v in *values {
            builder.append_value(*v);
        }
        arrays.push(Arc::new(builder.finish()));
    }

    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}
