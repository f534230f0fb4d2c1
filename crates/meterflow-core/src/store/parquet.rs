//! Parquet-backed chunk store.
//!
//! A store is a directory tree. The table at key `a/b/c` lives in
//! `<root>/a/b/c.parquet` and holds one timestamp column (any Arrow
//! timestamp unit, optionally with a timezone) plus numeric data columns
//! named after their [`ColumnId`] field names.
//!
//! Every operation opens the file it needs and drops the handle before
//! returning. Range reads push both the column projection and the
//! `start <= ts < end` row filter into the Parquet reader, so rows outside
//! the interval are never materialized.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, Float32Array, RecordBatch, TimestampNanosecondArray,
};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{
    ArrowTimestampType, DataType, Field, Schema, SchemaRef, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType,
};
use arrow::error::ArrowError;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::{
    ArrowPredicateFn, ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder, RowFilter,
};
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::basic::Compression;
use parquet::file::metadata::ParquetMetaData;
use parquet::file::properties::WriterProperties;
use parquet::file::statistics::Statistics;
use parquet::schema::types::SchemaDescriptor;
use snafu::prelude::*;
use tracing::{debug, info};

use crate::chunk::{Chunk, ColumnId, chunk_schema};
use crate::interval::Interval;
use crate::store::config::{DEFAULT_MEMORY_CEILING_BYTES, DEFAULT_TIME_COLUMN, StoreConfig};
use crate::store::error::{
    ArrowSnafu, ChunkSnafu, InvalidTableDataSnafu, IoSnafu, MissingTimeColumnSnafu, ParquetSnafu,
    StoreResult, TableExistsSnafu, TimeConversionOverflowSnafu, UnknownColumnSnafu,
    UnknownKeySnafu, UnsupportedColumnTypeSnafu, UnsupportedTimeTypeSnafu,
};
use crate::store::time_filter::{TimeFilter, time_mask};
use crate::store::{ChunkStore, normalize_key};

const TABLE_EXTENSION: &str = "parquet";

/// A [`ChunkStore`] over a directory of Parquet files.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
    window: Interval,
    memory_ceiling: u64,
    time_column: String,
}

/// Guard that removes a temporary file on drop unless disarmed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort; the caller is already returning an error.
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl ParquetStore {
    /// Open the store described by `config`.
    ///
    /// The root directory must already exist.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let meta = fs::metadata(&config.root).context(IoSnafu {
            path: config.root.display().to_string(),
        })?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                "store root is not a directory",
            ))
            .context(IoSnafu {
                path: config.root.display().to_string(),
            });
        }

        debug!(
            root = %config.root.display(),
            window = %config.window,
            memory_ceiling = config.memory_ceiling_bytes,
            "opened parquet store"
        );

        Ok(Self {
            root: config.root,
            window: config.window,
            memory_ceiling: config.memory_ceiling_bytes,
            time_column: config.time_column,
        })
    }

    /// A store rooted at `root` with default settings.
    ///
    /// Unlike [`ParquetStore::open`] this does not touch the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            window: Interval::unbounded(),
            memory_ceiling: DEFAULT_MEMORY_CEILING_BYTES,
            time_column: DEFAULT_TIME_COLUMN.to_string(),
        }
    }

    /// Replace the window.
    pub fn with_window(mut self, window: Interval) -> Self {
        self.window = window;
        self
    }

    /// Replace the memory ceiling.
    pub fn with_memory_ceiling(mut self, bytes: u64) -> Self {
        self.memory_ceiling = bytes;
        self
    }

    /// Replace the name of the timestamp column.
    pub fn with_time_column(mut self, column: impl Into<String>) -> Self {
        self.time_column = column.into();
        self
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of the timestamp column.
    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    /// Path of the file backing `key`.
    pub fn table_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{TABLE_EXTENSION}", normalize_key(key)))
    }

    /// Write a new table at `key`.
    ///
    /// `timestamps` must be strictly increasing and every column must have
    /// one value per timestamp. Existing tables are never replaced. The
    /// file is written next to its final path and renamed into place, so a
    /// failed write leaves no table behind.
    pub fn write_table(
        &self,
        key: &str,
        timestamps: &[DateTime<Utc>],
        columns: &[(ColumnId, Vec<f32>)],
    ) -> StoreResult<()> {
        let key = normalize_key(key);
        ensure!(
            !key.is_empty() && key.split('/').all(is_plain_segment),
            InvalidTableDataSnafu {
                key,
                message: "key must be a non-empty path of plain segments",
            }
        );

        let path = self.table_path(key);
        ensure!(!path.exists(), TableExistsSnafu { key });

        if let Some(pos) = timestamps.windows(2).position(|w| w[0] >= w[1]) {
            return InvalidTableDataSnafu {
                key,
                message: format!("timestamps not strictly increasing at row {}", pos + 1),
            }
            .fail();
        }
        for (id, values) in columns {
            ensure!(
                values.len() == timestamps.len(),
                InvalidTableDataSnafu {
                    key,
                    message: format!(
                        "column {id} has {} values for {} timestamps",
                        values.len(),
                        timestamps.len()
                    ),
                }
            );
            ensure!(
                !id.is_index() && id.field_name() != self.time_column,
                InvalidTableDataSnafu {
                    key,
                    message: format!("column {id} collides with the time column"),
                }
            );
        }

        let nanos = timestamps
            .iter()
            .map(|ts| {
                ts.timestamp_nanos_opt()
                    .context(TimeConversionOverflowSnafu { key, timestamp: *ts })
            })
            .collect::<StoreResult<Vec<i64>>>()?;

        let mut fields = Vec::with_capacity(columns.len() + 1);
        fields.push(Field::new(
            &self.time_column,
            DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
            false,
        ));
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len() + 1);
        arrays.push(Arc::new(
            TimestampNanosecondArray::from(nanos).with_timezone("UTC"),
        ));
        for (id, values) in columns {
            fields.push(Field::new(id.field_name(), DataType::Float32, true));
            arrays.push(Arc::new(Float32Array::from(values.clone())));
        }
        let schema = Arc::new(Schema::new(fields));
        let batch = RecordBatch::try_new(schema.clone(), arrays).context(ArrowSnafu { key })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context(IoSnafu {
                path: parent.display().to_string(),
            })?;
        }

        let tmp_path = path.with_extension(format!("{TABLE_EXTENSION}.tmp"));
        let mut guard = TempFileGuard::new(tmp_path.clone());

        {
            let file = File::create(&tmp_path).context(IoSnafu {
                path: tmp_path.display().to_string(),
            })?;
            let props = WriterProperties::builder()
                .set_compression(Compression::SNAPPY)
                .build();
            let mut writer =
                ArrowWriter::try_new(file, schema, Some(props)).context(ParquetSnafu { key })?;
            writer.write(&batch).context(ParquetSnafu { key })?;
            let file = writer.into_inner().context(ParquetSnafu { key })?;
            file.sync_all().context(IoSnafu {
                path: tmp_path.display().to_string(),
            })?;
        }

        fs::rename(&tmp_path, &path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        guard.disarm();

        info!(
            key,
            rows = timestamps.len(),
            columns = columns.len(),
            "wrote table"
        );
        Ok(())
    }

    fn open_table(&self, key: &str) -> StoreResult<File> {
        let key = normalize_key(key);
        let path = self.table_path(key);
        ensure!(
            key.split('/').all(is_plain_segment) && path.is_file(),
            UnknownKeySnafu { key }
        );
        match File::open(&path) {
            Ok(file) => Ok(file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => UnknownKeySnafu { key }.fail(),
            Err(err) => Err(err).context(IoSnafu {
                path: path.display().to_string(),
            }),
        }
    }

    fn reader_builder(&self, key: &str) -> StoreResult<ParquetRecordBatchReaderBuilder<File>> {
        let file = self.open_table(key)?;
        ParquetRecordBatchReaderBuilder::try_new(file).context(ParquetSnafu { key })
    }

    fn time_index(&self, key: &str, schema: &Schema) -> StoreResult<usize> {
        schema
            .index_of(&self.time_column)
            .ok()
            .context(MissingTimeColumnSnafu {
                key,
                column: &self.time_column,
            })
    }

    /// Leaf position of the time column in the Parquet schema.
    fn time_leaf(&self, schema: &SchemaDescriptor) -> Option<usize> {
        schema
            .columns()
            .iter()
            .position(|column| matches!(column.path().parts(), [name] if *name == self.time_column))
    }

    /// Read `columns` for rows in `interval`, ignoring the window.
    fn scan(&self, key: &str, columns: &[ColumnId], interval: &Interval) -> StoreResult<Chunk> {
        let key = normalize_key(key);
        let builder = self.reader_builder(key)?;
        let schema = builder.schema().clone();

        let ts_idx = self.time_index(key, &schema)?;
        let filter = TimeFilter::new(
            key,
            &self.time_column,
            schema.field(ts_idx).data_type(),
            &interval.query_bounds(),
        )?;

        let mut roots = vec![ts_idx];
        for id in columns {
            let name = id.field_name();
            let idx = schema
                .index_of(&name)
                .ok()
                .filter(|idx| *idx != ts_idx)
                .context(UnknownColumnSnafu {
                    key,
                    column: id.clone(),
                })?;
            let datatype = schema.field(idx).data_type();
            ensure!(
                datatype.is_numeric(),
                UnsupportedColumnTypeSnafu {
                    key,
                    column: name,
                    datatype: datatype.clone(),
                }
            );
            roots.push(idx);
        }

        let projection = ProjectionMask::roots(builder.parquet_schema(), roots);
        let ts_projection = ProjectionMask::roots(builder.parquet_schema(), [ts_idx]);
        let predicate = ArrowPredicateFn::new(ts_projection, move |batch: RecordBatch| {
            time_mask(batch.column(0).as_ref(), &filter)
        });

        let reader = builder
            .with_projection(projection)
            .with_row_filter(RowFilter::new(vec![Box::new(predicate)]))
            .build()
            .context(ParquetSnafu { key })?;

        let out_schema = chunk_schema(columns);
        let mut batches = Vec::new();
        for batch in reader {
            let batch = batch.context(ArrowSnafu { key })?;
            batches.push(
                normalize_batch(&batch, &self.time_column, columns, &out_schema)
                    .context(ArrowSnafu { key })?,
            );
        }

        let batch = concat_batches(&out_schema, &batches).context(ArrowSnafu { key })?;
        Chunk::try_new(batch, *interval).context(ChunkSnafu { key })
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".."
}

/// Reshape one projected batch into chunk layout: the time column first,
/// as naive nanoseconds, then the requested columns as `Float32`.
fn normalize_batch(
    batch: &RecordBatch,
    time_column: &str,
    columns: &[ColumnId],
    schema: &SchemaRef,
) -> Result<RecordBatch, ArrowError> {
    let missing = |name: &str| ArrowError::SchemaError(format!("projected batch lacks column {name}"));

    let ts = batch
        .column_by_name(time_column)
        .ok_or_else(|| missing(time_column))?;

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len() + 1);
    arrays.push(Arc::new(timestamps_to_nanos(ts.as_ref())?));
    for id in columns {
        let name = id.field_name();
        let column = batch.column_by_name(&name).ok_or_else(|| missing(&name))?;
        arrays.push(cast(column, &DataType::Float32)?);
    }

    RecordBatch::try_new(schema.clone(), arrays)
}

/// Rescale raw timestamp values to nanoseconds.
///
/// The raw values are UTC whatever timezone the column declares, so they
/// are scaled directly instead of going through a timezone-aware cast.
fn timestamps_to_nanos(array: &dyn Array) -> Result<TimestampNanosecondArray, ArrowError> {
    match array.data_type() {
        DataType::Timestamp(unit, _) => {
            let factor = nanos_per_unit(*unit);
            match unit {
                TimeUnit::Second => scale_to_nanos::<TimestampSecondType>(array, factor),
                TimeUnit::Millisecond => scale_to_nanos::<TimestampMillisecondType>(array, factor),
                TimeUnit::Microsecond => scale_to_nanos::<TimestampMicrosecondType>(array, factor),
                TimeUnit::Nanosecond => scale_to_nanos::<TimestampNanosecondType>(array, factor),
            }
        }
        other => Err(ArrowError::CastError(format!(
            "time column has non-timestamp type {other}"
        ))),
    }
}

const fn nanos_per_unit(unit: TimeUnit) -> i64 {
    match unit {
        TimeUnit::Second => 1_000_000_000,
        TimeUnit::Millisecond => 1_000_000,
        TimeUnit::Microsecond => 1_000,
        TimeUnit::Nanosecond => 1,
    }
}

fn scale_to_nanos<T: ArrowTimestampType>(
    array: &dyn Array,
    factor: i64,
) -> Result<TimestampNanosecondArray, ArrowError> {
    array
        .as_primitive::<T>()
        .try_unary::<_, TimestampNanosecondType, _>(|value| {
            value.checked_mul(factor).ok_or_else(|| {
                ArrowError::ComputeError(format!("timestamp {value} overflows nanoseconds"))
            })
        })
}

/// Raw min and max of the time column from row-group statistics.
///
/// Returns `None` when any non-empty row group lacks them, so the caller
/// falls back to scanning.
fn min_max_from_stats(metadata: &ParquetMetaData, leaf: usize) -> Option<(i64, i64)> {
    let mut bounds = None;
    for rg in metadata.row_groups() {
        if rg.num_rows() == 0 {
            continue;
        }
        let Some(Statistics::Int64(stats)) = rg.column(leaf).statistics() else {
            return None;
        };
        bounds = widen(bounds, *stats.min_opt()?, *stats.max_opt()?);
    }
    bounds
}

fn widen(bounds: Option<(i64, i64)>, lo: i64, hi: i64) -> Option<(i64, i64)> {
    Some(match bounds {
        Some((min, max)) => (min.min(lo), max.max(hi)),
        None => (lo, hi),
    })
}

/// Stream the time column alone, one batch at a time.
fn time_column_reader(
    key: &str,
    builder: ParquetRecordBatchReaderBuilder<File>,
    ts_idx: usize,
) -> StoreResult<ParquetRecordBatchReader> {
    let projection = ProjectionMask::roots(builder.parquet_schema(), [ts_idx]);
    builder
        .with_projection(projection)
        .build()
        .context(ParquetSnafu { key })
}

fn collect_keys(dir: &Path, prefix: &str, out: &mut Vec<String>) -> StoreResult<()> {
    let io_path = || dir.display().to_string();
    let entries = fs::read_dir(dir).context(IoSnafu { path: io_path() })?;

    for entry in entries {
        let entry = entry.context(IoSnafu { path: io_path() })?;
        let path = entry.path();
        let file_type = entry.file_type().context(IoSnafu {
            path: path.display().to_string(),
        })?;

        if file_type.is_dir() {
            let name = entry.file_name().to_string_lossy().into_owned();
            collect_keys(&path, &join_key(prefix, &name), out)?;
        } else if path.extension() == Some(OsStr::new(TABLE_EXTENSION)) {
            if let Some(stem) = path.file_stem() {
                out.push(join_key(prefix, &stem.to_string_lossy()));
            }
        }
    }
    Ok(())
}

fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

impl ChunkStore for ParquetStore {
    fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        collect_keys(&self.root, "", &mut keys)?;
        keys.sort();
        Ok(keys)
    }

    fn window(&self) -> &Interval {
        &self.window
    }

    fn set_window(&mut self, window: Interval) {
        self.window = window;
    }

    fn memory_ceiling(&self) -> u64 {
        self.memory_ceiling
    }

    fn check_key(&self, key: &str) -> StoreResult<()> {
        self.open_table(key).map(drop)
    }

    fn column_names(&self, key: &str) -> StoreResult<Vec<ColumnId>> {
        let key = normalize_key(key);
        let builder = self.reader_builder(key)?;
        let schema = builder.schema();
        let ts_idx = self.time_index(key, schema)?;

        Ok(schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != ts_idx)
            .map(|(_, field)| ColumnId::from_field_name(field.name()))
            .collect())
    }

    fn date_range(&self, key: &str, apply_window: bool) -> StoreResult<Option<Interval>> {
        let key = normalize_key(key);
        let builder = self.reader_builder(key)?;
        let ts_idx = self.time_index(key, builder.schema())?;
        let unit = match builder.schema().field(ts_idx).data_type() {
            DataType::Timestamp(unit, _) => *unit,
            other => {
                return UnsupportedTimeTypeSnafu {
                    key,
                    column: &self.time_column,
                    datatype: other.clone(),
                }
                .fail();
            }
        };

        let from_stats = self
            .time_leaf(builder.parquet_schema())
            .and_then(|leaf| min_max_from_stats(builder.metadata(), leaf))
            .and_then(|(lo, hi)| {
                let factor = nanos_per_unit(unit);
                Some((lo.checked_mul(factor)?, hi.checked_mul(factor)?))
            });

        let bounds = match from_stats {
            Some(bounds) => Some(bounds),
            None => {
                debug!(key, "time column statistics unavailable, scanning");
                let mut bounds = None;
                for batch in time_column_reader(key, builder, ts_idx)? {
                    let batch = batch.context(ArrowSnafu { key })?;
                    let nanos =
                        timestamps_to_nanos(batch.column(0).as_ref()).context(ArrowSnafu { key })?;
                    for value in nanos.iter().flatten() {
                        bounds = widen(bounds, value, value);
                    }
                }
                bounds
            }
        };

        let Some((lo, hi)) = bounds else {
            return Ok(None);
        };
        let range = Interval::spanning(
            DateTime::from_timestamp_nanos(lo),
            DateTime::from_timestamp_nanos(hi),
        );
        Ok(if apply_window {
            range.overlap(&self.window)
        } else {
            Some(range)
        })
    }

    fn row_count(&self, key: &str, interval: &Interval) -> StoreResult<u64> {
        let key = normalize_key(key);
        let Some(effective) = interval.overlap(&self.window) else {
            return Ok(0);
        };

        let builder = self.reader_builder(key)?;
        if !effective.is_bounded() {
            let rows = builder.metadata().file_metadata().num_rows();
            return Ok(u64::try_from(rows).unwrap_or(0));
        }

        let ts_idx = self.time_index(key, builder.schema())?;
        let filter = TimeFilter::new(
            key,
            &self.time_column,
            builder.schema().field(ts_idx).data_type(),
            &effective.query_bounds(),
        )?;

        let mut rows = 0_u64;
        for batch in time_column_reader(key, builder, ts_idx)? {
            let batch = batch.context(ArrowSnafu { key })?;
            let mask = time_mask(batch.column(0).as_ref(), &filter).context(ArrowSnafu { key })?;
            rows += mask.true_count() as u64;
        }
        Ok(rows)
    }

    fn read_range(
        &self,
        key: &str,
        columns: &[ColumnId],
        effective: &Interval,
    ) -> StoreResult<Chunk> {
        self.scan(key, columns, effective)
    }
}
