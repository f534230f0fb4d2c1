//! In-memory chunks and column identifiers.
//!
//! A [`Chunk`] is one bounded slice of a time-indexed table. It wraps an
//! Arrow `RecordBatch` with a fixed shape:
//!
//! - column 0 is the timestamp index, named [`INDEX_COLUMN`], typed
//!   `Timestamp(Nanosecond, None)` and interpreted as UTC;
//! - every other column is `Float32` measurement data, named after its
//!   [`ColumnId`].
//!
//! Stores normalize whatever they read into this shape, so stages never
//! deal with timestamp units or integer-typed measurements.

use std::fmt;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float32Array, RecordBatch, TimestampNanosecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::error::ArrowError;
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::interval::Interval;

/// Name of the timestamp column in every chunk.
pub const INDEX_COLUMN: &str = "timestamp";

/// Data type of the timestamp column in every chunk.
pub const INDEX_DATA_TYPE: DataType = DataType::Timestamp(TimeUnit::Nanosecond, None);

const FIELD_SEPARATOR: char = ':';

/// Identifier of a measurement column: `(physical quantity, subtype)`.
///
/// For example `(power, active)` or `(voltage, "")`. On disk the pair is
/// stored as a single field name, `quantity:kind`, or just `quantity` when
/// the subtype is empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId {
    quantity: String,
    kind: String,
}

impl ColumnId {
    /// Build an identifier from its two parts.
    pub fn new(quantity: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            quantity: quantity.into(),
            kind: kind.into(),
        }
    }

    /// `(power, kind)`.
    pub fn power(kind: impl Into<String>) -> Self {
        Self::new("power", kind)
    }

    /// `(energy, kind)`.
    pub fn energy(kind: impl Into<String>) -> Self {
        Self::new("energy", kind)
    }

    /// Identifier of the timestamp index itself.
    pub fn index() -> Self {
        Self::new(INDEX_COLUMN, "")
    }

    /// Physical quantity, e.g. `power`.
    pub fn quantity(&self) -> &str {
        &self.quantity
    }

    /// Subtype, e.g. `active`; empty when the quantity has none.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// True for [`ColumnId::index`].
    pub fn is_index(&self) -> bool {
        self.quantity == INDEX_COLUMN && self.kind.is_empty()
    }

    /// Field name used in on-disk schemas and chunk batches.
    pub fn field_name(&self) -> String {
        if self.kind.is_empty() {
            self.quantity.clone()
        } else {
            format!("{}{FIELD_SEPARATOR}{}", self.quantity, self.kind)
        }
    }

    /// Inverse of [`ColumnId::field_name`].
    pub fn from_field_name(name: &str) -> Self {
        match name.split_once(FIELD_SEPARATOR) {
            Some((quantity, kind)) => Self::new(quantity, kind),
            None => Self::new(name, ""),
        }
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.quantity, self.kind)
    }
}

/// Which columns a read should return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ColumnSelection {
    /// Every data column of the table.
    #[default]
    All,
    /// Only the timestamp index.
    Index,
    /// The listed data columns, in the given order.
    Columns(Vec<ColumnId>),
}

impl ColumnSelection {
    /// Convenience constructor for [`ColumnSelection::Columns`].
    pub fn columns(ids: impl IntoIterator<Item = ColumnId>) -> Self {
        ColumnSelection::Columns(ids.into_iter().collect())
    }
}

/// Errors raised when a record batch does not have the chunk shape.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChunkError {
    /// Column 0 is missing, misnamed or not a nanosecond timestamp.
    #[snafu(display("Chunk index column must be {}: {}, found {found}", INDEX_COLUMN, INDEX_DATA_TYPE))]
    NotIndexed {
        /// Description of what was found instead.
        found: String,
    },

    /// A data column is not `Float32`.
    #[snafu(display("Chunk data column {column} must be Float32, found {datatype}"))]
    InvalidDataColumn {
        /// Field name of the offending column.
        column: String,
        /// Its actual Arrow type.
        datatype: DataType,
    },

    /// Arrow rejected the assembled batch.
    #[snafu(display("Arrow error while assembling chunk: {source}"))]
    Assemble {
        /// Underlying Arrow error.
        source: ArrowError,
    },
}

/// Arrow schema of a chunk holding `columns`.
pub fn chunk_schema(columns: &[ColumnId]) -> SchemaRef {
    let mut fields = Vec::with_capacity(columns.len() + 1);
    fields.push(Field::new(INDEX_COLUMN, INDEX_DATA_TYPE, false));
    fields.extend(
        columns
            .iter()
            .map(|id| Field::new(id.field_name(), DataType::Float32, true)),
    );
    Arc::new(Schema::new(fields))
}

/// One bounded, in-memory slice of a time-indexed table.
#[derive(Debug, Clone)]
pub struct Chunk {
    batch: RecordBatch,
    timestamps: TimestampNanosecondArray,
    period: Interval,
}

impl Chunk {
    /// Wrap a batch already in chunk shape.
    ///
    /// `period` is the interval the chunk was read for.
    pub fn try_new(batch: RecordBatch, period: Interval) -> Result<Self, ChunkError> {
        let schema = batch.schema();
        let index_field = schema.fields().first().context(NotIndexedSnafu {
            found: "no columns",
        })?;
        ensure!(
            index_field.name() == INDEX_COLUMN && index_field.data_type() == &INDEX_DATA_TYPE,
            NotIndexedSnafu {
                found: format!("{}: {}", index_field.name(), index_field.data_type()),
            }
        );

        for field in schema.fields().iter().skip(1) {
            ensure!(
                field.data_type() == &DataType::Float32,
                InvalidDataColumnSnafu {
                    column: field.name().clone(),
                    datatype: field.data_type().clone(),
                }
            );
        }

        let timestamps = batch
            .column(0)
            .as_primitive::<arrow::datatypes::TimestampNanosecondType>()
            .clone();

        Ok(Self {
            batch,
            timestamps,
            period,
        })
    }

    /// Assemble a chunk from raw nanosecond timestamps and data arrays.
    pub fn from_parts(
        timestamps: TimestampNanosecondArray,
        columns: Vec<(ColumnId, Float32Array)>,
        period: Interval,
    ) -> Result<Self, ChunkError> {
        let ids: Vec<ColumnId> = columns.iter().map(|(id, _)| id.clone()).collect();
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len() + 1);
        arrays.push(Arc::new(timestamps));
        arrays.extend(
            columns
                .into_iter()
                .map(|(_, values)| Arc::new(values) as ArrayRef),
        );
        let batch = RecordBatch::try_new(chunk_schema(&ids), arrays).context(AssembleSnafu)?;
        Self::try_new(batch, period)
    }

    /// A chunk with the given columns and no rows.
    pub fn empty(columns: &[ColumnId], period: Interval) -> Self {
        let batch = RecordBatch::new_empty(chunk_schema(columns));
        let timestamps = TimestampNanosecondArray::from(Vec::<i64>::new());
        Self {
            batch,
            timestamps,
            period,
        }
    }

    /// The underlying record batch.
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Consume the chunk, returning its record batch.
    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    /// Interval this chunk was read for.
    pub fn period(&self) -> &Interval {
        &self.period
    }

    /// Number of samples.
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// True when the chunk holds no samples.
    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    /// The timestamp index.
    pub fn timestamps(&self) -> &TimestampNanosecondArray {
        &self.timestamps
    }

    /// Timestamp of row `row`, if the row exists.
    pub fn timestamp(&self, row: usize) -> Option<DateTime<Utc>> {
        (row < self.timestamps.len() && self.timestamps.is_valid(row))
            .then(|| DateTime::from_timestamp_nanos(self.timestamps.value(row)))
    }

    /// First timestamp.
    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp(0)
    }

    /// Last timestamp.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.num_rows()
            .checked_sub(1)
            .and_then(|row| self.timestamp(row))
    }

    /// Closed interval from the first to the last timestamp.
    pub fn timespan(&self) -> Option<Interval> {
        Some(Interval::spanning(
            self.first_timestamp()?,
            self.last_timestamp()?,
        ))
    }

    /// Identifiers of the data columns, in batch order.
    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.batch
            .schema()
            .fields()
            .iter()
            .skip(1)
            .map(|field| ColumnId::from_field_name(field.name()))
            .collect()
    }

    /// True when the chunk carries `id`.
    pub fn has_column(&self, id: &ColumnId) -> bool {
        self.column(id).is_some()
    }

    /// Data column `id`, if present.
    pub fn column(&self, id: &ColumnId) -> Option<&Float32Array> {
        let idx = self.batch.schema().index_of(&id.field_name()).ok()?;
        if idx == 0 {
            return None;
        }
        self.batch.column(idx).as_any().downcast_ref::<Float32Array>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{TestResult, secs, sample_chunk};

    #[test]
    fn column_id_field_name_round_trip() {
        let active = ColumnId::power("active");
        assert_eq!(active.field_name(), "power:active");
        assert_eq!(ColumnId::from_field_name("power:active"), active);

        let voltage = ColumnId::new("voltage", "");
        assert_eq!(voltage.field_name(), "voltage");
        assert_eq!(ColumnId::from_field_name("voltage"), voltage);
        assert_eq!(voltage.to_string(), "(voltage, )");

        assert!(ColumnId::index().is_index());
        assert!(!active.is_index());
    }

    #[test]
    fn chunk_accessors() -> TestResult {
        let chunk = sample_chunk(&[0, 10, 20], &[1.0, 2.0, 3.0])?;

        assert_eq!(chunk.num_rows(), 3);
        assert_eq!(chunk.first_timestamp(), Some(secs(0)));
        assert_eq!(chunk.last_timestamp(), Some(secs(20)));
        assert_eq!(chunk.timespan(), Some(Interval::bounded(secs(0), secs(20))?));
        assert_eq!(chunk.column_ids(), vec![ColumnId::power("active")]);

        let active = chunk.column(&ColumnId::power("active")).expect("active");
        assert_eq!(&active.values()[..], &[1.0, 2.0, 3.0]);
        assert!(chunk.column(&ColumnId::power("reactive")).is_none());
        assert!(chunk.column(&ColumnId::index()).is_none());
        Ok(())
    }

    #[test]
    fn empty_chunk_has_schema_but_no_rows() {
        let chunk = Chunk::empty(&[ColumnId::power("active")], Interval::unbounded());
        assert!(chunk.is_empty());
        assert_eq!(chunk.batch().num_columns(), 2);
        assert_eq!(chunk.timespan(), None);
        assert_eq!(chunk.last_timestamp(), None);
    }

    #[test]
    fn try_new_rejects_non_float_data() -> TestResult {
        let schema = Arc::new(Schema::new(vec![
            Field::new(INDEX_COLUMN, INDEX_DATA_TYPE, false),
            Field::new("power:active", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(TimestampNanosecondArray::from(vec![0_i64])),
                Arc::new(arrow::array::Int64Array::from(vec![1_i64])),
            ],
        )?;

        let err = Chunk::try_new(batch, Interval::unbounded()).expect_err("int data column");
        assert!(matches!(err, ChunkError::InvalidDataColumn { .. }));
        Ok(())
    }

    #[test]
    fn try_new_rejects_missing_index() -> TestResult {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "power:active",
            DataType::Float32,
            false,
        )]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Float32Array::from(vec![1.0]))])?;

        let err = Chunk::try_new(batch, Interval::unbounded()).expect_err("no index");
        assert!(matches!(err, ChunkError::NotIndexed { .. }));
        Ok(())
    }
}
