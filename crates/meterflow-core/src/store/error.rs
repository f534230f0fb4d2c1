//! Error types and SNAFU context selectors for `store`.
//!
//! The first three variants are the store's public contract (`UnknownKey`,
//! `UnknownColumn`, `MemoryBudgetExceeded`); the rest wrap failures of the
//! concrete backend. None of them is retried automatically.

use std::io;

use arrow::{datatypes::DataType, error::ArrowError};
use chrono::{DateTime, Utc};
use parquet::errors::ParquetError;
use snafu::{Backtrace, prelude::*};

use crate::chunk::{ChunkError, ColumnId};

/// General result type used by store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from chunk store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// The key does not address a table in this store.
    #[snafu(display("Key {key} not in store"))]
    UnknownKey {
        /// The key that was looked up.
        key: String,
    },

    /// A requested column is not part of the table.
    #[snafu(display("Column {column} is not a valid column of {key}"))]
    UnknownColumn {
        /// Table key.
        key: String,
        /// The missing column.
        column: ColumnId,
    },

    /// The estimated size of a read is above the store's memory ceiling.
    #[snafu(display(
        "Requested data from {key} would use {estimated_bytes} bytes, above the ceiling of {ceiling_bytes} bytes"
    ))]
    MemoryBudgetExceeded {
        /// Table key.
        key: String,
        /// Estimated bytes for the rejected read.
        estimated_bytes: u64,
        /// Ceiling configured on the store.
        ceiling_bytes: u64,
    },

    /// A local filesystem I/O error.
    #[snafu(display("Local I/O error at {path}: {source}"))]
    Io {
        /// The path where the I/O error occurred.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Parquet decoding or encoding failed.
    #[snafu(display("Parquet error on {key}: {source}"))]
    Parquet {
        /// Table key.
        key: String,
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Arrow compute or conversion failed while materializing a chunk.
    #[snafu(display("Arrow error on {key}: {source}"))]
    Arrow {
        /// Table key.
        key: String,
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// The table does not contain the configured time column.
    #[snafu(display("Missing time column {column} in {key}"))]
    MissingTimeColumn {
        /// Table key.
        key: String,
        /// Configured time column name.
        column: String,
    },

    /// The time column exists but is not an Arrow timestamp.
    #[snafu(display("Unsupported time column {column} in {key} with type {datatype:?}"))]
    UnsupportedTimeType {
        /// Table key.
        key: String,
        /// Time column name.
        column: String,
        /// Arrow data type found for the time column.
        datatype: DataType,
    },

    /// A data column cannot be represented as `Float32`.
    #[snafu(display("Unsupported data column {column} in {key} with type {datatype:?}"))]
    UnsupportedColumnType {
        /// Table key.
        key: String,
        /// Field name of the column.
        column: String,
        /// Arrow data type found for the column.
        datatype: DataType,
    },

    /// Converting a bound to the time column's unit would overflow `i64`.
    #[snafu(display("Timestamp conversion overflow for {key} (value: {timestamp})"))]
    TimeConversionOverflow {
        /// Table key.
        key: String,
        /// The bound that could not be represented.
        timestamp: DateTime<Utc>,
    },

    /// Writing would replace an existing table.
    #[snafu(display("Table {key} already exists"))]
    TableExists {
        /// Table key.
        key: String,
    },

    /// Data handed to a writer does not describe a valid table.
    #[snafu(display("Invalid table data for {key}: {message}"))]
    InvalidTableData {
        /// Table key.
        key: String,
        /// What is wrong with the data.
        message: String,
    },

    /// Store configuration could not be parsed.
    #[snafu(display("Invalid store configuration: {source}"))]
    InvalidConfig {
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The materialized data does not have the chunk shape.
    #[snafu(display("Chunk assembly failed for {key}: {source}"))]
    Chunk {
        /// Table key.
        key: String,
        /// Underlying chunk error.
        source: ChunkError,
    },
}
