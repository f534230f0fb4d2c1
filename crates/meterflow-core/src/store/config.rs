//! Store configuration.
//!
//! `StoreConfig` is plain data: it can be built in code or deserialized from
//! JSON (window bounds are RFC 3339 strings). Every field has a default, so a
//! config file only needs the keys it overrides:
//!
//! ```
//! use meterflow_core::store::StoreConfig;
//!
//! let config = StoreConfig::from_json_str(
//!     r#"{ "root": "/data/ukdale", "window": { "start": "2013-04-01T00:00:00Z" } }"#,
//! )
//! .unwrap();
//! assert_eq!(config.memory_ceiling_bytes, 1_000_000_000);
//! assert!(config.window.is_bounded());
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::interval::Interval;
use crate::store::error::{InvalidConfigSnafu, StoreResult};

/// Default per-request memory ceiling, in bytes.
pub const DEFAULT_MEMORY_CEILING_BYTES: u64 = 1_000_000_000;

/// Default name of the on-disk timestamp column.
pub const DEFAULT_TIME_COLUMN: &str = "timestamp";

/// Settings for opening a [`ParquetStore`](crate::store::ParquetStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory holding one Parquet file per table key.
    pub root: PathBuf,
    /// Store-wide window restricting every read.
    pub window: Interval,
    /// Reads whose estimate exceeds this many bytes are rejected.
    pub memory_ceiling_bytes: u64,
    /// Name of the timestamp column in every table file.
    pub time_column: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            window: Interval::unbounded(),
            memory_ceiling_bytes: DEFAULT_MEMORY_CEILING_BYTES,
            time_column: DEFAULT_TIME_COLUMN.to_string(),
        }
    }
}

impl StoreConfig {
    /// Defaults rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> StoreResult<Self> {
        serde_json::from_str(json).context(InvalidConfigSnafu)
    }
}
