//! Chunked, memory-bounded access to column-oriented time-series tables.
//!
//! A store holds any number of tables, each addressed by a hierarchical,
//! `/`-delimited key such as `building1/utility/electric/meter4`. Every table
//! has a monotonically increasing timestamp index and a fixed set of
//! measurement columns.
//!
//! The [`ChunkStore`] trait splits responsibilities in two:
//!
//! - Backends implement the physical operations: listing keys, reading
//!   column names, counting rows, and one bounded range read
//!   ([`ChunkStore::read_range`]).
//! - The provided methods implement the store-agnostic policy on top:
//!   window intersection (an empty intersection is "no data", never an
//!   error), the memory estimate, the admission check against the ceiling,
//!   and lazy chunk generation.
//!
//! Backends must not keep a file or connection open between calls: each
//! physical operation acquires what it needs and releases it before
//! returning, on success and on error alike.

mod config;
mod error;
mod parquet;
mod time_filter;

use std::iter::FusedIterator;

use chrono::Duration;
use snafu::prelude::*;
use tracing::{debug, warn};

use crate::chunk::{Chunk, ColumnId, ColumnSelection};
use crate::interval::Interval;

pub use config::{DEFAULT_MEMORY_CEILING_BYTES, DEFAULT_TIME_COLUMN, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use parquet::ParquetStore;

use error::{MemoryBudgetExceededSnafu, UnknownColumnSnafu, UnknownKeySnafu};

/// Estimated bytes per data element.
pub const BYTES_PER_ELEMENT: u64 = 4;

/// Estimated bytes per timestamp.
pub const BYTES_PER_TIMESTAMP: u64 = 8;

/// Strip a leading `/` so `/building1/...` and `building1/...` address the
/// same table.
pub fn normalize_key(key: &str) -> &str {
    key.trim_start_matches('/')
}

/// A persistent, key-addressed store of column-oriented time-series tables.
pub trait ChunkStore {
    /// Every table key in the store, sorted.
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// The store-wide window applied to every read.
    fn window(&self) -> &Interval;

    /// Replace the store-wide window.
    fn set_window(&mut self, window: Interval);

    /// Reads estimated above this many bytes are rejected.
    fn memory_ceiling(&self) -> u64;

    /// Data columns of the table at `key`, in table order.
    fn column_names(&self, key: &str) -> StoreResult<Vec<ColumnId>>;

    /// First and last timestamp of the table, as a closed interval.
    ///
    /// With `apply_window` the range is intersected with the store window.
    /// `None` when the table is empty or lies entirely outside the window.
    fn date_range(&self, key: &str, apply_window: bool) -> StoreResult<Option<Interval>>;

    /// Rows whose timestamp lies in `interval ∩ window`.
    fn row_count(&self, key: &str, interval: &Interval) -> StoreResult<u64>;

    /// One bounded physical read.
    ///
    /// `effective` is already intersected with the window and `columns` is
    /// already validated against the table; rows with
    /// `start <= timestamp < end` are returned.
    fn read_range(&self, key: &str, columns: &[ColumnId], effective: &Interval)
    -> StoreResult<Chunk>;

    /// Fail with [`StoreError::UnknownKey`] unless `key` addresses a table.
    fn check_key(&self, key: &str) -> StoreResult<()> {
        let key = normalize_key(key);
        let known = self.keys()?.iter().any(|k| k == key);
        ensure!(known, UnknownKeySnafu { key });
        Ok(())
    }

    /// Resolve a selection into the concrete data columns to read.
    ///
    /// The index column is always read, so naming it explicitly is accepted
    /// and dropped here.
    fn resolve_columns(&self, key: &str, columns: &ColumnSelection) -> StoreResult<Vec<ColumnId>> {
        match columns {
            ColumnSelection::All => self.column_names(key),
            ColumnSelection::Index => {
                self.check_key(key)?;
                Ok(Vec::new())
            }
            ColumnSelection::Columns(requested) => {
                let available = self.column_names(key)?;
                let mut resolved = Vec::with_capacity(requested.len());
                for column in requested.iter().filter(|c| !c.is_index()) {
                    ensure!(
                        available.contains(column),
                        UnknownColumnSnafu {
                            key,
                            column: column.clone(),
                        }
                    );
                    resolved.push(column.clone());
                }
                Ok(resolved)
            }
        }
    }

    /// True when every column in `columns` belongs to the table (the index
    /// column included).
    fn column_has(&self, key: &str, columns: &[ColumnId]) -> StoreResult<bool> {
        let available = self.column_names(key)?;
        Ok(columns
            .iter()
            .all(|column| column.is_index() || available.contains(column)))
    }

    /// Estimated bytes needed to load `columns` over `interval ∩ window`:
    /// `rows × columns × 4 + rows × 8`.
    fn estimate_bytes(
        &self,
        key: &str,
        columns: &ColumnSelection,
        interval: &Interval,
    ) -> StoreResult<u64> {
        let ncols = self.resolve_columns(key, columns)?.len() as u64;
        let nrows = self.row_count(key, interval)?;
        let data = nrows.saturating_mul(ncols).saturating_mul(BYTES_PER_ELEMENT);
        let index = nrows.saturating_mul(BYTES_PER_TIMESTAMP);
        Ok(data.saturating_add(index))
    }

    /// Load `columns` for `interval ∩ window` as one chunk.
    ///
    /// An interval outside the window yields an empty chunk. A read whose
    /// estimate is strictly above [`ChunkStore::memory_ceiling`] fails with
    /// [`StoreError::MemoryBudgetExceeded`] before anything is read.
    fn load(&self, key: &str, columns: &ColumnSelection, interval: &Interval) -> StoreResult<Chunk> {
        let resolved = self.resolve_columns(key, columns)?;

        let Some(effective) = interval.overlap(self.window()) else {
            debug!(
                key,
                interval = %interval,
                window = %self.window(),
                "requested interval lies outside the store window"
            );
            return Ok(Chunk::empty(&resolved, *interval));
        };

        let estimated_bytes = self.estimate_bytes(key, columns, &effective)?;
        let ceiling_bytes = self.memory_ceiling();
        if estimated_bytes > ceiling_bytes {
            warn!(
                key,
                interval = %effective,
                estimated_bytes,
                ceiling_bytes,
                "rejecting read above memory ceiling"
            );
            return MemoryBudgetExceededSnafu {
                key,
                estimated_bytes,
                ceiling_bytes,
            }
            .fail();
        }

        debug!(
            key,
            interval = %effective,
            columns = resolved.len(),
            estimated_bytes,
            "loading chunk"
        );
        self.read_range(key, &resolved, &effective)
    }

    /// Lazily load one chunk per period.
    ///
    /// Without `periods` the whole table is loaded as a single period
    /// (the window still applies). Periods that resolve to an empty chunk
    /// are skipped. The returned iterator is finite and cannot be
    /// restarted; call `generator` again to re-read.
    fn generator(
        &self,
        key: &str,
        columns: ColumnSelection,
        periods: Option<Vec<Interval>>,
    ) -> StoreResult<Chunks<'_, Self>>
    where
        Self: Sized,
    {
        let key = normalize_key(key);
        self.check_key(key)?;

        let periods = match periods {
            Some(periods) => periods,
            None => self
                .date_range(key, true)?
                .and_then(|range| {
                    // Widen by one tick so the half-open read keeps the last sample.
                    let end = range.end()? + Duration::nanoseconds(1);
                    Interval::new(range.start(), Some(end)).ok()
                })
                .into_iter()
                .collect(),
        };

        Ok(Chunks::new(self, key, columns, periods))
    }
}

/// Lazy, finite sequence of chunks produced by [`ChunkStore::generator`].
///
/// Each item is loaded only when requested. After the first error the
/// iterator yields nothing more.
#[derive(Debug)]
pub struct Chunks<'a, S: ChunkStore + ?Sized> {
    store: &'a S,
    key: String,
    columns: ColumnSelection,
    periods: std::vec::IntoIter<Interval>,
    done: bool,
}

impl<'a, S: ChunkStore + ?Sized> Chunks<'a, S> {
    /// One chunk per entry of `periods`, in order.
    pub fn new(store: &'a S, key: &str, columns: ColumnSelection, periods: Vec<Interval>) -> Self {
        Self {
            store,
            key: normalize_key(key).to_string(),
            columns,
            periods: periods.into_iter(),
            done: false,
        }
    }

    /// Periods not yet visited.
    pub fn remaining_periods(&self) -> usize {
        self.periods.len()
    }
}

impl<S: ChunkStore + ?Sized> Iterator for Chunks<'_, S> {
    type Item = StoreResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        for period in self.periods.by_ref() {
            match self.store.load(&self.key, &self.columns, &period) {
                Ok(chunk) if chunk.is_empty() => {
                    debug!(key = %self.key, period = %period, "skipping empty period");
                }
                Ok(chunk) => return Some(Ok(chunk)),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }

        self.done = true;
        None
    }
}

impl<S: ChunkStore + ?Sized> FusedIterator for Chunks<'_, S> {}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::test_util::{TestResult, interval_secs, sample_chunk, secs};

    /// In-memory table of one-second samples with a read counter, used to
    /// observe what the provided methods do without touching disk.
    struct CountingStore {
        offsets: Vec<i64>,
        window: Interval,
        ceiling: u64,
        reads: Cell<usize>,
    }

    impl CountingStore {
        const KEY: &'static str = "building1/utility/electric/meter1";

        fn new(rows: i64) -> Self {
            Self {
                offsets: (0..rows).collect(),
                window: Interval::unbounded(),
                ceiling: DEFAULT_MEMORY_CEILING_BYTES,
                reads: Cell::new(0),
            }
        }
    }

    impl ChunkStore for CountingStore {
        fn keys(&self) -> StoreResult<Vec<String>> {
            Ok(vec![Self::KEY.to_string()])
        }

        fn window(&self) -> &Interval {
            &self.window
        }

        fn set_window(&mut self, window: Interval) {
            self.window = window;
        }

        fn memory_ceiling(&self) -> u64 {
            self.ceiling
        }

        fn column_names(&self, key: &str) -> StoreResult<Vec<ColumnId>> {
            self.check_key(key)?;
            Ok(vec![ColumnId::power("active"), ColumnId::new("voltage", "")])
        }

        fn date_range(&self, key: &str, apply_window: bool) -> StoreResult<Option<Interval>> {
            self.check_key(key)?;
            let range = match (self.offsets.first(), self.offsets.last()) {
                (Some(first), Some(last)) => Interval::spanning(secs(*first), secs(*last)),
                _ => return Ok(None),
            };
            Ok(if apply_window { range.overlap(&self.window) } else { Some(range) })
        }

        fn row_count(&self, key: &str, interval: &Interval) -> StoreResult<u64> {
            self.check_key(key)?;
            let Some(effective) = interval.overlap(&self.window) else {
                return Ok(0);
            };
            Ok(self
                .offsets
                .iter()
                .filter(|o| effective.contains(secs(**o)))
                .count() as u64)
        }

        fn read_range(
            &self,
            _key: &str,
            _columns: &[ColumnId],
            effective: &Interval,
        ) -> StoreResult<Chunk> {
            self.reads.set(self.reads.get() + 1);
            let offsets: Vec<i64> = self
                .offsets
                .iter()
                .copied()
                .filter(|o| effective.contains(secs(*o)))
                .collect();
            let values = vec![1.0; offsets.len()];
            Ok(sample_chunk(&offsets, &values).expect("fixture chunk"))
        }
    }

    #[test]
    fn estimate_is_rows_times_columns_plus_index() -> TestResult {
        let store = CountingStore::new(100);
        let key = CountingStore::KEY;

        assert_eq!(
            store.estimate_bytes(key, &ColumnSelection::All, &Interval::unbounded())?,
            100 * 2 * 4 + 100 * 8
        );
        assert_eq!(
            store.estimate_bytes(
                key,
                &ColumnSelection::columns([ColumnId::power("active")]),
                &interval_secs(10, 20),
            )?,
            10 * 4 + 10 * 8
        );
        assert_eq!(
            store.estimate_bytes(key, &ColumnSelection::Index, &Interval::unbounded())?,
            100 * 8
        );
        Ok(())
    }

    #[test]
    fn load_outside_window_is_empty_not_an_error() -> TestResult {
        let mut store = CountingStore::new(100);
        store.set_window(interval_secs(10, 20));

        let chunk = store.load(CountingStore::KEY, &ColumnSelection::All, &interval_secs(50, 60))?;
        assert!(chunk.is_empty());
        assert_eq!(chunk.column_ids().len(), 2);
        assert_eq!(store.reads.get(), 0);
        Ok(())
    }

    #[test]
    fn load_over_ceiling_fails_without_reading() {
        let mut store = CountingStore::new(100);
        // One column over all rows needs 100 * 4 + 100 * 8 = 1200 bytes.
        store.ceiling = 1199;

        let err = store
            .load(
                CountingStore::KEY,
                &ColumnSelection::columns([ColumnId::power("active")]),
                &Interval::unbounded(),
            )
            .expect_err("over ceiling");
        assert!(matches!(
            err,
            StoreError::MemoryBudgetExceeded {
                estimated_bytes: 1200,
                ceiling_bytes: 1199,
                ..
            }
        ));
        assert_eq!(store.reads.get(), 0);
    }

    #[test]
    fn load_exactly_at_ceiling_is_admitted() -> TestResult {
        let mut store = CountingStore::new(100);
        store.ceiling = 1200;

        let chunk = store.load(
            CountingStore::KEY,
            &ColumnSelection::columns([ColumnId::power("active")]),
            &Interval::unbounded(),
        )?;
        assert_eq!(chunk.num_rows(), 100);
        assert_eq!(store.reads.get(), 1);
        Ok(())
    }

    #[test]
    fn unknown_key_and_column_are_reported() {
        let store = CountingStore::new(10);

        let err = store
            .load("nope", &ColumnSelection::All, &Interval::unbounded())
            .expect_err("unknown key");
        assert!(matches!(err, StoreError::UnknownKey { .. }));

        let err = store
            .load(
                CountingStore::KEY,
                &ColumnSelection::columns([ColumnId::power("reactive")]),
                &Interval::unbounded(),
            )
            .expect_err("unknown column");
        assert!(matches!(err, StoreError::UnknownColumn { .. }));
    }

    #[test]
    fn column_has_accepts_index() -> TestResult {
        let store = CountingStore::new(10);
        let key = CountingStore::KEY;
        assert!(store.column_has(key, &[ColumnId::power("active"), ColumnId::index()])?);
        assert!(!store.column_has(key, &[ColumnId::power("reactive")])?);
        Ok(())
    }

    #[test]
    fn generator_skips_empty_periods_and_is_finite() -> TestResult {
        let mut store = CountingStore::new(100);
        store.set_window(interval_secs(0, 50));

        let periods = vec![
            interval_secs(0, 10),
            interval_secs(60, 70),
            interval_secs(40, 60),
        ];
        let mut chunks = store.generator(CountingStore::KEY, ColumnSelection::All, Some(periods))?;

        let first = chunks.next().expect("first chunk")?;
        assert_eq!(first.num_rows(), 10);
        let second = chunks.next().expect("second chunk")?;
        assert_eq!(second.first_timestamp(), Some(secs(40)));
        assert_eq!(second.last_timestamp(), Some(secs(49)));
        assert!(chunks.next().is_none());
        assert!(chunks.next().is_none());
        Ok(())
    }

    #[test]
    fn generator_default_period_keeps_last_sample() -> TestResult {
        let store = CountingStore::new(30);
        let chunks: Vec<Chunk> = store
            .generator(CountingStore::KEY, ColumnSelection::All, None)?
            .collect::<StoreResult<_>>()?;

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].num_rows(), 30);
        assert_eq!(chunks[0].last_timestamp(), Some(secs(29)));
        Ok(())
    }

    #[test]
    fn generator_stops_after_first_error() -> TestResult {
        let mut store = CountingStore::new(100);
        store.ceiling = 100;

        let mut chunks = store.generator(
            CountingStore::KEY,
            ColumnSelection::All,
            Some(vec![interval_secs(0, 1), interval_secs(0, 50), interval_secs(60, 61)]),
        )?;

        assert!(chunks.next().expect("small chunk").is_ok());
        assert!(matches!(
            chunks.next(),
            Some(Err(StoreError::MemoryBudgetExceeded { .. }))
        ));
        assert!(chunks.next().is_none());
        Ok(())
    }

    #[test]
    fn generator_rejects_unknown_key_up_front() {
        let store = CountingStore::new(10);
        assert!(matches!(
            store.generator("/missing", ColumnSelection::All, None),
            Err(StoreError::UnknownKey { .. })
        ));
    }
}
