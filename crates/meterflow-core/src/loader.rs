//! Binds a store, a table key and an optional period mask.

use std::sync::Arc;

use crate::chunk::ColumnSelection;
use crate::interval::Interval;
use crate::store::{ChunkStore, Chunks, StoreResult, normalize_key};

/// Source of chunks for one table.
///
/// The store is shared, so several loaders (or a loader and its caller) can
/// read from the same store. The mask, when set, lists the periods to load;
/// otherwise the whole table is loaded, subject to the store window.
#[derive(Debug)]
pub struct Loader<S: ChunkStore> {
    store: Arc<S>,
    key: String,
    mask: Option<Vec<Interval>>,
}

impl<S: ChunkStore> Clone for Loader<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
            mask: self.mask.clone(),
        }
    }
}

impl<S: ChunkStore> Loader<S> {
    /// Loader for the table at `key`.
    pub fn new(store: Arc<S>, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            store,
            key: normalize_key(&key).to_string(),
            mask: None,
        }
    }

    /// Only load the given periods, in order.
    pub fn with_mask(mut self, mask: Vec<Interval>) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Drop the mask so the whole table is loaded again.
    pub fn clear_mask(&mut self) {
        self.mask = None;
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Normalized table key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The period mask, if any.
    pub fn mask(&self) -> Option<&[Interval]> {
        self.mask.as_deref()
    }

    /// Lazily load `columns`, one chunk per mask period.
    pub fn load_chunks(&self, columns: ColumnSelection) -> StoreResult<Chunks<'_, S>> {
        self.store
            .generator(&self.key, columns, self.mask.clone())
    }
}
