//! Core engine for chunked, memory-bounded processing of long time-series
//! recordings (for example, power-meter samples).
//!
//! This crate provides the foundational pieces for `meterflow`:
//!
//! - An interval algebra over optionally-unbounded time spans (`interval`).
//! - A chunk store abstraction serving time-windowed column slices from a
//!   persistent, column-oriented table under a per-request memory ceiling,
//!   with a Parquet-backed variant (`store`).
//! - A `Loader` binding a store, a table key and an optional mask
//!   (`loader`).
//! - Capability contracts validated against a closed schema (`schema`,
//!   `contract`), used by processing stages to declare what they require
//!   and what they guarantee (`stage`).
//! - Non-overlapping, time-indexed statistic accumulators (`results`).
//! - A linear `Pipeline` that pulls one chunk at a time through an ordered
//!   list of stages and merges every per-chunk statistic (`pipeline`).
//!
//! Everything is synchronous and single-threaded: the pipeline never asks
//! the store for chunk N+1 before chunk N has passed through every stage.
#![deny(missing_docs)]
pub mod chunk;
pub mod contract;
pub mod interval;
pub mod loader;
pub mod pipeline;
pub mod results;
pub mod schema;
pub mod stage;
pub mod store;

#[cfg(test)]
pub(crate) mod test_util;
