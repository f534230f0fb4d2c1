//! # meterflow
//!
//! Chunked, memory-bounded processing of long power-meter recordings.
//!
//! This crate is the supported public entry point and provides a small, stable surface.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use meterflow::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ParquetStore::open(StoreConfig::new("/data/ukdale"))?;
//! let loader = Loader::new(Arc::new(store), "building1/utility/electric/meter1");
//!
//! let mut pipeline = Pipeline::new(loader)
//!     .with_stage(BookendGapsStage::new(Duration::seconds(180)))
//!     .with_stage(EnergyStage::default());
//! pipeline.run()?;
//!
//! if let Some(energy) = pipeline.result("energy") {
//!     println!("{:?}", energy.combined());
//! }
//! # Ok(())
//! # }
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Processing stages (wrapper-only).
pub mod stage {
    pub use meterflow_core::stage::{
        BookendGapsStage, EnergyStage, JOULES_PER_KWH, LocateGapsStage, POWER_KINDS,
        ProcessingContext, Stage, StageError,
    };
}

/// Chunk stores (wrapper-only).
pub mod store {
    pub use meterflow_core::store::{
        BYTES_PER_ELEMENT, BYTES_PER_TIMESTAMP, ChunkStore, Chunks, DEFAULT_MEMORY_CEILING_BYTES,
        DEFAULT_TIME_COLUMN, ParquetStore, StoreConfig, StoreError, StoreResult,
    };
}

/// Time types used by intervals and stage settings.
pub use chrono::{DateTime, Duration, Utc};

pub use meterflow_core::chunk::{Chunk, ColumnId, ColumnSelection};
pub use meterflow_core::contract::{Capability, Contract};
pub use meterflow_core::interval::{Interval, IntervalError};
pub use meterflow_core::loader::Loader;
pub use meterflow_core::pipeline::{Pipeline, PipelineError, PipelineState};
pub use meterflow_core::results::{PeriodRecord, Results, ResultsError, StatisticKind};
pub use meterflow_core::schema::{SchemaError, Value, ValueKind};
