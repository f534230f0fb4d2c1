//! Wrapper prelude.
//!
//! The `meterflow` crate is the supported public entry point. Downstream
//! code should prefer importing from this prelude instead of depending on
//! internal core module paths.

pub use crate::stage::{BookendGapsStage, EnergyStage, LocateGapsStage, Stage};
pub use crate::store::{ChunkStore, ParquetStore, StoreConfig, StoreError};
pub use crate::{
    Capability, Chunk, ColumnId, ColumnSelection, Contract, DateTime, Duration, Interval, Loader,
    Pipeline, PipelineError, Results, StatisticKind, Utc,
};
