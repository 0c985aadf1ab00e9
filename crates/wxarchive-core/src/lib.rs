//! Core types and traits for wxarchive storage backends.
//!
//! This crate provides the `StorageDriver` and `ArchiveStore` traits and all
//! associated types, enabling pluggable storage engines in separate crates.

pub mod descriptor;
pub mod models;
pub mod storage;

// Re-export key types at crate root for convenience
pub use descriptor::BackendDescriptor;
pub use models::{
    AggregateFn, ArchiveRecord, CoercionError, Schema, SchemaColumn, SchemaError, StorageType,
    TimeSpan, UnitSystem, UnknownUnitSystem, Value,
};
pub use models::summary::{DayAggregate, DaySummary};
pub use storage::{ArchiveStore, PagedRecords, RecordStream, StorageDriver, StorageError};
