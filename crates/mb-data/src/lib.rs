//! Table access for ModelBuilder.
//!
//! A [`TableReader`] materializes `database.table` into an in-memory
//! [`Dataset`]. [`Warehouse`] is the local implementation backed by Parquet
//! and CSV files.

pub mod dataset;
pub mod warehouse;

pub use dataset::*;
pub use warehouse::*;
