//! FILENAME: rollup-engine/src/lib.rs
//! PURPOSE: Main library entry point for the rollup engine.
//! CONTEXT: Re-exports the aggregation operations built on the engine crate.

pub mod aggregate;
pub mod order;
pub mod parallel;

pub use aggregate::{aggregate, dyn_aggregate, rollup, UPDATE_INTERVAL};
pub use order::{check_hier, sort_alphabetical, sort_hierarchical};
pub use parallel::{aggregate_parallel, AggregationJob};
