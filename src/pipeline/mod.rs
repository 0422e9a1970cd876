//! Pipeline entry points for collection runs.
//!
//! - `Collector`: per-kind collection strategies over shared machinery
//! - `run_cycle`: one bounded-concurrency pass over all configured sources

pub mod collect;
pub mod cycle;

pub use collect::{CollectOutcome, Collector};
pub use cycle::{CycleStats, run_cycle};
