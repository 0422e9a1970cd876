//! Persistence and downstream-boundary abstractions.
//!
//! Two concerns live here:
//! - `meta`: the durable per-source metadata store that makes change
//!   detection survive restarts
//! - `sink`: the forward/archive traits at the edge of the engine, plus
//!   file-backed implementations for local runs

pub mod meta;
pub mod sink;

// Re-export for convenience
pub use meta::MetadataStore;
pub use sink::{ArchiveStore, DirArchive, JsonlSink, MemorySink, RecordSink};
