// src/models/mod.rs

//! Domain models for the collection engine.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod source;

// Re-export all public types
pub use config::{Config, EngineConfig, SourceConfig, SourceKind};
pub use source::{CrawlStop, Fetched, FetchedDocument, Record, SourceMetadata};
