// src/pipeline/cycle.rs

//! One collection cycle over all configured sources.
//!
//! Cycles for independent sources run concurrently, bounded by the worker
//! count; within one source all steps run sequentially. Recoverable
//! failures are logged per source; a store failure aborts the whole run so
//! the supervisor can restart against trustworthy state.

use futures::stream::{self, StreamExt};

use crate::error::Result;
use crate::models::Config;
use crate::pipeline::Collector;

/// Summary of a collection cycle.
#[derive(Debug, Default)]
pub struct CycleStats {
    /// Sources visited
    pub sources: usize,
    /// Records handed to the downstream sink
    pub forwarded: usize,
    /// Sources that failed with a recoverable error
    pub failures: usize,
}

/// Run one cycle and commit the metadata store at the end.
pub async fn run_cycle(config: &Config, collector: &Collector) -> Result<CycleStats> {
    let workers = config.engine.workers.clamp(1, 8);
    log::info!(
        "Starting collection cycle: {} sources, {workers} workers",
        config.sources.len()
    );

    let mut stats = CycleStats::default();
    let mut outcomes = stream::iter(&config.sources)
        .map(|source| async move { (source, collector.collect(source).await) })
        .buffer_unordered(workers);

    while let Some((source, result)) = outcomes.next().await {
        stats.sources += 1;
        match result {
            Ok(outcome) => {
                stats.forwarded += outcome.forwarded;
                log::debug!(
                    "Source {} forwarded {} record(s)",
                    source.uri,
                    outcome.forwarded
                );
            }
            Err(e) if e.is_fatal() => {
                log::error!("Aborting cycle on store failure at {}: {e}", source.uri);
                return Err(e);
            }
            Err(e) => {
                stats.failures += 1;
                log::warn!("Source {} failed this cycle: {e}", source.uri);
            }
        }
    }

    // Everything written this cycle becomes durable before we report done.
    collector.store().save()?;

    log::info!(
        "Cycle complete: {} sources, {} forwarded, {} failed",
        stats.sources,
        stats.forwarded,
        stats.failures
    );
    Ok(stats)
}
