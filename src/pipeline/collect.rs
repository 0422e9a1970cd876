// src/pipeline/collect.rs

//! Collection strategies.
//!
//! One `Collector` serves every source kind through a single `collect`
//! entry point; the kinds are dispatch variants over shared machinery
//! (conditional fetcher, splitter, listing crawler), not a hierarchy.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use regex::Regex;

use crate::error::Result;
use crate::models::{CrawlStop, Fetched, FetchedDocument, Record, SourceConfig, SourceKind};
use crate::services::{ConditionalFetcher, EntryHandler, ListingCrawler, extract_links, split};
use crate::storage::{ArchiveStore, MetadataStore, RecordSink};

/// What one source's collection accomplished.
#[derive(Debug, Default)]
pub struct CollectOutcome {
    /// Records handed to the downstream sink
    pub forwarded: usize,
    /// Terminal crawl status, for listing-shaped sources
    pub stop: Option<CrawlStop>,
}

/// Executes the per-kind collection strategies.
pub struct Collector {
    fetcher: ConditionalFetcher,
    sink: Arc<dyn RecordSink>,
    archive: Option<Arc<dyn ArchiveStore>>,
}

impl Collector {
    pub fn new(
        fetcher: ConditionalFetcher,
        sink: Arc<dyn RecordSink>,
        archive: Option<Arc<dyn ArchiveStore>>,
    ) -> Self {
        Self {
            fetcher,
            sink,
            archive,
        }
    }

    /// Shared handle to the metadata store.
    pub fn store(&self) -> &Arc<MetadataStore> {
        self.fetcher.store()
    }

    /// Run this source's strategy once.
    pub async fn collect(&self, source: &SourceConfig) -> Result<CollectOutcome> {
        match source.kind {
            SourceKind::Page => self.collect_page(source).await,
            SourceKind::Feed => self.collect_feed(source).await,
            SourceKind::Listing => self.collect_listing(source).await,
            SourceKind::Tabbed => self.collect_tabbed(source).await,
        }
    }

    /// Conditional fetch of one URL, honoring the source's force flag.
    async fn fetch_checked(&self, url: &str, source: &SourceConfig) -> Result<Fetched> {
        if !source.force_collect && !self.fetcher.needs_fetch(url).await? {
            return Ok(Fetched::Unchanged);
        }
        self.fetcher.fetch(url, source.force_collect).await
    }

    fn content_type(doc: &FetchedDocument, source: &SourceConfig) -> String {
        if doc.content_type.is_empty() {
            source.content_type.clone()
        } else {
            doc.content_type.clone()
        }
    }

    /// Forward one record and fold the sink's correlation id back into the
    /// stored metadata under `meta_key`.
    async fn forward(&self, record: Record, meta_key: &str) -> Result<String> {
        let correlation_id = self.sink.forward(&record).await?;
        self.store().record_correlation(meta_key, &correlation_id)?;
        Ok(correlation_id)
    }

    async fn maybe_archive(&self, payload: &[u8], content_type: &str, url: &str) {
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.archive(payload, content_type).await {
                // Archival is best-effort; collection continues.
                log::warn!("Archive failed for {url}: {e}");
            }
        }
    }

    /// Fetch one page and forward it whole when changed. Returns how many
    /// records went downstream (0 or 1).
    async fn collect_one_page(&self, url: &str, source: &SourceConfig) -> Result<usize> {
        match self.fetch_checked(url, source).await? {
            Fetched::New(doc) => {
                let content_type = Self::content_type(&doc, source);
                self.maybe_archive(&doc.body, &content_type, url).await;
                self.forward(Record::new(doc.body, url, content_type), url)
                    .await?;
                Ok(1)
            }
            Fetched::Unchanged => Ok(0),
            Fetched::Failed { reason } => {
                log::warn!("Skipping {url} this cycle: {reason}");
                Ok(0)
            }
        }
    }

    async fn collect_page(&self, source: &SourceConfig) -> Result<CollectOutcome> {
        let forwarded = self.collect_one_page(&source.uri, source).await?;
        Ok(CollectOutcome {
            forwarded,
            stop: None,
        })
    }

    /// Fetch a composite feed and forward each split record independently,
    /// so downstream storage and change detection are per-record.
    async fn collect_feed(&self, source: &SourceConfig) -> Result<CollectOutcome> {
        let doc = match self.fetch_checked(&source.uri, source).await? {
            Fetched::New(doc) => doc,
            Fetched::Unchanged => return Ok(CollectOutcome::default()),
            Fetched::Failed { reason } => {
                log::warn!("Skipping feed {} this cycle: {reason}", source.uri);
                return Ok(CollectOutcome::default());
            }
        };

        let content_type = Self::content_type(&doc, source);
        self.maybe_archive(&doc.body, &content_type, &source.uri).await;

        let mut forwarded = 0usize;
        let mut last_correlation = None;
        for record in split(
            &doc.body,
            &source.root_tag,
            &source.record_tag,
            &source.record_id_attr,
        ) {
            let record = record.into_record(&source.uri, &content_type);
            last_correlation = Some(self.sink.forward(&record).await?);
            forwarded += 1;
        }
        if let Some(correlation_id) = last_correlation {
            self.store().record_correlation(&source.uri, &correlation_id)?;
        }

        log::info!("Feed {} yielded {forwarded} records", source.uri);
        Ok(CollectOutcome {
            forwarded,
            stop: None,
        })
    }

    /// Walk a paginated listing, collecting each entry as a single page.
    async fn collect_listing(&self, source: &SourceConfig) -> Result<CollectOutcome> {
        let handler = PageEntryHandler {
            collector: self,
            source,
            forwarded: AtomicUsize::new(0),
        };
        let crawler = ListingCrawler::new(&self.fetcher);
        let stop = crawler.crawl(source, &handler).await?;
        log::info!("Listing {} stopped: {stop}", source.uri);
        Ok(CollectOutcome {
            forwarded: handler.forwarded.into_inner(),
            stop: Some(stop),
        })
    }

    /// Fetch an entry's detail tabs and aggregate their identifiers into
    /// one composite record; individual tab bodies are not forwarded.
    async fn collect_tabbed(&self, source: &SourceConfig) -> Result<CollectOutcome> {
        let Some(tab_pattern) = source.tab_regex.as_deref() else {
            log::error!("Tabbed source {} has no tab pattern configured", source.uri);
            return Ok(CollectOutcome {
                forwarded: 0,
                stop: Some(CrawlStop::InvalidPattern),
            });
        };
        let tab_re = match Regex::new(tab_pattern) {
            Ok(re) => re,
            Err(e) => {
                log::error!("Tabbed source {}: tab pattern does not compile: {e}", source.uri);
                return Ok(CollectOutcome {
                    forwarded: 0,
                    stop: Some(CrawlStop::InvalidPattern),
                });
            }
        };

        let doc = match self.fetch_checked(&source.uri, source).await? {
            Fetched::New(doc) => doc,
            Fetched::Unchanged => return Ok(CollectOutcome::default()),
            Fetched::Failed { reason } => {
                log::warn!("Skipping {} this cycle: {reason}", source.uri);
                return Ok(CollectOutcome::default());
            }
        };

        let content_type = Self::content_type(&doc, source);
        self.maybe_archive(&doc.body, &content_type, &source.uri).await;

        let mut parts = vec![self.part_entry(&source.uri)?];
        let body = String::from_utf8_lossy(&doc.body);
        for tab_url in extract_links(&body, &tab_re, &source.uri) {
            match self.fetcher.fetch(&tab_url, source.force_collect).await? {
                Fetched::New(tab_doc) => {
                    self.maybe_archive(&tab_doc.body, &content_type, &tab_url).await;
                    parts.push(self.part_entry(&tab_url)?);
                }
                // Unchanged tabs still belong to the composite.
                Fetched::Unchanged => parts.push(self.part_entry(&tab_url)?),
                Fetched::Failed { reason } => {
                    log::warn!("Tab {tab_url} failed: {reason}");
                }
            }
        }

        let payload = serde_json::to_vec_pretty(&serde_json::json!({
            "source": source.uri,
            "parts": parts,
        }))?;
        self.forward(
            Record::new(payload, &source.uri, "application/json"),
            &source.uri,
        )
        .await?;

        Ok(CollectOutcome {
            forwarded: 1,
            stop: None,
        })
    }

    /// One sub-part reference inside a composite record: the sub-page URL
    /// and its stored fingerprint.
    fn part_entry(&self, url: &str) -> Result<serde_json::Value> {
        let meta = self.store().get(url)?;
        Ok(serde_json::json!({
            "url": url,
            "fingerprint": meta.fingerprint,
        }))
    }
}

/// Listing entry handler that collects each entry as a single page.
struct PageEntryHandler<'a> {
    collector: &'a Collector,
    source: &'a SourceConfig,
    forwarded: AtomicUsize,
}

#[async_trait]
impl EntryHandler for PageEntryHandler<'_> {
    async fn handle(&self, entry_url: &str) -> Result<()> {
        let n = self.collector.collect_one_page(entry_url, self.source).await?;
        self.forwarded.fetch_add(n, Ordering::Relaxed);
        Ok(())
    }
}
