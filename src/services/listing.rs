// src/services/listing.rs

//! Pagination crawl state machine.
//!
//! Walks a listing source page by page: fetch, extract entry links, dispatch
//! each entry to a per-entry collection step, follow the next-page link.
//! Listings are assumed newest-first, so the first already-seen entry ends
//! the whole chain.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::error::Result;
use crate::models::{CrawlStop, Fetched, SourceConfig};
use crate::services::fetcher::ConditionalFetcher;
use crate::utils;

/// Per-entry collection step, supplied by the orchestration layer.
#[async_trait]
pub trait EntryHandler: Send + Sync {
    async fn handle(&self, entry_url: &str) -> Result<()>;
}

/// Crawler for one source's pagination chain.
pub struct ListingCrawler<'a> {
    fetcher: &'a ConditionalFetcher,
}

impl<'a> ListingCrawler<'a> {
    pub fn new(fetcher: &'a ConditionalFetcher) -> Self {
        Self { fetcher }
    }

    /// Walk the chain until a terminal condition; returns why it stopped.
    ///
    /// Fatal store errors propagate; everything else resolves to a
    /// [`CrawlStop`] so one broken source never takes down the cycle.
    pub async fn crawl(
        &self,
        source: &SourceConfig,
        handler: &dyn EntryHandler,
    ) -> Result<CrawlStop> {
        let Some(entry_pattern) = source.entry_regex.as_deref() else {
            log::error!("Listing {} has no entry pattern configured", source.uri);
            return Ok(CrawlStop::InvalidPattern);
        };
        let entry_re = match Regex::new(entry_pattern) {
            Ok(re) => re,
            Err(e) => {
                log::error!("Listing {}: entry pattern does not compile: {e}", source.uri);
                return Ok(CrawlStop::InvalidPattern);
            }
        };
        let next_re = match source.next_page_regex.as_deref().map(Regex::new).transpose() {
            Ok(re) => re,
            Err(e) => {
                log::error!("Listing {}: next-page pattern does not compile: {e}", source.uri);
                return Ok(CrawlStop::InvalidPattern);
            }
        };

        let delay = Duration::from_millis(source.crawl_delay_ms);
        let mut page_url = source.uri.clone();
        let mut dispatched = 0usize;

        loop {
            // FetchPage
            if !source.force_collect && !self.fetcher.needs_fetch(&page_url).await? {
                log::debug!("Listing page {page_url} reports no change; ending chain");
                return Ok(CrawlStop::Empty);
            }
            let page = match self.fetcher.fetch(&page_url, source.force_collect).await? {
                Fetched::New(doc) => doc,
                Fetched::Unchanged => {
                    log::debug!("Listing page {page_url} unchanged; ending chain");
                    return Ok(CrawlStop::Empty);
                }
                Fetched::Failed { reason } => {
                    log::warn!("Listing page {page_url} failed: {reason}; ending chain");
                    return Ok(CrawlStop::Empty);
                }
            };
            let body = String::from_utf8_lossy(&page.body).into_owned();

            // ExtractEntries
            let entries = extract_links(&body, &entry_re, &page_url);
            if entries.is_empty() {
                return Ok(CrawlStop::Empty);
            }

            // FilterAndDispatchEntries: never start an entry beyond the quota.
            let take = match source.max_entries {
                Some(max) => max.saturating_sub(dispatched).min(entries.len()),
                None => entries.len(),
            };
            for entry_url in &entries[..take] {
                if !source.force_collect
                    && source.stop_on_repeat
                    && self.fetcher.store().contains(entry_url)?
                {
                    // Newest-first listing: everything after this is known.
                    log::info!(
                        "Listing {}: entry {entry_url} already recorded; stopping chain",
                        source.uri
                    );
                    return Ok(CrawlStop::Duplicate);
                }

                if let Err(e) = handler.handle(entry_url).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    log::warn!("Entry {entry_url} failed: {e}");
                }
                dispatched += 1;

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            if let Some(max) = source.max_entries {
                if dispatched >= max {
                    return Ok(CrawlStop::AtCap);
                }
            }

            // FindNextPage
            let next = next_re
                .as_ref()
                .and_then(|re| extract_links(&body, re, &page_url).into_iter().next());
            match next {
                Some(url) => {
                    log::debug!("Listing {}: following next page {url}", source.uri);
                    page_url = url;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                None => return Ok(CrawlStop::Empty),
            }
        }
    }
}

/// Apply a link pattern to a page body.
///
/// Each match contributes its first non-empty capture group, resolved
/// against the page URL when relative.
pub(crate) fn extract_links(body: &str, pattern: &Regex, base_url: &str) -> Vec<String> {
    pattern
        .captures_iter(body)
        .filter_map(|caps| {
            let group = caps
                .iter()
                .skip(1)
                .flatten()
                .find(|m| !m.as_str().is_empty())?;
            utils::resolve(base_url, group.as_str())
        })
        .collect()
}
