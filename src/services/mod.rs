//! Service layer for the collection engine.
//!
//! This module contains the collection mechanics:
//! - Conditional fetching (`ConditionalFetcher`)
//! - Composite feed splitting (`split` / `FeedSplitter`)
//! - Pagination crawling (`ListingCrawler`)

mod fetcher;
mod listing;
mod splitter;

pub use fetcher::ConditionalFetcher;
pub use listing::{EntryHandler, ListingCrawler};
pub(crate) use listing::extract_links;
pub use splitter::{FeedSplitter, SplitRecord, split};
