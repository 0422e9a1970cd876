//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Engine-wide HTTP, persistence and worker settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Collection sources
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.engine.user_agent.trim().is_empty() {
            return Err(AppError::validation("engine.user_agent is empty"));
        }
        if self.engine.timeout_secs == 0 {
            return Err(AppError::validation("engine.timeout_secs must be > 0"));
        }
        if !(1..=8).contains(&self.engine.workers) {
            return Err(AppError::validation("engine.workers must be in 1..=8"));
        }
        // Unknown checksum names must fail at startup, not mid-cycle.
        self.engine.checksum.parse::<crate::utils::ChecksumAlgorithm>()?;
        if self.sources.is_empty() {
            return Err(AppError::validation("No sources defined"));
        }
        for source in &self.sources {
            if source.uri.trim().is_empty() {
                return Err(AppError::validation("source.uri is empty"));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            sources: Vec::new(),
        }
    }
}

/// Engine-wide settings shared by every collection cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Concurrent source cycles (1..=8)
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// Directory for the metadata store
    #[serde(default = "defaults::store_path")]
    pub store_path: PathBuf,

    /// File the JSON-lines sink appends to
    #[serde(default = "defaults::sink_path")]
    pub sink_path: PathBuf,

    /// Optional directory for archiving raw payloads
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,

    /// Fingerprint algorithm name ("sha256" or "sha512")
    #[serde(default = "defaults::checksum")]
    pub checksum: String,

    /// Treat unclassified existence-check statuses as "fetch"
    #[serde(default = "defaults::fetch_on_ambiguous")]
    pub fetch_on_ambiguous: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            workers: defaults::workers(),
            store_path: defaults::store_path(),
            sink_path: defaults::sink_path(),
            archive_dir: None,
            checksum: defaults::checksum(),
            fetch_on_ambiguous: defaults::fetch_on_ambiguous(),
        }
    }
}

/// What shape of source a URI points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// One document, forwarded whole on change
    Page,
    /// One composite XML document split into per-entry records
    Feed,
    /// Paginated listing crawled entry by entry
    Listing,
    /// Several related sub-pages aggregated into one record
    Tabbed,
}

/// Per-source collection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source URI, the identity for change detection
    pub uri: String,

    /// Collection strategy for this source
    #[serde(default = "defaults::kind")]
    pub kind: SourceKind,

    /// Entry-link pattern for listings (first non-empty capture group)
    #[serde(default)]
    pub entry_regex: Option<String>,

    /// Next-page-link pattern for listings
    #[serde(default)]
    pub next_page_regex: Option<String>,

    /// Tab-link pattern for tabbed sources
    #[serde(default)]
    pub tab_regex: Option<String>,

    /// Record boundary element of a composite feed
    #[serde(default = "defaults::record_tag")]
    pub record_tag: String,

    /// Root wrapping element of a composite feed
    #[serde(default = "defaults::root_tag")]
    pub root_tag: String,

    /// Attribute identifying a feed record; entries without it are skipped
    #[serde(default = "defaults::record_id_attr")]
    pub record_id_attr: String,

    /// Entry quota for one pagination chain (unbounded when absent)
    #[serde(default)]
    pub max_entries: Option<usize>,

    /// Stop the chain at the first already-seen entry
    #[serde(default = "defaults::stop_on_repeat")]
    pub stop_on_repeat: bool,

    /// Collect regardless of stored change-detection state
    #[serde(default)]
    pub force_collect: bool,

    /// Pause between page fetches and entry dispatches
    #[serde(default)]
    pub crawl_delay_ms: u64,

    /// Content type recorded on forwarded records
    #[serde(default = "defaults::content_type")]
    pub content_type: String,
}

mod defaults {
    use std::path::PathBuf;

    use super::SourceKind;

    // Engine defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; harvester/1.0)".into()
    }
    pub fn timeout() -> u64 {
        15
    }
    pub fn workers() -> usize {
        2
    }
    pub fn store_path() -> PathBuf {
        PathBuf::from("storage/meta")
    }
    pub fn sink_path() -> PathBuf {
        PathBuf::from("storage/records.jsonl")
    }
    pub fn checksum() -> String {
        "sha256".into()
    }
    pub fn fetch_on_ambiguous() -> bool {
        true
    }

    // Source defaults
    pub fn kind() -> SourceKind {
        SourceKind::Page
    }
    pub fn record_tag() -> String {
        "entry".into()
    }
    pub fn root_tag() -> String {
        "feed".into()
    }
    pub fn record_id_attr() -> String {
        "id".into()
    }
    pub fn stop_on_repeat() -> bool {
        true
    }
    pub fn content_type() -> String {
        "text/html".into()
    }
}
