//! Domain value types for change detection and forwarded records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted change-detection state for one source URI.
///
/// Every field always has a defined value; "no value yet" is the epoch
/// timestamp or the empty string, never an absent field. The record is
/// replaced wholesale on every confirmed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Last-Modified reported by the server on the last confirmed change
    #[serde(default = "epoch")]
    pub last_modified: DateTime<Utc>,

    /// Opaque cache validator (ETag), empty when the server sent none
    #[serde(default)]
    pub validator: String,

    /// Lowercase hex fingerprint of the last confirmed body
    #[serde(default)]
    pub fingerprint: String,

    /// Correlation id returned by the downstream sink, for traceability
    #[serde(default)]
    pub correlation_id: String,
}

impl Default for SourceMetadata {
    fn default() -> Self {
        Self {
            last_modified: epoch(),
            validator: String::new(),
            fingerprint: String::new(),
            correlation_id: String::new(),
        }
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Outcome of one conditional fetch.
#[derive(Debug)]
pub enum Fetched {
    /// Confirmed new or changed content
    New(FetchedDocument),
    /// Server headers or the stored fingerprint say nothing changed
    Unchanged,
    /// Transport failed; stored metadata was not touched
    Failed {
        /// Error description for the log
        reason: String,
    },
}

/// Body and response context of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Full response body
    pub body: Vec<u8>,
    /// Content-Type header value, empty when absent
    pub content_type: String,
    /// URL after following redirects
    pub final_url: String,
}

/// Terminal classification of one pagination chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStop {
    /// No page content, no entries, or no further pages
    Empty,
    /// Entry quota reached
    AtCap,
    /// An already-seen entry was encountered
    Duplicate,
    /// The required entry pattern was missing
    InvalidPattern,
}

impl CrawlStop {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::AtCap => "at_cap",
            Self::Duplicate => "duplicate",
            Self::InvalidPattern => "invalid_pattern",
        }
    }
}

impl fmt::Display for CrawlStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit handed to the downstream sink. Immutable once produced.
#[derive(Debug, Clone)]
pub struct Record {
    /// Raw content bytes
    pub payload: Vec<u8>,
    /// Identity of the source (or sub-record) that produced this
    pub source_id: String,
    /// Production time
    pub timestamp: DateTime<Utc>,
    /// Content type of the payload
    pub content_type: String,
}

impl Record {
    /// Build a record stamped with the current time.
    pub fn new(payload: Vec<u8>, source_id: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            payload,
            source_id: source_id.into(),
            timestamp: Utc::now(),
            content_type: content_type.into(),
        }
    }
}
