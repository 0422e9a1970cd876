// src/services/fetcher.rs

//! Conditional fetching with durable change detection.
//!
//! Every request carries caching hints derived from the metadata store
//! (`If-Modified-Since` from the stored timestamp, `If-None-Match` from the
//! stored validator). The body fingerprint is the authoritative change
//! signal; headers only short-circuit the work.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::error::Result;
use crate::models::{Fetched, FetchedDocument, SourceMetadata};
use crate::storage::MetadataStore;
use crate::utils::{ChecksumAlgorithm, fingerprint};

/// What the existence-check status code says about a full fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Precheck {
    /// Content is (or may be) new; fetch it
    Fetch,
    /// No new content, or the resource will not be retrievable
    Skip,
    /// Not explicitly classified
    Ambiguous,
}

/// Fixed three-way classification of an existence-check status.
fn classify_status(status: StatusCode) -> Precheck {
    match status.as_u16() {
        // Success family, and redirects that will resolve to content.
        200..=206 => Precheck::Fetch,
        301 | 302 | 307 | 308 => Precheck::Fetch,
        // The condition could not be evaluated server-side.
        408 | 500 | 504 => Precheck::Fetch,

        // Nothing new behind these.
        304 | 303 | 305 => Precheck::Skip,
        400 | 401 | 402 | 403 | 404 | 405 | 406 | 410 | 414 => Precheck::Skip,
        501 | 502 | 503 | 505 => Precheck::Skip,

        // Conflict, precondition-failed and friends.
        _ => Precheck::Ambiguous,
    }
}

/// HTTP-date rendering for conditional request headers.
fn http_date(ts: DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Fetcher that consults and maintains per-source metadata.
pub struct ConditionalFetcher {
    client: Client,
    store: Arc<MetadataStore>,
    algorithm: ChecksumAlgorithm,
    fetch_on_ambiguous: bool,
}

impl ConditionalFetcher {
    pub fn new(
        client: Client,
        store: Arc<MetadataStore>,
        algorithm: ChecksumAlgorithm,
        fetch_on_ambiguous: bool,
    ) -> Self {
        Self {
            client,
            store,
            algorithm,
            fetch_on_ambiguous,
        }
    }

    /// Shared handle to the metadata store.
    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    fn with_conditions(&self, request: RequestBuilder, meta: &SourceMetadata) -> RequestBuilder {
        let mut request = request.header(IF_MODIFIED_SINCE, http_date(meta.last_modified));
        if !meta.validator.is_empty() {
            request = request.header(IF_NONE_MATCH, meta.validator.clone());
        }
        request
    }

    /// Lightweight existence check: is a full fetch worthwhile?
    ///
    /// Store failures propagate; a transport failure here answers "yes" and
    /// lets the full fetch report the real error.
    pub async fn needs_fetch(&self, source_id: &str) -> Result<bool> {
        let meta = self.store.get(source_id)?;
        let request = self.with_conditions(self.client.head(source_id), &meta);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Existence check failed for {source_id}: {e}");
                return Ok(true);
            }
        };

        let decision = match classify_status(response.status()) {
            Precheck::Fetch => true,
            Precheck::Skip => false,
            // Missing a change is worse than one wasted request.
            Precheck::Ambiguous => self.fetch_on_ambiguous,
        };
        log::debug!(
            "Existence check for {source_id}: HTTP {} -> fetch={decision}",
            response.status().as_u16()
        );
        Ok(decision)
    }

    /// Full retrieval with change detection.
    ///
    /// With `force` set, conditional hints are omitted and an unchanged
    /// fingerprint still yields the body, so forced collections re-deliver
    /// known content without disturbing stored state.
    pub async fn fetch(&self, source_id: &str, force: bool) -> Result<Fetched> {
        let prior = self.store.get(source_id)?;

        let mut request = self.client.get(source_id);
        if !force {
            request = self.with_conditions(request, &prior);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Fetch failed for {source_id}: {e}");
                return Ok(Fetched::Failed {
                    reason: e.to_string(),
                });
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            // The pre-check can pass while the real request still reports
            // no change; skip without touching the body.
            return Ok(Fetched::Unchanged);
        }
        if !status.is_success() {
            log::warn!("Fetch for {source_id} returned HTTP {}", status.as_u16());
            return Ok(Fetched::Failed {
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let final_url = response.url().to_string();
        let (last_modified, validator, content_type) = response_metadata(&response);

        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                log::warn!("Body read failed for {source_id}: {e}");
                return Ok(Fetched::Failed {
                    reason: e.to_string(),
                });
            }
        };

        let candidate = SourceMetadata {
            last_modified,
            validator,
            fingerprint: fingerprint(self.algorithm, &body),
            // Preserved until the sink reports a fresh correlation id.
            correlation_id: prior.correlation_id,
        };

        let changed = self.store.update_if_changed(source_id, &candidate)?;
        if changed && !final_url.eq_ignore_ascii_case(source_id) {
            // A later direct fetch of the redirect target should also see
            // this content as already known.
            self.store.put(&final_url, &candidate)?;
        }

        if changed || force {
            Ok(Fetched::New(FetchedDocument {
                body,
                content_type,
                final_url,
            }))
        } else {
            log::debug!("Unchanged fingerprint for {source_id}; body discarded");
            Ok(Fetched::Unchanged)
        }
    }
}

/// Pull change-detection fields out of a response.
///
/// Absent or unparseable `Last-Modified` defaults to now; absent `ETag` is
/// the empty string, never null.
fn response_metadata(response: &Response) -> (DateTime<Utc>, String, String) {
    let last_modified = response
        .headers()
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let validator = response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    (last_modified, validator, content_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_fetcher(store: Arc<MetadataStore>) -> ConditionalFetcher {
        ConditionalFetcher::new(
            Client::new(),
            store,
            ChecksumAlgorithm::Sha256,
            true,
        )
    }

    #[test]
    fn test_classify_skip_codes() {
        for code in [304, 303, 305, 401, 403, 404, 410, 502, 503] {
            assert_eq!(
                classify_status(StatusCode::from_u16(code).unwrap()),
                Precheck::Skip,
                "HTTP {code}"
            );
        }
    }

    #[test]
    fn test_classify_fetch_codes() {
        for code in [200, 202, 206, 301, 302, 307, 308, 408, 500, 504] {
            assert_eq!(
                classify_status(StatusCode::from_u16(code).unwrap()),
                Precheck::Fetch,
                "HTTP {code}"
            );
        }
    }

    #[test]
    fn test_classify_ambiguous_codes() {
        for code in [409, 412, 416, 418] {
            assert_eq!(
                classify_status(StatusCode::from_u16(code).unwrap()),
                Precheck::Ambiguous,
                "HTTP {code}"
            );
        }
    }

    #[test]
    fn test_http_date_format() {
        assert_eq!(
            http_date(DateTime::<Utc>::UNIX_EPOCH),
            "Thu, 01 Jan 1970 00:00:00 GMT"
        );
    }

    #[tokio::test]
    async fn test_needs_fetch_sends_conditional_hints() {
        let server = MockServer::start().await;
        let store = Arc::new(MetadataStore::temporary().unwrap());
        let url = format!("{}/page", server.uri());

        store
            .put(
                &url,
                &SourceMetadata {
                    validator: "\"v1\"".to_string(),
                    fingerprint: "fp".to_string(),
                    ..SourceMetadata::default()
                },
            )
            .unwrap();

        Mock::given(method("HEAD"))
            .and(path("/page"))
            .and(header_exists("if-modified-since"))
            .and(header("if-none-match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = test_fetcher(store);
        assert!(!fetcher.needs_fetch(&url).await.unwrap());
    }

    #[tokio::test]
    async fn test_needs_fetch_true_on_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = Arc::new(MetadataStore::temporary().unwrap());
        let fetcher = test_fetcher(store);
        assert!(fetcher.needs_fetch(&format!("{}/page", server.uri())).await.unwrap());
    }

    #[tokio::test]
    async fn test_ambiguous_status_respects_config() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;
        let url = format!("{}/page", server.uri());

        let store = Arc::new(MetadataStore::temporary().unwrap());
        let eager = test_fetcher(Arc::clone(&store));
        assert!(eager.needs_fetch(&url).await.unwrap());

        let cautious =
            ConditionalFetcher::new(Client::new(), store, ChecksumAlgorithm::Sha256, false);
        assert!(!cautious.needs_fetch(&url).await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_new_content_updates_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"<doc>v1</doc>".to_vec())
                    .insert_header("etag", "\"v1\"")
                    .insert_header("last-modified", "Wed, 01 Jan 2025 00:00:00 GMT")
                    .insert_header("content-type", "text/xml"),
            )
            .mount(&server)
            .await;

        let store = Arc::new(MetadataStore::temporary().unwrap());
        let fetcher = test_fetcher(Arc::clone(&store));
        let url = format!("{}/doc", server.uri());

        match fetcher.fetch(&url, false).await.unwrap() {
            Fetched::New(doc) => {
                assert_eq!(doc.body, b"<doc>v1</doc>");
                assert_eq!(doc.content_type, "text/xml");
            }
            other => panic!("expected New, got {other:?}"),
        }

        let meta = store.get(&url).unwrap();
        assert_eq!(meta.validator, "\"v1\"");
        assert_eq!(
            meta.fingerprint,
            fingerprint(ChecksumAlgorithm::Sha256, b"<doc>v1</doc>")
        );
        assert_eq!(
            meta.last_modified,
            DateTime::parse_from_rfc2822("Wed, 01 Jan 2025 00:00:00 GMT")
                .unwrap()
                .with_timezone(&Utc)
        );
    }

    #[tokio::test]
    async fn test_unchanged_fetch_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"stable content".to_vec())
                    .insert_header("last-modified", "Wed, 01 Jan 2025 00:00:00 GMT"),
            )
            .mount(&server)
            .await;

        let store = Arc::new(MetadataStore::temporary().unwrap());
        let fetcher = test_fetcher(Arc::clone(&store));
        let url = format!("{}/doc", server.uri());

        assert!(matches!(fetcher.fetch(&url, false).await.unwrap(), Fetched::New(_)));
        let after_first = store.get(&url).unwrap();

        // Same body: decision is Unchanged, stored metadata identical.
        assert!(matches!(
            fetcher.fetch(&url, false).await.unwrap(),
            Fetched::Unchanged
        ));
        assert_eq!(store.get(&url).unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_server_not_modified_skips_fingerprint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let store = Arc::new(MetadataStore::temporary().unwrap());
        let fetcher = test_fetcher(Arc::clone(&store));
        let url = format!("{}/doc", server.uri());

        assert!(matches!(
            fetcher.fetch(&url, false).await.unwrap(),
            Fetched::Unchanged
        ));
        // Nothing was recorded for a skipped fetch.
        assert!(!store.contains(&url).unwrap());
    }

    #[tokio::test]
    async fn test_force_redelivers_unchanged_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"same".to_vec()))
            .mount(&server)
            .await;

        let store = Arc::new(MetadataStore::temporary().unwrap());
        let fetcher = test_fetcher(Arc::clone(&store));
        let url = format!("{}/doc", server.uri());

        assert!(matches!(fetcher.fetch(&url, true).await.unwrap(), Fetched::New(_)));
        assert!(matches!(fetcher.fetch(&url, true).await.unwrap(), Fetched::New(_)));
    }

    #[tokio::test]
    async fn test_redirect_target_gets_metadata_too() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", "/new"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"moved".to_vec()))
            .mount(&server)
            .await;

        let store = Arc::new(MetadataStore::temporary().unwrap());
        let fetcher = test_fetcher(Arc::clone(&store));
        let old = format!("{}/old", server.uri());
        let new = format!("{}/new", server.uri());

        match fetcher.fetch(&old, false).await.unwrap() {
            Fetched::New(doc) => assert_eq!(doc.final_url, new),
            other => panic!("expected New, got {other:?}"),
        }
        assert!(store.contains(&old).unwrap());
        assert!(store.contains(&new).unwrap());
        assert_eq!(
            store.get(&old).unwrap().fingerprint,
            store.get(&new).unwrap().fingerprint
        );
    }

    #[tokio::test]
    async fn test_transport_error_leaves_store_untouched() {
        let store = Arc::new(MetadataStore::temporary().unwrap());
        let fetcher = test_fetcher(Arc::clone(&store));

        // Nothing listens on port 1.
        let url = "http://127.0.0.1:1/doc";
        assert!(matches!(
            fetcher.fetch(url, false).await.unwrap(),
            Fetched::Failed { .. }
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_http_error_status_is_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = Arc::new(MetadataStore::temporary().unwrap());
        let fetcher = test_fetcher(Arc::clone(&store));
        let url = format!("{}/doc", server.uri());

        assert!(matches!(
            fetcher.fetch(&url, false).await.unwrap(),
            Fetched::Failed { .. }
        ));
        assert!(store.is_empty());
    }
}
