use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::{Config, FeedConfig};
use crate::feed::document;
use crate::feed::parser::{self, Article};
use crate::output::{AggregateOutput, CacheEntry};
use crate::util::text;

/// Identifying user agent sent with every feed request.
pub const USER_AGENT: &str = concat!("feedrake/", env!("CARGO_PKG_VERSION"));

/// Response bodies past this size are rejected rather than buffered.
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching and parsing one feed.
///
/// None of these propagate out of the fetch layer — each resolves into the
/// `error` field of a [`FetchResult`], isolated to its own feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a status that is neither 2xx nor 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the per-feed deadline
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Body fetched fine but could not be parsed as a feed document
    #[error("XML parse error: {0}")]
    Parse(String),
}

/// Outcome of fetching a single feed.
///
/// Exactly one of three shapes: `error` set (empty articles, no validators),
/// `not_modified` true (articles and validators carried over from the prior
/// cache entry), or a freshly parsed article list with whatever validators
/// the server returned.
#[derive(Debug)]
pub struct FetchResult {
    pub feed: String,
    pub articles: Vec<Article>,
    pub error: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub not_modified: bool,
}

impl FetchResult {
    fn failed(feed: &FeedConfig, err: FetchError) -> Self {
        Self {
            feed: feed.name.clone(),
            articles: Vec::new(),
            error: Some(err.to_string()),
            etag: None,
            last_modified: None,
            not_modified: false,
        }
    }

    fn reused(feed: &FeedConfig, prior: Option<&CacheEntry>) -> Self {
        let (articles, etag, last_modified) = match prior {
            Some(prior) => (
                prior.articles.clone(),
                prior.etag.clone(),
                prior.last_modified.clone(),
            ),
            // A 304 we never asked for (no validators were sent); nothing
            // to reuse, so the feed just comes up empty this run.
            None => (Vec::new(), None, None),
        };
        Self {
            feed: feed.name.clone(),
            articles,
            error: None,
            etag,
            last_modified,
            not_modified: true,
        }
    }
}

/// Fetches one feed with a single conditional GET.
///
/// When a prior cache entry exists, its validators are attached as
/// `If-None-Match` / `If-Modified-Since`. A 304 answer reuses the prior
/// entry's articles and validators verbatim. Any transport failure, non-2xx
/// status, oversized body, or parse failure becomes an error outcome that
/// deliberately carries no validators: a validator whose content we could
/// not obtain (or could not parse) is not safe to reuse next run.
///
/// Never returns `Err` and never panics — all failure modes resolve to a
/// [`FetchResult`] value.
pub async fn fetch_one(
    client: &reqwest::Client,
    feed: &FeedConfig,
    prior: Option<&CacheEntry>,
    timeout_secs: u64,
    excerpt_cap: usize,
) -> FetchResult {
    match fetch_inner(client, feed, prior, timeout_secs, excerpt_cap).await {
        Ok(result) => result,
        Err(e) => FetchResult::failed(feed, e),
    }
}

async fn fetch_inner(
    client: &reqwest::Client,
    feed: &FeedConfig,
    prior: Option<&CacheEntry>,
    timeout_secs: u64,
    excerpt_cap: usize,
) -> Result<FetchResult, FetchError> {
    let mut request = client.get(&feed.url);
    if let Some(prior) = prior {
        if let Some(etag) = &prior.etag {
            request = request.header(IF_NONE_MATCH, etag.as_str());
        }
        if let Some(last_modified) = &prior.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified.as_str());
        }
    }

    // One deadline covers the whole transaction: connect, headers, body.
    let transaction = async {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        let etag = header_string(&response, ETAG);
        let last_modified = header_string(&response, LAST_MODIFIED);
        let body = read_limited_bytes(response, MAX_FEED_SIZE).await?;
        Ok(Some((etag, last_modified, body)))
    };
    let outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), transaction)
        .await
        .map_err(|_| FetchError::Timeout(timeout_secs))??;

    let Some((etag, last_modified, body)) = outcome else {
        return Ok(FetchResult::reused(feed, prior));
    };

    let sanitized = text::sanitize_xml(&body);
    let root = document::parse(&sanitized).map_err(|e| FetchError::Parse(e.to_string()))?;
    let articles = parser::extract_articles(&root, &feed.name, excerpt_cap);

    Ok(FetchResult {
        feed: feed.name.clone(),
        articles,
        error: None,
        etag,
        last_modified,
        not_modified: false,
    })
}

fn header_string(response: &reqwest::Response, name: HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: trust Content-Length when the server sends one
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Fetches every configured feed concurrently and aggregates the results.
///
/// Fan-out is bounded by `max_concurrent_fetches` regardless of how many
/// feeds are configured. Per-feed outcomes are logged as each completes
/// (completion order), but the aggregate article list is rebuilt in input
/// feed order once all tasks have finished, so output is deterministic and
/// independent of network timing.
///
/// A feed that errored this run gets an entry in `errors` and loses its
/// cache entry, forcing a full refetch next run. Every other feed gets a
/// fresh cache entry — whether its articles were parsed fresh or carried
/// over from a 304.
pub async fn run_all(
    client: &reqwest::Client,
    config: &Config,
    prior_cache: &BTreeMap<String, CacheEntry>,
) -> AggregateOutput {
    let total = config.feeds.len();
    let completed = Arc::new(AtomicUsize::new(0));

    let results: Vec<FetchResult> = stream::iter(config.feeds.iter())
        .map(|feed| {
            let prior = prior_cache.get(&feed.name);
            let completed = completed.clone();
            async move {
                let result = fetch_one(
                    client,
                    feed,
                    prior,
                    config.fetch_timeout_secs,
                    config.excerpt_max_chars,
                )
                .await;

                let done = completed.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                match &result.error {
                    Some(e) => tracing::warn!(
                        feed = %result.feed,
                        error = %e,
                        done = done,
                        total = total,
                        "Feed fetch failed"
                    ),
                    None if result.not_modified => tracing::info!(
                        feed = %result.feed,
                        articles = result.articles.len(),
                        done = done,
                        total = total,
                        "Feed not modified, reusing cached articles"
                    ),
                    None => tracing::info!(
                        feed = %result.feed,
                        articles = result.articles.len(),
                        done = done,
                        total = total,
                        "Feed fetched"
                    ),
                }
                result
            }
        })
        .buffer_unordered(config.max_concurrent_fetches)
        .collect()
        .await;

    // Completion order is whatever the network gave us; re-key by feed name
    // and rebuild in input order so the persisted list is deterministic.
    let mut by_name: HashMap<String, FetchResult> = results
        .into_iter()
        .map(|result| (result.feed.clone(), result))
        .collect();

    let mut output = AggregateOutput {
        last_updated: Utc::now(),
        articles: Vec::new(),
        errors: BTreeMap::new(),
        feed_cache: BTreeMap::new(),
    };

    for feed in &config.feeds {
        let Some(result) = by_name.remove(&feed.name) else {
            continue;
        };
        if let Some(message) = result.error {
            // Cache entry forfeited: next run refetches from scratch rather
            // than pinning a validator against now-unknown server state.
            output.errors.insert(result.feed, message);
            continue;
        }
        output.feed_cache.insert(
            result.feed.clone(),
            CacheEntry {
                etag: result.etag,
                last_modified: result.last_modified,
                articles: result.articles.clone(),
            },
        );
        output.articles.extend(result.articles);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><title>One</title><link>https://example.com/1</link></item>
    <item><title>Two</title><link>https://example.com/2</link></item>
</channel></rss>"#;

    fn feed(name: &str, url: String) -> FeedConfig {
        FeedConfig { name: name.to_string(), url }
    }

    fn test_config(feeds: Vec<FeedConfig>) -> Config {
        Config {
            fetch_timeout_secs: 5,
            excerpt_max_chars: 300,
            max_concurrent_fetches: 4,
            feeds,
        }
    }

    fn cached_entry(etag: Option<&str>, last_modified: Option<&str>) -> CacheEntry {
        CacheEntry {
            etag: etag.map(str::to_string),
            last_modified: last_modified.map(str::to_string),
            articles: vec![Article {
                feed: "A".to_string(),
                title: "Cached".to_string(),
                link: "https://example.com/cached".to_string(),
                date: None,
                excerpt: "cached excerpt".to_string(),
                author: String::new(),
            }],
        }
    }

    #[tokio::test]
    async fn test_fetch_success_captures_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("ETag", "\"v1\"")
                    .insert_header("Last-Modified", "Mon, 02 Jan 2006 15:04:05 GMT"),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let feed = feed("A", format!("{}/feed", server.uri()));
        let result = fetch_one(&client, &feed, None, 5, 300).await;

        assert_eq!(result.error, None);
        assert!(!result.not_modified);
        assert_eq!(result.articles.len(), 2);
        assert_eq!(result.articles[0].title, "One");
        assert_eq!(result.etag.as_deref(), Some("\"v1\""));
        assert_eq!(
            result.last_modified.as_deref(),
            Some("Mon, 02 Jan 2006 15:04:05 GMT")
        );
    }

    #[tokio::test]
    async fn test_fetch_sends_conditional_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"v1\""))
            .and(header("If-Modified-Since", "Mon, 02 Jan 2006 15:04:05 GMT"))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let feed = feed("A", format!("{}/feed", server.uri()));
        let prior = cached_entry(Some("\"v1\""), Some("Mon, 02 Jan 2006 15:04:05 GMT"));
        let result = fetch_one(&client, &feed, Some(&prior), 5, 300).await;

        assert!(result.not_modified);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_not_modified_reuses_prior_entry_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let feed = feed("A", format!("{}/feed", server.uri()));
        let prior = cached_entry(Some("\"v1\""), None);
        let result = fetch_one(&client, &feed, Some(&prior), 5, 300).await;

        assert_eq!(result.error, None);
        assert!(result.not_modified);
        assert_eq!(result.articles, prior.articles);
        assert_eq!(result.etag.as_deref(), Some("\"v1\""));
        assert_eq!(result.last_modified, None);
    }

    #[tokio::test]
    async fn test_http_error_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let feed = feed("A", format!("{}/feed", server.uri()));
        let result = fetch_one(&client, &feed, None, 5, 300).await;

        assert_eq!(result.error.as_deref(), Some("HTTP error: status 404"));
        assert!(result.articles.is_empty());
        assert_eq!(result.etag, None);
        assert_eq!(result.last_modified, None);
        assert!(!result.not_modified);
    }

    #[tokio::test]
    async fn test_connection_error_outcome() {
        // Nothing is listening here
        let client = reqwest::Client::new();
        let feed = feed("A", "http://127.0.0.1:1/feed".to_string());
        let result = fetch_one(&client, &feed, None, 5, 300).await;

        assert!(result.error.is_some());
        assert!(result.articles.is_empty());
    }

    #[tokio::test]
    async fn test_parse_error_outcome_forfeits_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<not valid xml")
                    .insert_header("ETag", "\"v1\""),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let feed = feed("A", format!("{}/feed", server.uri()));
        let result = fetch_one(&client, &feed, None, 5, 300).await;

        let error = result.error.expect("parse failure should be an error outcome");
        assert!(error.starts_with("XML parse error:"), "got: {error}");
        assert!(result.articles.is_empty());
        // the ETag the server sent is deliberately not kept
        assert_eq!(result.etag, None);
    }

    #[tokio::test]
    async fn test_bare_ampersand_is_repaired_before_parse() {
        let body = r#"<rss><channel><item><title>Tom & Jerry</title></item></channel></rss>"#;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let feed = feed("A", format!("{}/feed", server.uri()));
        let result = fetch_one(&client, &feed, None, 5, 300).await;

        assert_eq!(result.error, None);
        assert_eq!(result.articles[0].title, "Tom & Jerry");
    }

    #[tokio::test]
    async fn test_run_all_merges_in_input_order_despite_completion_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<rss><channel><item><title>Fast</title></item></channel></rss>"#,
            ))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let config = test_config(vec![
            feed("Slow", format!("{}/slow", server.uri())),
            feed("Fast", format!("{}/fast", server.uri())),
        ]);

        let output = run_all(&client, &config, &BTreeMap::new()).await;

        // "Slow" finishes last but is configured first, so its articles lead
        let feeds: Vec<&str> = output.articles.iter().map(|a| a.feed.as_str()).collect();
        assert_eq!(feeds, vec!["Slow", "Slow", "Fast"]);
        assert!(output.errors.is_empty());
        assert!(output.feed_cache.contains_key("Slow"));
        assert!(output.feed_cache.contains_key("Fast"));
    }

    #[tokio::test]
    async fn test_run_all_error_forfeits_cache_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let config = test_config(vec![feed("A", format!("{}/feed", server.uri()))]);
        let mut prior = BTreeMap::new();
        prior.insert("A".to_string(), cached_entry(Some("\"v1\""), None));

        let output = run_all(&client, &config, &prior).await;

        assert!(output.articles.is_empty());
        assert!(!output.feed_cache.contains_key("A"));
        let message = output.errors.get("A").expect("error should be recorded");
        assert!(!message.is_empty());
    }

    #[tokio::test]
    async fn test_run_all_not_modified_keeps_cache_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let config = test_config(vec![feed("A", format!("{}/feed", server.uri()))]);
        let mut prior = BTreeMap::new();
        prior.insert("A".to_string(), cached_entry(Some("\"v1\""), None));

        let output = run_all(&client, &config, &prior).await;

        assert!(output.errors.is_empty());
        let entry = output.feed_cache.get("A").expect("cache entry kept");
        assert_eq!(entry.etag.as_deref(), Some("\"v1\""));
        assert_eq!(entry.articles, prior.get("A").unwrap().articles);
        assert_eq!(output.articles, entry.articles);
    }

    #[tokio::test]
    async fn test_one_feed_failure_does_not_affect_others() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/good"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let config = test_config(vec![
            feed("Bad", format!("{}/bad", server.uri())),
            feed("Good", format!("{}/good", server.uri())),
        ]);

        let output = run_all(&client, &config, &BTreeMap::new()).await;

        assert_eq!(output.articles.len(), 2);
        assert_eq!(output.errors.len(), 1);
        assert!(output.errors.contains_key("Bad"));
        assert!(output.feed_cache.contains_key("Good"));
        assert!(!output.feed_cache.contains_key("Bad"));
    }
}
