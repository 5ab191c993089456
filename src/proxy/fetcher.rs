//! Source fetcher module for downloading subscription payloads
//!
//! This module provides functionality for:
//! - Fetching raw text or base64-wrapped subscription documents
//! - Running many sources in parallel behind a fixed admission gate
//! - Isolating per-source failures so a dead source only contributes nothing

use crate::proxy::codec;
use crate::proxy::models::{SourceDescriptor, SourceEncoding};
use crate::Result;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Default deadline for a single source request in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 20;

/// Default number of in-flight requests
const DEFAULT_CONCURRENCY: usize = 10;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Why a single source contributed nothing
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected HTTP status: {0}")]
    Status(StatusCode),

    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Result of fetching a single source
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// The source that was fetched
    pub source: SourceDescriptor,
    /// Decoded payload, empty on failure
    pub body: String,
    /// Error message if fetching failed
    pub error: Option<String>,
}

impl FetchResult {
    /// Create a successful fetch result
    pub fn success(source: SourceDescriptor, body: String) -> Self {
        Self {
            source,
            body,
            error: None,
        }
    }

    /// Create a failed fetch result
    pub fn failure(source: SourceDescriptor, error: String) -> Self {
        Self {
            source,
            body: String::new(),
            error: Some(error),
        }
    }

    /// Check if the fetch was successful
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for the source fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Deadline for each request
    pub timeout: Duration,
    /// Maximum number of concurrent requests
    pub concurrency: usize,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Fetcher for subscription sources
#[derive(Debug, Clone)]
pub struct Fetcher {
    config: FetcherConfig,
    client: Client,
}

impl Fetcher {
    /// Create a new fetcher with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(FetcherConfig::default())
    }

    /// Create a new fetcher with custom configuration
    pub fn with_config(config: FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { config, client })
    }

    /// Fetch one source and unwrap its payload
    ///
    /// A single attempt is made; the client deadline covers the whole
    /// request including the body. Base64-wrapped payloads are padded to a
    /// multiple of four before decoding; a payload that still fails to
    /// decode discards the whole source.
    pub async fn fetch(&self, source: &SourceDescriptor) -> std::result::Result<String, FetchError> {
        let response = self.client.get(&source.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.text().await?;
        match source.encoding {
            SourceEncoding::RawText => Ok(body),
            SourceEncoding::Base64 => Ok(codec::decode_padded_text(&body)?),
        }
    }

    /// Fetch a source, folding any failure into the result
    pub async fn fetch_source(&self, source: &SourceDescriptor) -> FetchResult {
        match self.fetch(source).await {
            Ok(body) => {
                debug!(url = %source.url, bytes = body.len(), "fetched source");
                FetchResult::success(source.clone(), body)
            }
            Err(e) => {
                warn!(url = %source.url, error = %e, "source failed");
                FetchResult::failure(source.clone(), e.to_string())
            }
        }
    }

    /// Fetch all sources in parallel, returning once every task has finished
    ///
    /// Each source runs in its own task; at most `concurrency` requests are in
    /// flight at once. Results arrive in completion order.
    pub async fn fetch_all(&self, sources: &[SourceDescriptor]) -> Vec<FetchResult> {
        if sources.is_empty() {
            return Vec::new();
        }

        info!(
            sources = sources.len(),
            concurrency = self.config.concurrency,
            "fetching sources"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let (tx, mut rx) = mpsc::channel(sources.len());

        for source in sources.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let fetcher = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => fetcher.fetch_source(&source).await,
                    Err(e) => FetchResult::failure(source, e.to_string()),
                };
                // The receiver lives until every sender is dropped.
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(sources.len());
        while let Some(result) = rx.recv().await {
            results.push(result);
        }

        // A task that panicked never sent; account for it as a failure.
        if results.len() < sources.len() {
            for source in sources {
                if !results.iter().any(|r| &r.source == source) {
                    results.push(FetchResult::failure(
                        source.clone(),
                        "fetch task aborted".to_string(),
                    ));
                }
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount(server: &MockServer, route: &str, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(template)
            .mount(server)
            .await;
    }

    #[test]
    fn test_fetcher_config_default() {
        let config = FetcherConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_fetcher_config_builder() {
        let config = FetcherConfig::new()
            .with_timeout(Duration::from_secs(5))
            .with_concurrency(0)
            .with_user_agent("Custom Agent".to_string());

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.user_agent, "Custom Agent");
    }

    #[test]
    fn test_fetch_result_failure() {
        let result = FetchResult::failure(
            SourceDescriptor::text("https://example.com"),
            "Connection failed".to_string(),
        );
        assert!(!result.is_success());
        assert!(result.body.is_empty());
        assert_eq!(result.error, Some("Connection failed".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_raw_text() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/plain",
            ResponseTemplate::new(200).set_body_string("vless://a@h:1\ntrojan://b@h:2\n"),
        )
        .await;

        let fetcher = Fetcher::new().unwrap();
        let source = SourceDescriptor::text(&format!("{}/plain", server.uri()));
        let body = fetcher.fetch(&source).await.unwrap();
        assert_eq!(body, "vless://a@h:1\ntrojan://b@h:2\n");
    }

    #[tokio::test]
    async fn test_fetch_base64_without_padding() {
        let server = MockServer::start().await;
        // base64("vmess://abc\nss://x") with its trailing "=" stripped
        let encoded = codec::encode("vmess://abc\nss://x");
        mount(
            &server,
            "/wrapped",
            ResponseTemplate::new(200).set_body_string(encoded.trim_end_matches('=')),
        )
        .await;

        let fetcher = Fetcher::new().unwrap();
        let source = SourceDescriptor::base64(&format!("{}/wrapped", server.uri()));
        let body = fetcher.fetch(&source).await.unwrap();
        assert_eq!(body, "vmess://abc\nss://x");
    }

    #[tokio::test]
    async fn test_fetch_invalid_base64_is_failure() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/broken",
            ResponseTemplate::new(200).set_body_string("vless://plain-text-not-base64"),
        )
        .await;

        let fetcher = Fetcher::new().unwrap();
        let source = SourceDescriptor::base64(&format!("{}/broken", server.uri()));
        let err = fetcher.fetch(&source).await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_bad_status_is_failure() {
        let server = MockServer::start().await;
        mount(&server, "/missing", ResponseTemplate::new(404)).await;

        let fetcher = Fetcher::new().unwrap();
        let source = SourceDescriptor::text(&format!("{}/missing", server.uri()));
        let result = fetcher.fetch_source(&source).await;
        assert!(!result.is_success());
        assert!(result.body.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_failure() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/slow",
            ResponseTemplate::new(200)
                .set_body_string("vless://a@h:1")
                .set_delay(Duration::from_secs(2)),
        )
        .await;

        let config = FetcherConfig::new().with_timeout(Duration::from_millis(200));
        let fetcher = Fetcher::with_config(config).unwrap();
        let source = SourceDescriptor::text(&format!("{}/slow", server.uri()));
        assert!(fetcher.fetch(&source).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_all_isolates_failures() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/ok",
            ResponseTemplate::new(200).set_body_string("vless://a@h:1"),
        )
        .await;
        mount(&server, "/fail", ResponseTemplate::new(500)).await;

        let sources: Vec<_> = (0..6)
            .map(|i| {
                let route = if i % 2 == 0 { "ok" } else { "fail" };
                SourceDescriptor::text(&format!("{}/{}?n={}", server.uri(), route, i))
            })
            .collect();

        let config = FetcherConfig::new().with_concurrency(2);
        let fetcher = Fetcher::with_config(config).unwrap();
        let results = fetcher.fetch_all(&sources).await;

        assert_eq!(results.len(), 6);
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 3);
        for source in &sources {
            assert!(results.iter().any(|r| &r.source == source));
        }
    }

    #[tokio::test]
    async fn test_fetch_all_respects_concurrency_limit() {
        let server = MockServer::start().await;
        let delay = Duration::from_millis(200);
        mount(
            &server,
            "/slow",
            ResponseTemplate::new(200)
                .set_body_string("vless://a@h:1")
                .set_delay(delay),
        )
        .await;

        let sources: Vec<_> = (0..6)
            .map(|i| SourceDescriptor::text(&format!("{}/slow?n={}", server.uri(), i)))
            .collect();

        // With at most 2 in flight, 6 delayed responses need 3 full rounds;
        // any wider overlap would finish in 2 or fewer.
        let fetcher = Fetcher::with_config(FetcherConfig::new().with_concurrency(2)).unwrap();
        let start = Instant::now();
        let results = fetcher.fetch_all(&sources).await;
        let elapsed = start.elapsed();

        assert_eq!(results.len(), 6);
        assert!(results.iter().all(FetchResult::is_success));
        assert!(elapsed >= delay * 3, "finished in {:?}", elapsed);
        assert_eq!(server.received_requests().await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_fetch_all_empty() {
        let fetcher = Fetcher::new().unwrap();
        assert!(fetcher.fetch_all(&[]).await.is_empty());
    }
}
