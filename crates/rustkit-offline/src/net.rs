//! Network seam: requests, responses and the HTTP fetcher.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::header::{CACHE_CONTROL, PRAGMA};
use http::Method;
use reqwest::Client;
use tracing::{debug, trace};
use url::Url;

use crate::cache::CachedResponse;
use crate::config::FetchConfig;
use crate::error::{OfflineError, OfflineResult};

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// How the HTTP layer may use intermediate caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Normal HTTP caching.
    #[default]
    Default,
    /// Bypass intermediate caches and revalidate with the server.
    Reload,
}

/// An intercepted or agent-issued request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub cache_mode: CacheMode,
}

impl FetchRequest {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            cache_mode: CacheMode::Default,
        }
    }

    /// Create a cache-busting GET request.
    pub fn reload(url: Url) -> Self {
        Self::get(url).cache_mode(CacheMode::Reload)
    }

    /// Parse a URL and create a GET request.
    pub fn parse(url: &str) -> OfflineResult<Self> {
        Ok(Self::get(Url::parse(url)?))
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the cache mode.
    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }
}

/// Response handed back to the requester.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    /// Served from the content container without touching the network.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a network response.
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: HashMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Create a response from a cache entry.
    pub fn from_cache(entry: &CachedResponse) -> Self {
        Self {
            url: entry.url.clone(),
            status: entry.status,
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }
}

/// Performs network requests on behalf of the agent.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a request. Non-2xx statuses are responses, not errors; only
    /// transport failures are `Err`.
    async fn fetch(&self, request: &FetchRequest) -> OfflineResult<FetchResponse>;
}

/// `Fetcher` backed by a reqwest client.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new HTTP fetcher.
    pub fn new(config: &FetchConfig) -> OfflineResult<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build()
            .map_err(|e| OfflineError::network(e.to_string()))?;

        debug!(user_agent = %config.user_agent, "HttpFetcher initialized");
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> OfflineResult<FetchResponse> {
        debug!(url = %request.url, method = %request.method, mode = ?request.cache_mode, "Fetching resource");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        if request.cache_mode == CacheMode::Reload {
            builder = builder
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| OfflineError::network(format!("{}: {}", request.url, e)))?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| OfflineError::network(format!("{}: {}", request.url, e)))?;

        trace!(url = %url, status, body_len = body.len(), "Response received");

        Ok(FetchResponse {
            url,
            status,
            headers,
            body,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com/main.js").unwrap();
        let request = FetchRequest::reload(url.clone());

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.cache_mode, CacheMode::Reload);
        assert_eq!(FetchRequest::get(url).cache_mode, CacheMode::Default);
    }

    #[test]
    fn test_request_id_uniqueness() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_response_ok() {
        assert!(FetchResponse::new("https://example.com/", 200, "x").ok());
        assert!(FetchResponse::new("https://example.com/", 204, "").ok());
        assert!(!FetchResponse::new("https://example.com/", 304, "").ok());
        assert!(!FetchResponse::new("https://example.com/", 404, "").ok());
    }

    #[tokio::test]
    async fn test_http_fetcher_reads_body_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/main.js"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/javascript")
                    .set_body_string("console.log(1)"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let request = FetchRequest::parse(&format!("{}/main.js", server.uri())).unwrap();
        let response = fetcher.fetch(&request).await.unwrap();

        assert!(response.ok());
        assert!(!response.from_cache);
        assert_eq!(&response.body[..], b"console.log(1)");
        assert_eq!(
            response.headers.get("content-type").map(String::as_str),
            Some("application/javascript")
        );
    }

    #[tokio::test]
    async fn test_http_fetcher_reload_bypasses_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.html"))
            .and(header("cache-control", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let request = FetchRequest::reload(Url::parse(&format!("{}/index.html", server.uri())).unwrap());
        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_http_fetcher_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let request = FetchRequest::parse(&format!("{}/missing.png", server.uri())).unwrap();
        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.status, 404);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_http_fetcher_connection_refused() {
        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        // Port 9 (discard) is essentially never served locally.
        let request = FetchRequest::parse("http://127.0.0.1:9/main.js").unwrap();
        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(err.is_network());
    }
}
