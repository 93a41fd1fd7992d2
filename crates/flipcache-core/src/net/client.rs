//! Network fetcher for the worker.
//!
//! `Fetcher` is the seam the worker talks to; `HttpFetcher` is the real
//! implementation over `reqwest`, and tests substitute their own.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, warn};
use url::{Origin, Url};

use crate::models::{Request, Response, ResponseType};

use super::FetchError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Issues live network requests on behalf of the worker.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a request. HTTP error statuses come back as `Ok`; only
    /// transport failures are errors.
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Fetcher over a shared reqwest client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    origin: Origin,
    initial_backoff: Duration,
}

impl HttpFetcher {
    /// Create a fetcher for pages served under `scope`. Responses whose final
    /// URL shares the scope's origin are classified as basic.
    pub fn new(scope: &Url, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            origin: scope.origin(),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    fn classify(&self, url: &Url) -> ResponseType {
        if url.origin() == self.origin {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        }
    }

    async fn read_response(&self, response: reqwest::Response) -> Result<Response, FetchError> {
        let status = response.status().as_u16();
        let url = response.url().clone();

        // repeated headers are joined with a comma
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .and_modify(|joined| {
                        joined.push_str(", ");
                        joined.push_str(value);
                    })
                    .or_insert_with(|| value.to_string());
            }
        }

        let body = response.bytes().await?;
        let response_type = self.classify(&url);

        Ok(Response {
            url,
            status,
            headers,
            body,
            response_type,
            from_cache: false,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            FetchError::InvalidRequest(format!("unsupported method {}", request.method))
        })?;

        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self
                .client
                .request(method.clone(), request.url.clone())
                .send()
                .await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS
                && retries < MAX_RATE_LIMIT_RETRIES
            {
                retries += 1;
                warn!(
                    url = %request.url,
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2; // Exponential backoff
                continue;
            }

            debug!(url = %request.url, status = response.status().as_u16(), "Fetched");
            return self.read_response(response).await;
        }
    }
}
