use async_trait::async_trait;
use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

use super::parser::parse_feed;
use crate::storage::CandidateItem;

/// Errors that can occur while retrieving and parsing one feed.
///
/// These are per-source: the sync engine records them on the source and
/// moves on to the next one.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Feed XML could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Retrieves a feed document and turns it into candidate items.
///
/// The sync engine only sees this trait, so anything that can produce
/// candidates for a URL (HTTP, a fixture, a scripted test double) plugs in.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<CandidateItem>, FetchError>;
}

/// Tunables for [`HttpFeedFetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_bytes: usize,
    pub max_retries: u32,
    /// First backoff delay; doubles on each retry
    pub retry_base_delay: Duration,
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_bytes: 10 * 1024 * 1024, // 10MB
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            user_agent: concat!("feedkeeper/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Limit redirects and refuse to be bounced off http/https.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 5 {
            return attempt.error("Too many redirects (max 5)");
        }

        let scheme = attempt.url().scheme().to_owned();
        if !matches!(scheme.as_str(), "http" | "https") {
            return attempt.error(format!("Redirect to unsupported scheme: {}", scheme));
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// [`FeedFetcher`] over HTTP(S) with bounded retries.
///
/// - HTTP 429 and 5xx responses are retried with exponential backoff
/// - truncated bodies (fewer bytes than Content-Length) are retried the same way
/// - other 4xx responses fail immediately
/// - bodies larger than `max_bytes` are rejected without being buffered whole
pub struct HttpFeedFetcher {
    client: reqwest::Client,
    options: FetchOptions,
}

impl HttpFeedFetcher {
    pub fn new(options: FetchOptions) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(create_redirect_policy())
            .user_agent(options.user_agent.clone())
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(options.timeout)
            .build()?;
        Ok(Self { client, options })
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.options.retry_base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let max_retries = self.options.max_retries;
        let mut retry_count = 0;

        loop {
            let response = tokio::time::timeout(self.options.timeout, self.client.get(url).send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(|e| {
                    if e.is_timeout() {
                        FetchError::Timeout
                    } else {
                        FetchError::Network(e)
                    }
                })?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= max_retries {
                    return Err(FetchError::RateLimited(max_retries));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed = %url,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= max_retries {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            match read_limited_bytes(response, self.options.max_bytes).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= max_retries {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }
                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        feed = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<CandidateItem>, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        let items = parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;
        tracing::debug!(feed = %url, items = items.len(), bytes = bytes.len(), "Fetched feed");
        Ok(items)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
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

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
