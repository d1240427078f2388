use crate::feed::parser::{parse_feed, NormalizedFeed, ParseError};
use crate::util::{validate_url, HostPolicy, UrlValidationError};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::redirect::Policy;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024; // 10MB

const FEED_ACCEPT: &str = "application/rss+xml, application/atom+xml, application/xml, text/xml";
const PAGE_ACCEPT: &str = "text/html, application/xhtml+xml";
const MAX_REDIRECTS: usize = 5;

/// Errors that can occur while retrieving a feed.
///
/// All of these are per-feed and transient from the scheduler's point of view:
/// they fail the current update of one feed and never abort a pass.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, redirect policy, etc.)
    #[error("Request failed: {0}")]
    Network(#[source] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// 2xx response whose body was empty or whitespace only
    #[error("Empty response body")]
    EmptyBody,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// URL failed scheme or host policy checks
    #[error("{0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Body was not recognisable RSS or Atom
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

impl FetchError {
    /// Classifies a reqwest error, keeping timeouts distinct from other network failures.
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(e)
        }
    }
}

/// Tunables for [`FeedClient`].
#[derive(Debug, Clone)]
pub struct FeedClientOptions {
    /// Upper bound on one request, body read included
    pub timeout: Duration,
    pub user_agent: String,
    pub max_body_bytes: usize,
    pub host_policy: HostPolicy,
}

impl Default for FeedClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: concat!("feedloom/", env!("CARGO_PKG_VERSION")).to_owned(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            host_policy: HostPolicy::default(),
        }
    }
}

/// HTTP client for feeds and the HTML pages that link to them.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct FeedClient {
    http: reqwest::Client,
    options: Arc<FeedClientOptions>,
}

impl FeedClient {
    pub fn new(options: FeedClientOptions) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .redirect(create_redirect_policy(options.host_policy))
            .connect_timeout(options.timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(FetchError::Network)?;

        Ok(Self {
            http,
            options: Arc::new(options),
        })
    }

    pub fn options(&self) -> &FeedClientOptions {
        &self.options
    }

    /// Checks a URL against the scheme and host policy without touching the network.
    pub fn check_url(&self, url: &str) -> Result<Url, FetchError> {
        Ok(validate_url(url, self.options.host_policy)?)
    }

    /// Fetches and parses a feed.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] - scheme or host rejected before any request
    /// - [`FetchError::Timeout`] - the request did not complete within the timeout
    /// - [`FetchError::Network`] - connection, TLS or redirect failure
    /// - [`FetchError::HttpStatus`] - non-2xx response
    /// - [`FetchError::EmptyBody`] - 2xx with nothing but whitespace
    /// - [`FetchError::ResponseTooLarge`] - body exceeded the limit
    /// - [`FetchError::Parse`] - body is neither RSS nor Atom
    pub async fn fetch(&self, url: &str) -> Result<NormalizedFeed, FetchError> {
        let url = self.check_url(url)?;
        let bytes = self.get_bytes(&url, FEED_ACCEPT, true).await?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(FetchError::EmptyBody);
        }

        let feed = parse_feed(&bytes)?;
        if feed.skipped > 0 {
            tracing::debug!(
                url = %url,
                skipped = feed.skipped,
                "Entries without title or URL skipped"
            );
        }
        Ok(feed)
    }

    /// Returns true if `url` passes the URL policy and serves a parseable feed.
    ///
    /// Failures are logged at debug level and never propagated.
    pub async fn validate(&self, url: &str) -> bool {
        match self.fetch(url).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Feed validation failed");
                false
            }
        }
    }

    /// Fetches an HTML page for link discovery.
    pub(crate) async fn fetch_page(&self, url: &Url) -> Result<String, FetchError> {
        let bytes = self.get_bytes(url, PAGE_ACCEPT, false).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn get_bytes(&self, url: &Url, accept: &str, expect_feed: bool) -> Result<Vec<u8>, FetchError> {
        let request = self.http.get(url.clone()).header(ACCEPT, accept);
        let limit = self.options.max_body_bytes;

        let exchange = async {
            let response = request.send().await.map_err(FetchError::from_reqwest)?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            if expect_feed {
                warn_on_unexpected_content_type(url, &response);
            }

            read_limited_bytes(response, limit).await
        };

        tokio::time::timeout(self.options.timeout, exchange)
            .await
            .map_err(|_| FetchError::Timeout)?
    }
}

fn warn_on_unexpected_content_type(url: &Url, response: &reqwest::Response) {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let looks_like_feed = ["xml", "rss", "atom"].iter().any(|t| content_type.contains(t));
    if !looks_like_feed {
        tracing::warn!(
            url = %url,
            content_type = %content_type,
            "Unexpected content type for feed, parsing anyway"
        );
    }
}

/// Limits redirect hops, detects loops, and re-applies the host policy to every hop.
fn create_redirect_policy(host_policy: HostPolicy) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("Too many redirects (max {MAX_REDIRECTS})"));
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        if let Err(e) = validate_url(url.as_str(), host_policy) {
            return attempt.error(format!("Redirect target rejected: {e}"));
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Reads the body, failing as soon as it exceeds `limit` bytes.
async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::from_reqwest)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
