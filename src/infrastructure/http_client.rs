//! Rate-limited HTTP client
//!
//! Fetches pages with a per-process request-rate cap so the crawler stays
//! polite toward the target site. Navigation failures map into the crawler
//! error taxonomy; callers decide about retries.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tokio_util::sync::CancellationToken;

use crate::errors::CrawlerError;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_requests_per_second: u32,
    pub follow_redirects: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: crate::infrastructure::config::defaults::USER_AGENT.to_string(),
            timeout: Duration::from_millis(crate::infrastructure::config::defaults::REQUEST_TIMEOUT_MS),
            max_requests_per_second: 5,
            follow_redirects: true,
        }
    }
}

/// Rate-limited fetcher shared by every page handle of a browser session.
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpClient {
    pub fn new(config: &HttpClientConfig) -> Result<Self, CrawlerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| CrawlerError::Configuration(format!("invalid user agent: {e}")))?,
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .cookie_store(true)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .map_err(|e| CrawlerError::Configuration(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .ok_or_else(|| CrawlerError::Configuration("request rate must be greater than 0".into()))?,
        );

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    /// Fetches a URL and returns the body text. Non-2xx statuses are
    /// navigation errors.
    pub async fn get_text(&self, url: &str) -> Result<String, CrawlerError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(url, "fetching");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CrawlerError::navigation(format!("HTTP status {status}"), url));
        }
        Ok(response.text().await?)
    }

    /// Like [`Self::get_text`] but abandons the request when the token fires.
    pub async fn get_text_with_cancellation(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, CrawlerError> {
        tokio::select! {
            () = self.rate_limiter.until_ready() => {}
            () = cancel.cancelled() => {
                return Err(CrawlerError::navigation("request cancelled", url));
            }
        }

        tokio::select! {
            result = self.get_after_limit(url) => result,
            () = cancel.cancelled() => Err(CrawlerError::navigation("request cancelled", url)),
        }
    }

    async fn get_after_limit(&self, url: &str) -> Result<String, CrawlerError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CrawlerError::navigation(format!("HTTP status {status}"), url));
        }
        Ok(response.text().await?)
    }
}
