//! HTTP client for vendor and sink calls with rate limiting and error
//! classification
//!
//! Non-success statuses become `EtlError::RateLimited` (429) or
//! `EtlError::Request` carrying the status and a body snippet.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::EtlError;
use crate::infrastructure::config::BatchConfig;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout: Duration,
    /// `None` disables the process-wide limiter
    pub max_requests_per_second: Option<NonZeroU32>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("visibility-etl/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            max_requests_per_second: NonZeroU32::new(10),
        }
    }
}

impl HttpClientConfig {
    #[must_use]
    pub fn from_batch_config(batch: &BatchConfig) -> Self {
        Self {
            timeout: batch.request_timeout(),
            max_requests_per_second: NonZeroU32::new(batch.max_requests_per_second),
            ..Self::default()
        }
    }
}

/// Shared client: one connection pool and one limiter for the whole run.
pub struct HttpClient {
    client: Client,
    rate_limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    config: HttpClientConfig,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| EtlError::Config(format!("Invalid user agent: {e}")))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EtlError::Config(format!("Failed to create HTTP client: {e}")))?;

        let rate_limiter = config
            .max_requests_per_second
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            client,
            rate_limiter,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    /// Sends a prepared request after waiting for the limiter and maps
    /// non-success statuses to typed errors.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, EtlError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!("HTTP {} from {}", status, response.url());
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(EtlError::from_status(status.as_u16(), &body))
    }

    /// POSTs a JSON body and decodes a JSON response.
    pub async fn post_json<B, T>(&self, request: RequestBuilder, body: &B) -> Result<T, EtlError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = request.header(CONTENT_TYPE, "application/json").json(body);
        let response = self.send(request).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Sends a GET and decodes a JSON response.
    pub async fn get_json<T>(&self, request: RequestBuilder) -> Result<T, EtlError>
    where
        T: DeserializeOwned,
    {
        let response = self.send(request).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}
