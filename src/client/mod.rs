//! Authenticated HTTP transport with retry and SSE streaming.

pub mod cache;
pub mod config;
pub mod network;
pub mod response;
pub mod retry;
pub mod streaming;

pub use cache::TransportCache;
pub use config::{Config, ConfigBuilder};
pub use network::{NetworkConfig, PoolConfig, ProxyConfig};
pub use response::RawResponse;
pub use retry::{RetryDecision, RetryPolicy};
pub use streaming::{EventStream, LineOutcome, data_payload, decode_line};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use secrecy::ExposeSecret;
use serde_json::Value;

use crate::error::classify;
use crate::{Error, ErrorKind, Result};

/// Per-call options for [`HttpClient::request`] and friends.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    query: Vec<(String, String)>,
    body: Option<Value>,
    timeout: Option<Duration>,
    headers: HeaderMap,
}

impl RequestOptions {
    /// No query, no body and the configured timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Set the JSON request body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Override the configured timeout for this call only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add an extra request header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Client for the AI service REST API.
///
/// Cheap to clone; clones share the connection pool. Every call retries
/// transient failures according to the [`RetryPolicy`] derived from its
/// [`Config`], and every failure surfaces as a classified [`Error`].
#[derive(Clone)]
pub struct HttpClient {
    config: Arc<Config>,
    retry: RetryPolicy,
    http: reqwest::Client,
}

impl HttpClient {
    /// Build a client with its own connection pool.
    pub fn new(config: Config) -> Result<Self> {
        let http = Self::build_http(&config)?;
        Ok(Self::with_http(config, http))
    }

    /// Use an existing `reqwest::Client`, e.g. one shared through [`TransportCache`].
    pub fn with_http(config: Config, http: reqwest::Client) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config),
            config: Arc::new(config),
            http,
        }
    }

    /// Build a client from [`Config::from_env`].
    pub fn from_env() -> Result<Self> {
        Self::new(Config::from_env()?)
    }

    pub(crate) fn build_http(config: &Config) -> Result<reqwest::Client> {
        let builder = reqwest::Client::builder().read_timeout(config.timeout());
        config
            .network()
            .apply_to_builder(builder)?
            .build()
            .map_err(|e| Error::config("failed to build HTTP client").with_source(e))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Authenticated GET.
    pub async fn get(&self, path: &str) -> Result<RawResponse> {
        self.get_with(path, RequestOptions::new()).await
    }

    /// GET with query parameters, headers or a timeout override.
    pub async fn get_with(&self, path: &str, options: RequestOptions) -> Result<RawResponse> {
        self.request(Method::GET, path, options).await
    }

    /// Authenticated POST with a JSON body.
    pub async fn post(&self, path: &str, body: Value) -> Result<RawResponse> {
        self.post_with(path, RequestOptions::new().json(body)).await
    }

    /// POST with full [`RequestOptions`].
    pub async fn post_with(&self, path: &str, options: RequestOptions) -> Result<RawResponse> {
        self.request(Method::POST, path, options).await
    }

    /// Raw request with any method. The body is read in full before returning.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<RawResponse> {
        self.execute_with_retry(method, path, &options, false, RawResponse::read)
            .await
    }

    /// POST `body` and consume the response as server-sent events.
    pub async fn stream(
        &self,
        path: &str,
        body: Value,
    ) -> Result<
        EventStream<impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static + use<>>,
    > {
        self.stream_with(path, RequestOptions::new().json(body))
            .await
    }

    /// Streaming POST. Error statuses are retried and classified before the
    /// first event is produced; after that the stream is consumed lazily.
    pub async fn stream_with(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<
        EventStream<impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static + use<>>,
    > {
        let response = self
            .execute_with_retry(Method::POST, path, &options, true, |response| {
                futures::future::ready(Ok(response))
            })
            .await?;
        Ok(EventStream::new(response.bytes_stream()))
    }

    async fn execute_with_retry<T, F, Fut>(
        &self,
        method: Method,
        path: &str,
        options: &RequestOptions,
        streaming: bool,
        finish: F,
    ) -> Result<T>
    where
        F: Fn(reqwest::Response) -> Fut,
        Fut: Future<Output = reqwest::Result<T>>,
    {
        let url = self.config.endpoint_url(path);
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::debug!(%method, %url, attempt, max_attempts, streaming, "Sending request");

            let response = match self.send_once(&method, &url, options, streaming).await {
                Ok(response) => response,
                Err(e) if e.kind() == ErrorKind::Connection => {
                    let delay = self.network_backoff(attempt, &url, e)?;
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let status = response.status().as_u16();
            if status < 400 {
                match finish(response).await {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        let e = Error::connection("failed to read response body", e);
                        let delay = self.network_backoff(attempt, &url, e)?;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                }
            }

            let headers = response.headers().clone();
            let retry_after = retry::parse_retry_after(&headers);
            let body = response.text().await.unwrap_or_default();

            match self.retry.on_status(attempt, status, retry_after) {
                RetryDecision::Retry { delay } => {
                    tracing::warn!(
                        status,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retryable status, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Fail => {
                    let mut err = classify(status, &body, retry_after);
                    if err.request_id().is_none()
                        && let Some(id) = response::header_request_id(&headers)
                    {
                        err = err.with_context("request_id", id);
                    }
                    tracing::debug!(status, attempt, kind = %err.kind(), "Request failed");
                    return Err(err);
                }
            }
        }
    }

    /// Delay before the next attempt after a transport failure, or the final
    /// error once attempts are exhausted.
    fn network_backoff(&self, attempt: u32, url: &str, error: Error) -> Result<Duration> {
        match self.retry.on_network_error(attempt) {
            RetryDecision::Retry { delay } => {
                tracing::warn!(
                    error = %error,
                    attempt,
                    max_attempts = self.retry.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Transport error, retrying"
                );
                Ok(delay)
            }
            RetryDecision::Fail => Err(Error::connection(
                format!("request to {url} failed after {attempt} attempts"),
                error,
            )),
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
        streaming: bool,
    ) -> Result<reqwest::Response> {
        let timeout = options.timeout.unwrap_or(self.config.timeout());
        let accept = if streaming {
            "text/event-stream"
        } else {
            "application/json"
        };

        let mut request = self
            .http
            .request(method.clone(), url)
            .bearer_auth(self.config.api_key().expose_secret())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, accept)
            .header(USER_AGENT, self.config.user_agent())
            .headers(options.headers.clone());

        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(ref body) = options.body {
            request = request.json(body);
        }

        if streaming {
            // A total timeout would cut the stream off mid-body; bound only the
            // wait for response headers and rely on the client's read timeout.
            match tokio::time::timeout(timeout, request.send()).await {
                Ok(result) => result.map_err(transport_error),
                Err(elapsed) => Err(Error::connection(
                    format!("no response within {}ms", timeout.as_millis()),
                    elapsed,
                )),
            }
        } else {
            request
                .timeout(timeout)
                .send()
                .await
                .map_err(transport_error)
        }
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_builder() {
        return Error::config("invalid request").with_source(e);
    }
    let message = if e.is_timeout() {
        "request timed out"
    } else if e.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    Error::connection(message, e)
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.config.base_url())
            .field("max_attempts", &self.retry.max_attempts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpClient {
        HttpClient::new(Config::new("https://api.example.com/v1", "sk-test").unwrap()).unwrap()
    }

    #[test]
    fn test_request_options_builder() {
        let options = RequestOptions::new()
            .query("limit", 10)
            .query("order", "desc")
            .json(serde_json::json!({"model": "m"}))
            .timeout(Duration::from_secs(5))
            .header(
                HeaderName::from_static("x-trace"),
                HeaderValue::from_static("abc"),
            );

        assert_eq!(
            options.query,
            vec![
                ("limit".to_string(), "10".to_string()),
                ("order".to_string(), "desc".to_string())
            ]
        );
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
        assert!(options.body.is_some());
        assert_eq!(options.headers.get("x-trace").unwrap(), "abc");
    }

    #[test]
    fn test_retry_policy_follows_config() {
        let config = Config::builder()
            .base_url("https://api.example.com")
            .api_key("k")
            .max_retries(5)
            .build()
            .unwrap();
        let client = HttpClient::new(config).unwrap();
        assert_eq!(client.retry_policy().max_attempts(), 5);
    }

    #[test]
    fn test_debug_hides_api_key() {
        let debug = format!("{:?}", client());
        assert!(!debug.contains("sk-test"));
        assert!(debug.contains("api.example.com"));
    }

    #[test]
    fn test_transport_error_classification() {
        let builder_err = reqwest::Client::new().get("not a url").build().unwrap_err();
        assert_eq!(transport_error(builder_err).kind(), ErrorKind::Config);
    }
}
