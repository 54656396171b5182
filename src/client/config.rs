//! Client configuration.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use super::network::NetworkConfig;
use crate::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];
pub const DEFAULT_USER_AGENT: &str = concat!("ai-service-client/", env!("CARGO_PKG_VERSION"));

pub const ENV_API_KEY: &str = "AI_SERVICE_API_KEY";
pub const ENV_BASE_URL: &str = "AI_SERVICE_BASE_URL";
pub const ENV_TIMEOUT_SECS: &str = "AI_SERVICE_TIMEOUT_SECS";
pub const ENV_MAX_RETRIES: &str = "AI_SERVICE_MAX_RETRIES";
pub const ENV_RETRY_DELAY_MS: &str = "AI_SERVICE_RETRY_DELAY_MS";

/// Immutable transport configuration.
///
/// Built through [`Config::builder`] or [`Config::from_env`]; there are no
/// setters after construction. The API key is kept in a [`SecretString`] so it
/// never shows up in `Debug` output or logs.
#[derive(Clone, Debug)]
pub struct Config {
    base_url: String,
    api_key: SecretString,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    retry_backoff_factor: f64,
    retry_status_codes: BTreeSet<u16>,
    user_agent: String,
    network: NetworkConfig,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Shortcut for a configuration with every other setting at its default.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Self::builder().base_url(base_url).api_key(api_key).build()
    }

    /// Create configuration from environment variables.
    ///
    /// `AI_SERVICE_API_KEY` and `AI_SERVICE_BASE_URL` are required;
    /// `AI_SERVICE_TIMEOUT_SECS`, `AI_SERVICE_MAX_RETRIES` and
    /// `AI_SERVICE_RETRY_DELAY_MS` override the defaults. Proxy settings come
    /// from the usual `HTTPS_PROXY` / `HTTP_PROXY` / `NO_PROXY` variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder().network(NetworkConfig::from_lookup(&lookup));

        if let Some(key) = lookup(ENV_API_KEY) {
            builder = builder.api_key(key);
        }
        if let Some(url) = lookup(ENV_BASE_URL) {
            builder = builder.base_url(url);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_TIMEOUT_SECS)? {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(retries) = parse_var::<u32>(&lookup, ENV_MAX_RETRIES)? {
            builder = builder.max_retries(retries);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_RETRY_DELAY_MS)? {
            builder = builder.retry_delay(Duration::from_millis(ms));
        }

        builder.build()
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Total attempts per call, the first one included.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn retry_backoff_factor(&self) -> f64 {
        self.retry_backoff_factor
    }

    pub fn retry_status_codes(&self) -> &BTreeSet<u16> {
        &self.retry_status_codes
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Join `path` onto the base URL with exactly one slash in between.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        self.base_url == other.base_url
            && self.api_key.expose_secret() == other.api_key.expose_secret()
            && self.timeout == other.timeout
            && self.max_retries == other.max_retries
            && self.retry_delay == other.retry_delay
            && self.retry_backoff_factor == other.retry_backoff_factor
            && self.retry_status_codes == other.retry_status_codes
            && self.user_agent == other.user_agent
            && self.network == other.network
    }
}

/// Builder for [`Config`].
#[derive(Default)]
pub struct ConfigBuilder {
    base_url: Option<String>,
    api_key: Option<SecretString>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    retry_delay: Option<Duration>,
    retry_backoff_factor: Option<f64>,
    retry_status_codes: Option<BTreeSet<u16>>,
    user_agent: Option<String>,
    network: Option<NetworkConfig>,
}

impl ConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = Some(attempts);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn retry_backoff_factor(mut self, factor: f64) -> Self {
        self.retry_backoff_factor = Some(factor);
        self
    }

    pub fn retry_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_status_codes = Some(codes.into_iter().collect());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.network = Some(network);
        self
    }

    pub fn build(self) -> Result<Config> {
        let raw_url = self
            .base_url
            .ok_or_else(|| Error::config(format!("base URL is required (set {ENV_BASE_URL})")))?;
        let base_url = normalize_base_url(&raw_url)?;

        let api_key = self
            .api_key
            .filter(|k| !k.expose_secret().trim().is_empty())
            .ok_or_else(|| Error::config(format!("API key is required (set {ENV_API_KEY})")))?;

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(Error::config("timeout must be greater than zero"));
        }

        let max_retries = self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        if max_retries == 0 {
            return Err(Error::config("max_retries must be at least 1"));
        }

        let retry_backoff_factor = self.retry_backoff_factor.unwrap_or(DEFAULT_BACKOFF_FACTOR);
        if !retry_backoff_factor.is_finite() || retry_backoff_factor <= 0.0 {
            return Err(Error::config(format!(
                "retry_backoff_factor must be a positive number, got {retry_backoff_factor}"
            )));
        }

        Ok(Config {
            base_url,
            api_key,
            timeout,
            max_retries,
            retry_delay: self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY),
            retry_backoff_factor,
            retry_status_codes: self
                .retry_status_codes
                .unwrap_or_else(|| DEFAULT_RETRY_STATUS_CODES.into_iter().collect()),
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            network: self.network.unwrap_or_default(),
        })
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = url::Url::parse(trimmed)
        .map_err(|e| Error::config(format!("invalid base URL '{trimmed}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::config(format!(
            "base URL must use http or https, got '{}'",
            parsed.scheme()
        )));
    }
    Ok(trimmed.to_string())
}

fn parse_var<T: FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::config(format!("invalid value for {name}: {e}")))
        })
        .transpose()
}
