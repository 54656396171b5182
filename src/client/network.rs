//! Network configuration for proxy and connection pool settings.

use std::env;
use std::time::Duration;

use crate::{Error, Result};

/// Connection pool configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolConfig {
    pub idle_timeout: Duration,
    pub max_idle_per_host: usize,
    pub tcp_keepalive: Option<Duration>,
    pub http2_keep_alive: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(90),
            max_idle_per_host: 32,
            tcp_keepalive: Some(Duration::from_secs(60)),
            http2_keep_alive: Some(Duration::from_secs(30)),
        }
    }
}

impl PoolConfig {
    /// Small pool without keep-alive probes.
    pub fn minimal() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            max_idle_per_host: 2,
            tcp_keepalive: None,
            http2_keep_alive: None,
        }
    }
}

/// Proxy server configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProxyConfig {
    /// HTTPS proxy URL
    pub https: Option<String>,
    /// HTTP proxy URL
    pub http: Option<String>,
    /// No-proxy patterns
    pub no_proxy: Vec<String>,
}

/// Network settings applied to the pooled HTTP client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NetworkConfig {
    pub pool: PoolConfig,
    pub proxy: Option<ProxyConfig>,
}

impl NetworkConfig {
    /// Default pool with proxy settings taken from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            pool: PoolConfig::default(),
            proxy: ProxyConfig::from_lookup(lookup),
        }
    }

    /// Set connection pool configuration.
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set proxy configuration.
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Apply configuration to reqwest ClientBuilder.
    pub fn apply_to_builder(
        &self,
        mut builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder> {
        if let Some(ref proxy) = self.proxy {
            builder = proxy.apply_to_builder(builder)?;
        }

        let pool = &self.pool;
        builder = builder
            .pool_idle_timeout(pool.idle_timeout)
            .pool_max_idle_per_host(pool.max_idle_per_host);

        if let Some(keepalive) = pool.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        if let Some(interval) = pool.http2_keep_alive {
            builder = builder
                .http2_keep_alive_interval(interval)
                .http2_keep_alive_while_idle(true);
        }

        Ok(builder)
    }
}

impl ProxyConfig {
    /// Create from environment variables.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Upper-case names win over lower-case ones.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let https = lookup("HTTPS_PROXY").or_else(|| lookup("https_proxy"));
        let http = lookup("HTTP_PROXY").or_else(|| lookup("http_proxy"));

        if https.is_none() && http.is_none() {
            return None;
        }

        let no_proxy = lookup("NO_PROXY")
            .or_else(|| lookup("no_proxy"))
            .map(|s| {
                s.split([',', ' '])
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            https,
            http,
            no_proxy,
        })
    }

    /// Create with HTTPS proxy.
    pub fn https(url: impl Into<String>) -> Self {
        Self {
            https: Some(url.into()),
            http: None,
            no_proxy: Vec::new(),
        }
    }

    /// Add HTTP proxy.
    pub fn http(mut self, url: impl Into<String>) -> Self {
        self.http = Some(url.into());
        self
    }

    /// Add no-proxy patterns.
    pub fn no_proxy(mut self, patterns: impl IntoIterator<Item = String>) -> Self {
        self.no_proxy.extend(patterns);
        self
    }

    /// Apply proxies to reqwest ClientBuilder.
    pub fn apply_to_builder(
        &self,
        mut builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder> {
        let no_proxy = if self.no_proxy.is_empty() {
            None
        } else {
            reqwest::NoProxy::from_string(&self.no_proxy.join(","))
        };

        if let Some(ref https_url) = self.https {
            let proxy = reqwest::Proxy::https(https_url)
                .map_err(|e| invalid_proxy(https_url, e))?
                .no_proxy(no_proxy.clone());
            builder = builder.proxy(proxy);
        }
        if let Some(ref http_url) = self.http {
            let proxy = reqwest::Proxy::http(http_url)
                .map_err(|e| invalid_proxy(http_url, e))?
                .no_proxy(no_proxy);
            builder = builder.proxy(proxy);
        }
        Ok(builder)
    }
}

fn invalid_proxy(url: &str, source: reqwest::Error) -> Error {
    Error::config(format!("invalid proxy URL '{url}'")).with_source(source)
}
