//! Shared connection pools keyed by configuration.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};

use super::HttpClient;
use super::config::Config;
use super::network::NetworkConfig;
use crate::Result;

/// Everything baked into a pooled `reqwest::Client`. The key stays a
/// [`SecretString`] and is only exposed to compare and hash it.
struct PoolKey {
    base_url: String,
    api_key: SecretString,
    network: NetworkConfig,
    timeout: Duration,
}

impl PoolKey {
    fn of(config: &Config) -> Self {
        Self {
            base_url: config.base_url().to_string(),
            api_key: config.api_key().clone(),
            network: config.network().clone(),
            timeout: config.timeout(),
        }
    }
}

impl PartialEq for PoolKey {
    fn eq(&self, other: &Self) -> bool {
        self.base_url == other.base_url
            && self.api_key.expose_secret() == other.api_key.expose_secret()
            && self.network == other.network
            && self.timeout == other.timeout
    }
}

impl Eq for PoolKey {}

impl Hash for PoolKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.base_url.hash(state);
        self.api_key.expose_secret().hash(state);
        self.network.hash(state);
        self.timeout.hash(state);
    }
}

/// Cache of pooled HTTP clients.
///
/// Equal configurations share one connection pool. Every [`HttpClient`]
/// handed out still carries the caller's own [`Config`], so retry settings
/// may differ between clients that share a pool. Entries live until
/// [`clear`](Self::clear) or [`clear_all`](Self::clear_all).
#[derive(Clone, Default)]
pub struct TransportCache {
    pools: Arc<DashMap<PoolKey, reqwest::Client>>,
}

static GLOBAL_CACHE: LazyLock<TransportCache> = LazyLock::new(TransportCache::new);

impl TransportCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache.
    pub fn global() -> &'static TransportCache {
        &GLOBAL_CACHE
    }

    pub fn get_or_create(&self, config: &Config) -> Result<HttpClient> {
        let key = PoolKey::of(config);
        let http = match self.pools.get(&key) {
            Some(entry) => entry.value().clone(),
            None => self
                .pools
                .entry(key)
                .or_try_insert_with(|| {
                    tracing::debug!(base_url = %config.base_url(), "Creating pooled HTTP client");
                    HttpClient::build_http(config)
                })?
                .value()
                .clone(),
        };
        Ok(HttpClient::with_http(config.clone(), http))
    }

    /// Drop the pool for `config`. Returns whether one existed.
    pub fn clear(&self, config: &Config) -> bool {
        self.pools.remove(&PoolKey::of(config)).is_some()
    }

    pub fn clear_all(&self) {
        self.pools.clear();
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

impl fmt::Debug for TransportCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCache")
            .field("pools", &self.pools.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::network::PoolConfig;

    fn config(key: &str) -> Config {
        Config::new("https://api.example.com/v1", key).unwrap()
    }

    #[test]
    fn test_equal_configs_share_pool() {
        let cache = TransportCache::new();
        let a = cache.get_or_create(&config("k1")).unwrap();
        let b = cache.get_or_create(&config("k1")).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(a.config(), b.config());
    }

    #[test]
    fn test_distinct_keys_get_distinct_pools() {
        let cache = TransportCache::new();
        cache.get_or_create(&config("k1")).unwrap();
        cache.get_or_create(&config("k2")).unwrap();

        let other_url = Config::new("https://other.example.com", "k1").unwrap();
        cache.get_or_create(&other_url).unwrap();

        let minimal_pool = Config::builder()
            .base_url("https://api.example.com/v1")
            .api_key("k1")
            .network(NetworkConfig::default().pool(PoolConfig::minimal()))
            .build()
            .unwrap();
        cache.get_or_create(&minimal_pool).unwrap();

        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_client_keeps_own_retry_settings() {
        let cache = TransportCache::new();
        let patient = Config::builder()
            .base_url("https://api.example.com/v1")
            .api_key("k1")
            .max_retries(7)
            .build()
            .unwrap();

        cache.get_or_create(&config("k1")).unwrap();
        let client = cache.get_or_create(&patient).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(client.config().max_retries(), 7);
    }

    #[test]
    fn test_clear() {
        let cache = TransportCache::new();
        cache.get_or_create(&config("k1")).unwrap();
        cache.get_or_create(&config("k2")).unwrap();

        assert!(cache.clear(&config("k1")));
        assert!(!cache.clear(&config("k1")));
        assert_eq!(cache.len(), 1);

        cache.clear_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_debug_hides_keys() {
        let cache = TransportCache::new();
        cache.get_or_create(&config("sk-secret")).unwrap();
        let debug = format!("{:?}", cache);
        assert!(!debug.contains("sk-secret"));
    }

    fn hash_of(key: &PoolKey) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_pool_key_compares_secret_by_value() {
        let a = PoolKey::of(&config("k1"));
        let b = PoolKey::of(&config("k1"));
        let c = PoolKey::of(&config("k2"));

        assert!(a == b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert!(a != c);
        assert_eq!(a.api_key.expose_secret(), "k1");
    }

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(TransportCache::global(), TransportCache::global()));
    }
}
