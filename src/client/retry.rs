//! Retry policy: which failures are retried and how long to wait in between.

use std::collections::BTreeSet;
use std::time::Duration;

use super::config::Config;

/// Upper bound for a computed backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Longest a server-supplied `Retry-After` is slept on. The raw value still
/// reaches the error if the call ends up failing.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);

/// What the transport should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Fail,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    factor: f64,
    status_codes: BTreeSet<u16>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            factor,
            status_codes: super::config::DEFAULT_RETRY_STATUS_CODES.into_iter().collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_retries(),
            initial_delay: config.retry_delay(),
            factor: config.retry_backoff_factor(),
            status_codes: config.retry_status_codes().clone(),
        }
    }

    pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes = codes.into_iter().collect();
        self
    }

    /// Total attempts allowed, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.status_codes.contains(&status)
    }

    /// Backoff before attempt `attempt + 1`: `initial_delay * factor^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    /// Decision after attempt `attempt` got an HTTP error status.
    pub fn on_status(&self, attempt: u32, status: u16, retry_after: Option<u64>) -> RetryDecision {
        if !self.is_retryable_status(status) || attempt >= self.max_attempts {
            return RetryDecision::Fail;
        }
        let delay = retry_after
            .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
            .unwrap_or_else(|| self.delay_for(attempt));
        RetryDecision::Retry { delay }
    }

    /// Decision after attempt `attempt` failed before any status was received.
    pub fn on_network_error(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::Fail;
        }
        RetryDecision::Retry {
            delay: self.delay_for(attempt),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            super::config::DEFAULT_MAX_RETRIES,
            super::config::DEFAULT_RETRY_DELAY,
            super::config::DEFAULT_BACKOFF_FACTOR,
        )
    }
}

/// Parse a `Retry-After` header given as whole seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), 2.0)
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1), 10.0);
        assert_eq!(policy.delay_for(60), MAX_BACKOFF);
    }

    #[test]
    fn test_status_retry_until_budget_exhausted() {
        let policy = policy();
        assert_eq!(
            policy.on_status(1, 500, None),
            RetryDecision::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            policy.on_status(2, 503, None),
            RetryDecision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(policy.on_status(3, 500, None), RetryDecision::Fail);
    }

    #[test]
    fn test_client_errors_not_retried() {
        let policy = policy();
        for status in [400, 401, 403, 404, 422] {
            assert_eq!(policy.on_status(1, status, None), RetryDecision::Fail);
        }
    }

    #[test]
    fn test_retry_after_takes_precedence() {
        let policy = policy();
        assert_eq!(
            policy.on_status(1, 429, Some(2)),
            RetryDecision::Retry {
                delay: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn test_retry_after_is_clamped() {
        let policy = policy();
        assert_eq!(
            policy.on_status(1, 429, Some(99_999_999)),
            RetryDecision::Retry {
                delay: MAX_RETRY_AFTER
            }
        );
        assert_eq!(
            policy.on_status(1, 503, Some(600)),
            RetryDecision::Retry {
                delay: Duration::from_secs(600)
            }
        );
    }

    #[test]
    fn test_custom_status_codes() {
        let policy = policy().with_status_codes([409]);
        assert!(policy.is_retryable_status(409));
        assert!(!policy.is_retryable_status(500));
    }

    #[test]
    fn test_network_errors_share_backoff() {
        let policy = policy();
        assert_eq!(
            policy.on_network_error(2),
            RetryDecision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(policy.on_network_error(3), RetryDecision::Fail);
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(parse_retry_after(&headers), Some(2));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }
}
