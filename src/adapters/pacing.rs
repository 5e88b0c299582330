//! Randomized per-domain request pacing.
//!
//! Each request to a domain is scheduled a random delay after the previous
//! one, so concurrent crawls against the same site stay staggered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::normalize_domain;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacingConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_min_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    3_000
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl PacingConfig {
    /// No delay at all; used for tests and local fixtures.
    pub fn disabled() -> Self {
        Self {
            min_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Uniform random delay between the bounds.
    pub fn random_delay(&self) -> Duration {
        let (lo, hi) = if self.min_delay_ms <= self.max_delay_ms {
            (self.min_delay_ms, self.max_delay_ms)
        } else {
            (self.max_delay_ms, self.min_delay_ms)
        };
        if hi == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }
}

/// Tracks the last scheduled request per domain.
#[derive(Debug, Clone)]
pub struct RequestPacer {
    config: PacingConfig,
    domains: Arc<RwLock<HashMap<String, Instant>>>,
}

impl RequestPacer {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            domains: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Wait for this request's slot on the URL's domain. Returns the time
    /// actually waited.
    pub async fn wait(&self, url: &str) -> Duration {
        let domain = normalize_domain(url).unwrap_or_else(|_| url.to_string());
        let delay = self.config.random_delay();

        let start = {
            let mut domains = self.domains.write().await;
            let now = Instant::now();
            let start = match domains.get(&domain) {
                Some(last) => (*last + delay).max(now),
                None => now,
            };
            domains.insert(domain.clone(), start);
            start
        };

        let waited = start.saturating_duration_since(Instant::now());
        if !waited.is_zero() {
            debug!("Pacing {}: waiting {:?}", domain, waited);
            tokio::time::sleep_until(start).await;
        }
        waited
    }

    /// When the last request to `domain` was scheduled.
    pub async fn last_request(&self, domain: &str) -> Option<Instant> {
        self.domains.read().await.get(domain).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_delay_stays_in_bounds() {
        let config = PacingConfig {
            min_delay_ms: 10,
            max_delay_ms: 20,
        };
        for _ in 0..50 {
            let d = config.random_delay();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
        assert_eq!(PacingConfig::disabled().random_delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn second_request_to_same_domain_waits() {
        let pacer = RequestPacer::new(PacingConfig {
            min_delay_ms: 50,
            max_delay_ms: 50,
        });

        assert_eq!(pacer.wait("https://example.com/a").await, Duration::ZERO);
        let started = std::time::Instant::now();
        let waited = pacer.wait("https://www.example.com/b").await;
        assert!(waited > Duration::ZERO && waited <= Duration::from_millis(50));
        assert!(started.elapsed() >= waited);

        // Other domains are independent.
        assert_eq!(pacer.wait("https://other.org/a").await, Duration::ZERO);
        assert!(pacer.last_request("example.com").await.is_some());
    }
}
