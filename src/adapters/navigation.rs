//! Page navigation with bounded retry, run inside a pooled browser page.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AdapterError, RequestPacer};
use crate::browser::{BrowserPool, Fingerprint};

/// Per-navigation retry policy. Distinct from job-level retries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavigationPolicy {
    /// Timeout for a single navigation attempt.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts per navigation, the first one included.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Delay before the second attempt; doubles after each failure.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1_000
}

impl Default for NavigationPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl NavigationPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }

    /// Backoff before attempt `attempt + 1` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms)
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Load `url` in a fresh fingerprinted page and return its markup.
pub async fn fetch_markup(
    pool: &BrowserPool,
    pacer: &RequestPacer,
    policy: &NavigationPolicy,
    url: &str,
) -> Result<String, AdapterError> {
    pacer.wait(url).await;

    let target = url.to_string();
    let policy = policy.clone();
    let fingerprint = Fingerprint::random();

    let result = pool
        .with_page(move |page| {
            Box::pin(async move {
                page.apply_fingerprint(&fingerprint).await?;

                let attempts = policy.attempts();
                let mut last_error = String::new();
                for attempt in 1..=attempts {
                    match tokio::time::timeout(policy.timeout(), page.goto(&target)).await {
                        Ok(Ok(())) => {
                            debug!("Loaded {} (attempt {})", target, attempt);
                            return page.content().await;
                        }
                        Ok(Err(e)) => last_error = format!("{:#}", e),
                        Err(_) => last_error = format!("timed out after {:?}", policy.timeout()),
                    }
                    if attempt < attempts {
                        let delay = policy.backoff_after(attempt);
                        warn!(
                            "Navigation to {} failed (attempt {}/{}): {}; retrying in {:?}",
                            target, attempt, attempts, last_error, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }

                Err(AdapterError::Navigation {
                    url: target.clone(),
                    attempts,
                    message: last_error,
                }
                .into())
            })
        })
        .await;

    result.map_err(|e| match e.downcast::<AdapterError>() {
        Ok(adapter_error) => adapter_error,
        Err(other) => AdapterError::Browser(format!("{:#}", other)),
    })
}
