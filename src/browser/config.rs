//! Browser and pool configuration types.
//!
//! These live outside `#[cfg(feature = "browser")]` so config parsing works
//! without the CDP engine compiled in.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How browser processes are launched or reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrowserEngineConfig {
    /// Run in headless mode (default: true).
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to an existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Launch/connect timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_headless() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            proxy: None,
            chrome_args: Vec::new(),
            remote_url: None,
            timeout: default_timeout(),
        }
    }
}

impl BrowserEngineConfig {
    /// Apply environment variable overrides.
    ///
    /// - `BROWSER_URL` - Remote Chrome DevTools URL
    /// - `SOCKS_PROXY` - Proxy for browser traffic (e.g., "socks5://127.0.0.1:9050")
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("BROWSER_URL") {
            if !val.trim().is_empty() {
                self.remote_url = Some(val.trim().to_string());
            }
        }
        if let Ok(val) = std::env::var("SOCKS_PROXY") {
            if !val.trim().is_empty() {
                self.proxy = Some(val.trim().to_string());
            }
        }
        self
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }
}

/// Bounds for the browser pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Maximum number of live browser processes.
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Sleep between acquisition attempts while the pool is saturated.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_max_size() -> usize {
    3
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl PoolConfig {
    /// - `COMICRAWL_POOL_MAX` - maximum live browser processes
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(max) = std::env::var("COMICRAWL_POOL_MAX")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|v| *v > 0)
        {
            self.max_size = max;
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize tests that touch them.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn env_overrides_remote_url_and_proxy() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::set_var("BROWSER_URL", "ws://chrome:9222");
        std::env::set_var("SOCKS_PROXY", "socks5://127.0.0.1:9050");

        let config = BrowserEngineConfig::default().with_env_overrides();
        assert_eq!(config.remote_url.as_deref(), Some("ws://chrome:9222"));
        assert_eq!(config.proxy.as_deref(), Some("socks5://127.0.0.1:9050"));

        std::env::remove_var("BROWSER_URL");
        std::env::remove_var("SOCKS_PROXY");
    }

    #[test]
    fn pool_max_ignores_garbage() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::set_var("COMICRAWL_POOL_MAX", "zero");
        assert_eq!(PoolConfig::default().with_env_overrides().max_size, 3);

        std::env::set_var("COMICRAWL_POOL_MAX", "5");
        assert_eq!(PoolConfig::default().with_env_overrides().max_size, 5);
        std::env::remove_var("COMICRAWL_POOL_MAX");
    }
}
