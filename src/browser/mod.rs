//! Headless browser layer.
//!
//! The CDP engine sits behind three small traits so the pool and adapters
//! can be driven by a fake in tests:
//! - [`BrowserLauncher`] starts (or connects to) one browser process
//! - [`BrowserProcess`] is a long-lived process that opens pages
//! - [`PageHandle`] is a single-use tab

mod chromium;
mod config;
mod pool;
mod stealth;

use anyhow::Result;
use async_trait::async_trait;

pub use chromium::ChromiumLauncher;
pub use config::{BrowserEngineConfig, PoolConfig};
pub use pool::{BrowserPool, PooledBrowser};
pub use stealth::{random_user_agent, Fingerprint, USER_AGENTS, VIEWPORTS};

#[cfg(test)]
pub(crate) use pool::tests::FakeLauncher;

/// A single browser tab.
#[async_trait]
pub trait PageHandle: Send {
    /// Apply user agent, viewport, headers and property overrides. Must run
    /// before the first navigation.
    async fn apply_fingerprint(&mut self, fingerprint: &Fingerprint) -> Result<()>;

    /// Navigate and wait for the load to finish.
    async fn goto(&mut self, url: &str) -> Result<()>;

    /// Current document markup.
    async fn content(&mut self) -> Result<String>;

    async fn close(&mut self) -> Result<()>;
}

/// A long-lived browser process owned by the pool.
#[async_trait]
pub trait BrowserProcess: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>>;

    /// False once the process or its connection is gone.
    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserProcess>>;
}
