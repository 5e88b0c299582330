//! Bounded pool of long-lived browser processes.
//!
//! The pool lends whole processes; pages are single use and closed by
//! [`BrowserPool::with_page`]. Acquisition polls with a sleep while the pool
//! is saturated rather than queueing waiters.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{BrowserLauncher, BrowserProcess, PageHandle, PoolConfig};

/// A process borrowed from the pool. Hand it back with
/// [`BrowserPool::release`].
pub struct PooledBrowser {
    process: Box<dyn BrowserProcess>,
}

impl PooledBrowser {
    pub fn process(&self) -> &dyn BrowserProcess {
        self.process.as_ref()
    }
}

struct PoolState {
    idle: Vec<Box<dyn BrowserProcess>>,
    /// Processes lent out or being launched.
    busy: usize,
}

pub struct BrowserPool {
    launcher: Arc<dyn BrowserLauncher>,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl BrowserPool {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, config: PoolConfig) -> Self {
        info!("Created browser pool (max {} process(es))", config.max_size);
        Self {
            launcher,
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                busy: 0,
            }),
        }
    }

    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    /// Borrow a process, reusing an idle one or launching a new one while
    /// below the limit. Waits while saturated. Launch failures propagate.
    pub async fn acquire(&self) -> Result<PooledBrowser> {
        loop {
            let reserved = {
                let mut state = self.state.lock().await;
                let before = state.idle.len();
                state.idle.retain(|p| p.is_connected());
                if state.idle.len() < before {
                    debug!("Pruned {} disconnected browser(s)", before - state.idle.len());
                }

                if let Some(process) = state.idle.pop() {
                    state.busy += 1;
                    return Ok(PooledBrowser { process });
                }

                if state.idle.len() + state.busy < self.config.max_size {
                    state.busy += 1;
                    true
                } else {
                    false
                }
            };

            if reserved {
                return match self.launcher.launch().await {
                    Ok(process) => {
                        debug!("Launched browser process");
                        Ok(PooledBrowser { process })
                    }
                    Err(e) => {
                        self.state.lock().await.busy -= 1;
                        Err(e.context("failed to launch browser"))
                    }
                };
            }

            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Return a process to the idle set. Disconnected processes are dropped.
    pub async fn release(&self, browser: PooledBrowser) {
        let mut state = self.state.lock().await;
        state.busy = state.busy.saturating_sub(1);
        if browser.process.is_connected() {
            state.idle.push(browser.process);
        } else {
            debug!("Dropping disconnected browser on release");
        }
    }

    /// Run `f` against a fresh page. The page is closed and the process
    /// released on every exit path, panics included.
    pub async fn with_page<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut dyn PageHandle) -> BoxFuture<'a, Result<T>> + Send,
        T: Send,
    {
        let browser = self.acquire().await?;
        let mut page = match browser.process.new_page().await {
            Ok(page) => page,
            Err(e) => {
                self.release(browser).await;
                return Err(e.context("failed to open page"));
            }
        };

        let outcome = AssertUnwindSafe(f(page.as_mut())).catch_unwind().await;

        if let Err(e) = page.close().await {
            debug!("Page close failed: {}", e);
        }
        drop(page);
        self.release(browser).await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Processes alive in the pool, idle or lent out.
    pub async fn live_count(&self) -> usize {
        let state = self.state.lock().await;
        state.idle.len() + state.busy
    }

    pub async fn idle_count(&self) -> usize {
        self.state.lock().await.idle.len()
    }

    /// Close every idle process. Processes currently lent out are untouched.
    pub async fn close_all(&self) -> Result<()> {
        let idle: Vec<_> = {
            let mut state = self.state.lock().await;
            state.idle.drain(..).collect()
        };
        let count = idle.len();
        for process in idle {
            if let Err(e) = process.close().await.context("failed to close browser") {
                warn!("{:#}", e);
            }
        }
        info!("Closed {} browser process(es)", count);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::browser::Fingerprint;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Launcher producing in-memory processes that serve canned markup.
    #[derive(Default)]
    pub struct FakeLauncher {
        pub launched: AtomicUsize,
        pub live: Arc<AtomicUsize>,
        pub peak: Arc<AtomicUsize>,
        pub fail: AtomicBool,
    }

    struct FakeProcess {
        connected: Arc<AtomicBool>,
        live: Arc<AtomicUsize>,
    }

    struct FakePage {
        url: Option<String>,
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self) -> Result<Box<dyn BrowserProcess>> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("no chrome");
            }
            self.launched.fetch_add(1, Ordering::SeqCst);
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(FakeProcess {
                connected: Arc::new(AtomicBool::new(true)),
                live: self.live.clone(),
            }))
        }
    }

    impl Drop for FakeProcess {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl BrowserProcess for FakeProcess {
        async fn new_page(&self) -> Result<Box<dyn PageHandle>> {
            Ok(Box::new(FakePage { url: None }))
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn close(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl PageHandle for FakePage {
        async fn apply_fingerprint(&mut self, _fingerprint: &Fingerprint) -> Result<()> {
            Ok(())
        }

        async fn goto(&mut self, url: &str) -> Result<()> {
            self.url = Some(url.to_string());
            Ok(())
        }

        async fn content(&mut self) -> Result<String> {
            Ok(format!(
                "<html><body>{}</body></html>",
                self.url.as_deref().unwrap_or("")
            ))
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn pool(launcher: Arc<FakeLauncher>, max: usize) -> BrowserPool {
        BrowserPool::new(
            launcher,
            PoolConfig {
                max_size: max,
                poll_interval_ms: 5,
            },
        )
    }

    #[tokio::test]
    async fn third_acquire_waits_for_release() {
        let launcher = Arc::new(FakeLauncher::default());
        let pool = Arc::new(pool(launcher.clone(), 2));

        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.live_count().await, 2);

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 2);

        pool.release(a).await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 2);
        assert!(launcher.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn concurrent_pages_never_exceed_max() {
        let launcher = Arc::new(FakeLauncher::default());
        let pool = Arc::new(pool(launcher.clone(), 2));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                let url = format!("https://example.com/{}", i);
                pool.with_page(move |page| {
                    Box::pin(async move {
                        page.goto(&url).await?;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        page.content().await
                    })
                })
                .await
            }));
        }
        for task in tasks {
            let html = task.await.unwrap().unwrap();
            assert!(html.contains("https://example.com/"));
        }
        assert!(launcher.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.idle_count().await, pool.live_count().await);
    }

    #[tokio::test]
    async fn with_page_releases_on_error_and_panic() {
        let launcher = Arc::new(FakeLauncher::default());
        let pool = Arc::new(pool(launcher.clone(), 1));

        let result: Result<()> = pool
            .with_page(|_page| Box::pin(async move { Err::<(), _>(anyhow::anyhow!("boom")) }))
            .await;
        assert!(result.is_err());
        assert_eq!(pool.idle_count().await, 1);

        let panicking = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.with_page(|_page| {
                    Box::pin(async move {
                        if true {
                            panic!("adapter bug");
                        }
                        Ok::<(), anyhow::Error>(())
                    })
                })
                .await
            })
        };
        assert!(panicking.await.is_err());
        assert_eq!(pool.idle_count().await, 1);
        assert_eq!(pool.live_count().await, 1);
    }

    #[tokio::test]
    async fn launch_failure_propagates_and_frees_slot() {
        let launcher = Arc::new(FakeLauncher::default());
        launcher.fail.store(true, Ordering::SeqCst);
        let pool = pool(launcher.clone(), 1);

        assert!(pool.acquire().await.is_err());
        assert_eq!(pool.live_count().await, 0);

        launcher.fail.store(false, Ordering::SeqCst);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn disconnected_idle_processes_are_pruned() {
        let launcher = Arc::new(FakeLauncher::default());
        let pool = pool(launcher.clone(), 1);

        let browser = pool.acquire().await.unwrap();
        browser.process().close().await.unwrap();
        pool.release(browser).await;
        assert_eq!(pool.live_count().await, 0);

        let _again = pool.acquire().await.unwrap();
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 2);
    }
}
