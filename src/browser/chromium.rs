//! Chrome DevTools launcher built on chromiumoxide.

use super::BrowserEngineConfig;

/// Launches local Chrome processes or connects to a remote DevTools endpoint.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: BrowserEngineConfig,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self { config }
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait::async_trait]
impl super::BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> anyhow::Result<Box<dyn super::BrowserProcess>> {
        let _ = &self.config;
        anyhow::bail!("browser support not compiled in; rebuild with --features browser")
    }
}

#[cfg(feature = "browser")]
mod engine {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
    use chromiumoxide::cdp::browser_protocol::network::{
        Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
    };
    use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
    use chromiumoxide::handler::Handler;
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;
    use tracing::{debug, info};

    use super::ChromiumLauncher;
    use crate::browser::{BrowserLauncher, BrowserProcess, Fingerprint, PageHandle};

    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &[&str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    fn find_chrome() -> Result<std::path::PathBuf> {
        for path in CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                debug!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        debug!("Found Chrome in PATH: {}", path);
                        return Ok(std::path::PathBuf::from(path));
                    }
                }
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Install it or set BROWSER_URL to a remote DevTools endpoint"
        ))
    }

    impl ChromiumLauncher {
        async fn launch_local(&self) -> Result<(Browser, Handler)> {
            let chrome_path = find_chrome()?;
            info!("Launching browser (headless={})", self.config.headless);

            let mut builder = BrowserConfig::builder()
                .chrome_executable(chrome_path)
                .launch_timeout(self.config.launch_timeout());
            if !self.config.headless {
                builder = builder.with_head();
            }
            if let Some(ref proxy) = self.config.proxy {
                builder = builder.arg(format!("--proxy-server={}", proxy));
            }

            builder = builder
                .arg("--disable-blink-features=AutomationControlled")
                .arg("--disable-infobars")
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--no-default-browser-check")
                .arg("--disable-background-networking")
                .arg("--disable-sync")
                .arg("--disable-translate")
                .arg("--metrics-recording-only")
                .arg("--no-sandbox")
                .arg("--disable-gpu");

            for arg in &self.config.chrome_args {
                builder = builder.arg(arg);
            }

            let config = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

            Browser::launch(config)
                .await
                .context("Failed to launch browser")
        }

        async fn connect_remote(&self, url: &str) -> Result<(Browser, Handler)> {
            info!("Connecting to remote browser at {}", url);

            let http_url = url
                .replace("ws://", "http://")
                .replace("wss://", "https://");
            let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

            let resp: serde_json::Value = reqwest::Client::new()
                .get(&version_url)
                .timeout(self.config.launch_timeout())
                .send()
                .await
                .context("Failed to reach remote browser")?
                .json()
                .await
                .context("Failed to parse browser version info")?;

            let ws_url = resp
                .get("webSocketDebuggerUrl")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow::anyhow!("No webSocketDebuggerUrl in response"))?;

            Browser::connect(ws_url)
                .await
                .context("Failed to connect to remote browser")
        }
    }

    #[async_trait]
    impl BrowserLauncher for ChromiumLauncher {
        async fn launch(&self) -> Result<Box<dyn BrowserProcess>> {
            let remote = self.config.remote_url.clone();
            let (browser, mut handler) = match remote.as_deref() {
                Some(url) => self.connect_remote(url).await?,
                None => self.launch_local().await?,
            };

            let connected = Arc::new(AtomicBool::new(true));
            let flag = connected.clone();
            let handler_task = tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
                flag.store(false, Ordering::SeqCst);
                debug!("Browser handler finished");
            });

            Ok(Box::new(ChromiumProcess {
                browser: Mutex::new(browser),
                connected,
                remote: remote.is_some(),
                handler_task,
            }))
        }
    }

    /// One Chrome process (or remote connection) with its CDP handler task.
    pub struct ChromiumProcess {
        browser: Mutex<Browser>,
        connected: Arc<AtomicBool>,
        remote: bool,
        handler_task: JoinHandle<()>,
    }

    #[async_trait]
    impl BrowserProcess for ChromiumProcess {
        async fn new_page(&self) -> Result<Box<dyn PageHandle>> {
            let browser = self.browser.lock().await;
            let page = browser
                .new_page("about:blank")
                .await
                .context("Failed to open page")?;
            Ok(Box::new(ChromiumPage { page: Some(page) }))
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst) && !self.handler_task.is_finished()
        }

        async fn close(&self) -> Result<()> {
            // Remote browsers are shared; only drop our connection.
            if !self.remote {
                let mut browser = self.browser.lock().await;
                browser.close().await.context("Failed to close browser")?;
                let _ = browser.wait().await;
            }
            self.handler_task.abort();
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    pub struct ChromiumPage {
        page: Option<Page>,
    }

    impl ChromiumPage {
        fn page(&self) -> Result<&Page> {
            self.page
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("page already closed"))
        }
    }

    #[async_trait]
    impl PageHandle for ChromiumPage {
        async fn apply_fingerprint(&mut self, fingerprint: &Fingerprint) -> Result<()> {
            let page = self.page()?;

            let mut ua = SetUserAgentOverrideParams::new(fingerprint.user_agent.clone());
            ua.accept_language = Some(fingerprint.accept_language.clone());
            ua.platform = Some(fingerprint.platform().to_string());
            page.execute(ua).await?;

            let (width, height) = fingerprint.viewport;
            page.execute(SetDeviceMetricsOverrideParams::new(
                width as i64,
                height as i64,
                1.0,
                false,
            ))
            .await?;

            let headers: serde_json::Map<String, serde_json::Value> = fingerprint
                .headers()
                .into_iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
                .collect();
            page.execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::Value::Object(headers),
            )))
            .await?;

            for script in fingerprint.scripts() {
                page.execute(AddScriptToEvaluateOnNewDocumentParams::new(script))
                    .await?;
            }
            Ok(())
        }

        async fn goto(&mut self, url: &str) -> Result<()> {
            let page = self.page()?;
            page.goto(url)
                .await
                .with_context(|| format!("Navigation to {} failed", url))?;
            Ok(())
        }

        async fn content(&mut self) -> Result<String> {
            Ok(self.page()?.content().await?)
        }

        async fn close(&mut self) -> Result<()> {
            if let Some(page) = self.page.take() {
                page.close().await?;
            }
            Ok(())
        }
    }
}
