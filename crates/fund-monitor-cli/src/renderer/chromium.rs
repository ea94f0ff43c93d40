//! Headless Chromium behind the renderer traits.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;

use super::{NavigationTimeout, RenderContext, Renderer};

/// Environment variable pointing at a Chromium binary.
pub const CHROMIUM_PATH_VAR: &str = "FUND_MONITOR_CHROMIUM_PATH";

/// Install locations below `~/.fund-monitor/chromium`.
#[cfg(target_os = "macos")]
const BUNDLED: &[&str] = &[
    "chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
    "chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
    "chrome",
];
#[cfg(not(target_os = "macos"))]
const BUNDLED: &[&str] = &["chrome-linux64/chrome", "chrome"];

const ON_PATH: [&str; 3] = ["google-chrome", "chromium", "chromium-browser"];

/// Locate a browser: the env override if it exists, then the per-user
/// install, then `PATH`.
pub fn find_chromium() -> Option<PathBuf> {
    std::env::var_os(CHROMIUM_PATH_VAR)
        .map(PathBuf::from)
        .filter(|p| p.exists())
        .or_else(|| {
            let root = dirs::home_dir()?.join(".fund-monitor").join("chromium");
            bundled_binary(&root)
        })
        .or_else(|| ON_PATH.into_iter().find_map(|name| which::which(name).ok()))
}

fn bundled_binary(root: &Path) -> Option<PathBuf> {
    BUNDLED.iter().map(|rel| root.join(rel)).find(|p| p.exists())
}

/// One browser process. Each session gets its own.
pub struct ChromiumRenderer {
    browser: Mutex<Browser>,
}

impl ChromiumRenderer {
    pub async fn new() -> Result<Self> {
        let executable = find_chromium().with_context(|| {
            format!("Chromium not found. Install Chrome or set {CHROMIUM_PATH_VAR}.")
        })?;

        let config = BrowserConfig::builder()
            .chrome_executable(executable)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--window-size=1920,1080")
            .build()
            .map_err(|e| anyhow!("invalid browser config: {e}"))?;

        let (browser, mut events) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // The CDP connection only advances while its event stream is polled.
        tokio::spawn(async move { while events.next().await.is_some() {} });

        Ok(Self {
            browser: Mutex::new(browser),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .context("failed to open a tab")?;
        Ok(Box::new(ChromiumContext { page }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        browser.close().await.context("failed to close Chromium")?;
        let _ = browser.wait().await;
        Ok(())
    }
}

pub struct ChromiumContext {
    page: Page,
}

impl ChromiumContext {
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T> {
        self.page
            .evaluate(script)
            .await
            .context("script failed")?
            .into_value()
            .map_err(|e| anyhow!("unexpected script result: {e:?}"))
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<()> {
        let started = Instant::now();
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.page.goto(url)).await {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;
                tracing::debug!("Loaded {url} in {}ms", started.elapsed().as_millis());
                Ok(())
            }
            Ok(Err(e)) => bail!("could not load {url}: {e}"),
            Err(_) => Err(NavigationTimeout { timeout_ms }.into()),
        }
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        self.eval(script).await
    }

    async fn get_html(&self) -> Result<String> {
        self.eval("document.documentElement.outerHTML").await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let _ = self.page.close().await;
        Ok(())
    }
}
