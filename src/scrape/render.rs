//! Headless Chromium rendering via chromiumoxide.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{EventDomContentEventFired, NavigateParams};
use chromiumoxide::Page;
use futures::StreamExt;
use tracing::debug;

use super::acquire::PageRenderer;

const BODY_TEXT_JS: &str = "document.body ? document.body.innerText : ''";

/// Launches a fresh headless browser per acquisition and always closes it.
pub struct ChromiumRenderer {
    executable: Option<PathBuf>,
}

impl ChromiumRenderer {
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self { executable }
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))
    }

    /// Navigate and return once DOMContentLoaded fires, without waiting
    /// for the load event (images, fonts, late scripts).
    async fn navigate(page: &Page, url: &str) -> Result<()> {
        let mut dom_ready = page
            .event_listener::<EventDomContentEventFired>()
            .await
            .context("failed to subscribe to DOMContentLoaded")?;
        let navigated = page
            .execute(NavigateParams::new(url))
            .await
            .context("navigate command failed")?;
        check_navigation(navigated.result.error_text.as_deref())?;
        dom_ready
            .next()
            .await
            .context("page closed before DOMContentLoaded")?;
        Ok(())
    }

    async fn body_text(browser: &Browser, url: &str, timeout_ms: u64) -> Result<String> {
        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        match tokio::time::timeout(Duration::from_millis(timeout_ms), Self::navigate(&page, url)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => bail!("navigation failed: {e:#}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }

        page.evaluate(BODY_TEXT_JS)
            .await
            .context("failed to read body text")?
            .into_value::<String>()
            .map_err(|e| anyhow::anyhow!("failed to convert body text: {e:?}"))
    }
}

/// Chrome reports DNS/TLS/HTTP-level navigation failures as `errorText`.
fn check_navigation(error_text: Option<&str>) -> Result<()> {
    match error_text {
        Some(error) if !error.is_empty() => bail!("{error}"),
        _ => Ok(()),
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    async fn render_text(&self, url: &str, timeout_ms: u64) -> Result<String> {
        let (mut browser, mut handler) = Browser::launch(self.browser_config()?)
            .await
            .context("failed to launch Chromium")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let result = Self::body_text(&browser, url, timeout_ms).await;

        // Released on success and failure alike.
        if let Err(e) = browser.close().await {
            debug!(url, "browser close failed: {}", e);
        }
        let _ = browser.wait().await;
        handler_task.abort();

        result
    }
}
