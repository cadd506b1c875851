use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::fragment;
use super::types::{AcquisitionResult, FRAGMENT_MARKER};

const UNSUPPORTED_EXTENSIONS: &[&str] = &[".pdf", ".jpg", ".jpeg", ".png", ".gif", ".webp"];
const UNSUPPORTED_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

/// Primary strategy: a headless browser that returns the rendered body text.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render_text(&self, url: &str, timeout_ms: u64) -> Result<String>;
}

/// Raw HTTP response captured by the fallback strategy.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub body: String,
}

/// Fallback strategy: a plain GET with its own short timeout.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// Anything that can turn one URL into an [`AcquisitionResult`].
#[async_trait]
pub trait Acquirer: Send + Sync {
    async fn acquire(&self, url: &str, timeout_ms: u64) -> AcquisitionResult;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create fallback HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("Fallback request failed")?;
        let status = resp.status().as_u16();
        let body = resp.text().await.context("Failed to read fallback body")?;
        Ok(FetchedPage { status, body })
    }
}

/// Strip the text-fragment directive, leaving the URL to navigate to.
pub fn clean_url(url: &str) -> &str {
    url.split(FRAGMENT_MARKER).next().unwrap_or(url)
}

/// PDFs, raster images and video pages carry no highlightable text.
pub fn is_unsupported(clean_url: &str) -> bool {
    match url::Url::parse(clean_url) {
        Ok(parsed) => {
            let path = parsed.path().to_lowercase();
            let host = parsed.host_str().unwrap_or("").to_lowercase();
            UNSUPPORTED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
                || UNSUPPORTED_HOSTS
                    .iter()
                    .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
        }
        Err(_) => {
            let lower = clean_url.to_lowercase();
            UNSUPPORTED_EXTENSIONS.iter().any(|ext| lower.contains(ext))
                || UNSUPPORTED_HOSTS.iter().any(|h| lower.contains(h))
        }
    }
}

/// Render-then-fetch acquisition of a single reference URL.
pub struct ContentAcquirer {
    renderer: Arc<dyn PageRenderer>,
    fetcher: Arc<dyn PageFetcher>,
}

impl ContentAcquirer {
    pub fn new(renderer: Arc<dyn PageRenderer>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { renderer, fetcher }
    }

    async fn fallback(&self, url: &str, clean: &str) -> AcquisitionResult {
        match self.fetcher.fetch(clean).await {
            // Degraded capture: the raw body, no anchor resolution.
            Ok(page) if page.status == 200 => AcquisitionResult::Ok(page.body),
            Ok(page) => {
                debug!(url, status = page.status, "fallback returned non-200");
                AcquisitionResult::Error(format!("error - {}", page.status))
            }
            Err(e) => {
                warn!(url, "fallback request failed: {:#}", e);
                AcquisitionResult::Error(format!("error - {:#}", e))
            }
        }
    }
}

#[async_trait]
impl Acquirer for ContentAcquirer {
    async fn acquire(&self, url: &str, timeout_ms: u64) -> AcquisitionResult {
        let clean = clean_url(url);
        if is_unsupported(clean) {
            return AcquisitionResult::UnsupportedFormat;
        }
        if !url.contains(FRAGMENT_MARKER) {
            return AcquisitionResult::NoAnchor;
        }

        match self.renderer.render_text(clean, timeout_ms).await {
            Ok(body_text) => match fragment::resolve(url, &body_text) {
                Some(span) => AcquisitionResult::Ok(span),
                None => AcquisitionResult::MatchError,
            },
            Err(e) => {
                warn!(url, "render failed, falling back to HTTP: {:#}", e);
                self.fallback(url, clean).await
            }
        }
    }
}
