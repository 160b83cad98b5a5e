use std::io::Cursor;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{HarvestError, Result};

/// Fetches an article page and extracts its readable text.
///
/// An empty extraction counts as a failure; the pipeline records it instead
/// of delivering a blank article.
#[async_trait]
pub trait ArticleFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Plain HTTP fetcher with readability extraction. Pages that require a
/// scripted browser fail here and are recorded as fetch failures.
pub struct HttpArticleFetcher {
    client: Client,
}

impl HttpArticleFetcher {
    pub fn new(timeout_secs: u64, user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArticleFetch for HttpArticleFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                HarvestError::FetchTimeout(format!("{}: timed out", url))
            } else {
                HarvestError::FetchTimeout(format!("{}: {}", url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::FetchTimeout(format!("{}: status {}", url, status)));
        }

        // readability needs a reader plus the page URL to resolve links
        let bytes = response
            .bytes()
            .await
            .map_err(|e| HarvestError::FetchTimeout(format!("{}: body read failed: {}", url, e)))?;
        let mut reader = Cursor::new(bytes);
        let url_obj = url::Url::parse(url)
            .map_err(|e| HarvestError::FetchTimeout(format!("{}: bad URL: {}", url, e)))?;

        let product = readability::extractor::extract(&mut reader, &url_obj)
            .map_err(|e| HarvestError::FetchTimeout(format!("{}: extraction failed: {}", url, e)))?;

        // Markdown-ish text reads better for the summarizer; fall back to
        // readability's plain text when conversion fails.
        let text = match html2text::from_read(product.content.as_bytes(), 80) {
            Ok(markdown) => markdown,
            Err(e) => {
                warn!(url = %url, "html2text conversion failed, using plain text: {}", e);
                product.text
            }
        };

        if text.trim().is_empty() {
            return Err(HarvestError::FetchTimeout(format!(
                "{}: page yielded no readable text",
                url
            )));
        }

        debug!(url = %url, chars = text.len(), "article content extracted");
        Ok(text)
    }
}
