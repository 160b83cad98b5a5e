use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Client;
use tracing::info;
use url::Url;

use crate::error::{HarvestError, Result};

/// Google News RSS search endpoint.
pub const GOOGLE_NEWS_RSS: &str = "https://news.google.com/rss/search";

/// A search hit before fetching; also the fingerprint input.
#[derive(Debug, Clone)]
pub struct ArticleReference {
    pub title: String,
    pub link: Option<String>,
    pub source: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// Keyword search over a news index.
#[async_trait]
pub trait NewsSearch: Send + Sync {
    /// Returns up to `limit` references, most recent first.
    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<ArticleReference>>;
}

/// Searches the Google News RSS endpoint for a keyword.
pub struct GoogleNewsSearch {
    client: Client,
    base_url: String,
    language: String,
    country: String,
}

impl GoogleNewsSearch {
    pub fn new(
        timeout_secs: u64,
        language: impl Into<String>,
        country: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("Pressclip/0.1.0")
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            base_url: GOOGLE_NEWS_RSS.to_string(),
            language: language.into(),
            country: country.into(),
        })
    }

    /// Points the client at a different endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn search_url(&self, keyword: &str) -> Result<Url> {
        let ceid = format!("{}:{}", self.country, self.language);
        Url::parse_with_params(
            &self.base_url,
            &[
                ("q", keyword),
                ("hl", self.language.as_str()),
                ("gl", self.country.as_str()),
                ("ceid", ceid.as_str()),
            ],
        )
        .map_err(|e| HarvestError::SearchUnavailable(format!("bad search URL: {}", e)))
    }
}

#[async_trait]
impl NewsSearch for GoogleNewsSearch {
    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<ArticleReference>> {
        let url = self.search_url(keyword)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HarvestError::SearchUnavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::SearchUnavailable(format!(
                "search returned status {}",
                status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| HarvestError::SearchUnavailable(format!("failed to read feed: {}", e)))?;
        let feed = parser::parse(bytes.as_ref())
            .map_err(|e| HarvestError::SearchUnavailable(format!("feed parse failed: {}", e)))?;

        let mut items: Vec<ArticleReference> =
            feed.entries.iter().map(entry_to_reference).collect();
        items.truncate(limit);
        info!(keyword = %keyword, results = items.len(), "news search complete");
        Ok(items)
    }
}

fn entry_to_reference(entry: &feed_rs::model::Entry) -> ArticleReference {
    let raw_title = entry
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_default();
    let (title, source) = split_source_suffix(&raw_title);
    ArticleReference {
        title: title.to_string(),
        link: entry.links.first().map(|l| l.href.clone()),
        source: source.map(|s| s.to_string()),
        published: entry.published,
    }
}

/// Google News titles carry the outlet as a `" - Source"` suffix; split it
/// off so dedup and display see the bare headline.
fn split_source_suffix(title: &str) -> (&str, Option<&str>) {
    if let Some(idx) = title.rfind(" - ") {
        let (head, tail) = (&title[..idx], &title[idx + 3..]);
        if !head.trim().is_empty() && !tail.trim().is_empty() {
            return (head.trim_end(), Some(tail.trim()));
        }
    }
    (title, None)
}
