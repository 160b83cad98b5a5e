use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use url::Url;

use crate::error::Result;
use crate::search::ArticleReference;
use crate::storage::ScheduleStore;

/// Builds the canonical fingerprint for a search hit.
///
/// Parseable links normalize to `u:<scheme>://<host><path>` with the query,
/// fragment, and trailing slash dropped, so tracking-parameter variants of
/// one URL collapse. Anything else falls back to a
/// `t:<title>|<source>|<date>` tuple.
pub fn fingerprint(reference: &ArticleReference) -> String {
    if let Some(link) = reference.link.as_deref() {
        if let Ok(url) = Url::parse(link) {
            if let Some(host) = url.host_str() {
                // scheme and host are already lowercased by the parser
                let path = url.path().trim_end_matches('/');
                return format!("u:{}://{}{}", url.scheme(), host, path);
            }
        }
    }
    let title = reference.title.trim().to_lowercase();
    let source = reference
        .source
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    let date = reference
        .published
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    format!("t:{}|{}|{}", title, source, date)
}

/// Store-backed seen-set with optional age-based pruning.
#[derive(Clone)]
pub struct Deduplicator {
    store: Arc<ScheduleStore>,
    retention_days: u32,
}

impl Deduplicator {
    /// A `retention_days` of 0 keeps fingerprints forever; the index then
    /// grows with every new article seen.
    pub fn new(store: Arc<ScheduleStore>, retention_days: u32) -> Self {
        Self {
            store,
            retention_days,
        }
    }

    pub async fn seen(&self, fingerprint: &str) -> Result<bool> {
        self.store.is_seen(fingerprint).await
    }

    pub async fn mark_seen(&self, fingerprint: &str, when: DateTime<Utc>) -> Result<()> {
        self.store.mark_seen(fingerprint, when).await
    }

    /// Drops fingerprints older than the retention window.
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<u64> {
        if self.retention_days == 0 {
            return Ok(0);
        }
        let cutoff = now - Duration::days(self.retention_days as i64);
        let removed = self.store.prune_seen_before(cutoff).await?;
        if removed > 0 {
            debug!(removed, "dedup index pruned");
        }
        Ok(removed)
    }
}
