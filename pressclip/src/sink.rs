use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{HarvestError, Result};
use crate::harvest::HarvestedArticle;
use crate::storage::ScheduleStore;

/// Destination for harvested articles.
///
/// `deliver` returns false when the article was already present; the
/// pipeline logs that without counting a new store.
#[async_trait]
pub trait ArticleSink: Send + Sync {
    async fn deliver(
        &self,
        keyword: &str,
        fingerprint: &str,
        article: &HarvestedArticle,
    ) -> Result<bool>;
}

/// Sink writing into the store's `articles` table.
pub struct SqliteSink {
    store: Arc<ScheduleStore>,
}

impl SqliteSink {
    pub fn new(store: Arc<ScheduleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ArticleSink for SqliteSink {
    async fn deliver(
        &self,
        keyword: &str,
        fingerprint: &str,
        article: &HarvestedArticle,
    ) -> Result<bool> {
        // remapped so a failed delivery is recorded per article, not
        // treated as store corruption
        self.store
            .insert_article(keyword, fingerprint, article)
            .await
            .map_err(|e| HarvestError::SinkWrite(e.to_string()))
    }
}
