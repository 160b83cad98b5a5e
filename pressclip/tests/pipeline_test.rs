use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use pressclip::dedup::Deduplicator;
use pressclip::error::{HarvestError, Result};
use pressclip::harvest::{FailureStage, HarvestPipeline, RunOutcome};
use pressclip::llm::Summarize;
use pressclip::retry::RetryPolicy;
use pressclip::scraping::ArticleFetch;
use pressclip::search::{ArticleReference, NewsSearch};
use pressclip::sink::{ArticleSink, SqliteSink};
use pressclip::storage::ScheduleStore;

struct FakeSearch {
    results: Vec<ArticleReference>,
    fail: bool,
}

#[async_trait]
impl NewsSearch for FakeSearch {
    async fn search(&self, _keyword: &str, limit: usize) -> Result<Vec<ArticleReference>> {
        if self.fail {
            return Err(HarvestError::SearchUnavailable("index offline".to_string()));
        }
        let mut results = self.results.clone();
        results.truncate(limit);
        Ok(results)
    }
}

// Fails on the first call, succeeds afterwards.
struct FlakySearch {
    calls: AtomicUsize,
    results: Vec<ArticleReference>,
}

#[async_trait]
impl NewsSearch for FlakySearch {
    async fn search(&self, _keyword: &str, _limit: usize) -> Result<Vec<ArticleReference>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(HarvestError::SearchUnavailable("index offline".to_string()));
        }
        Ok(self.results.clone())
    }
}

struct FakeFetcher {
    broken: Vec<String>,
}

#[async_trait]
impl ArticleFetch for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        if self.broken.iter().any(|b| b == url) {
            return Err(HarvestError::FetchTimeout(format!("{}: timed out", url)));
        }
        Ok(format!("Body of {}", url))
    }
}

struct FakeSummarizer {
    fail: bool,
}

#[async_trait]
impl Summarize for FakeSummarizer {
    async fn summarize(&self, title: &str, _body: &str) -> Result<String> {
        if self.fail {
            return Err(HarvestError::Summarization("model overloaded".to_string()));
        }
        Ok(format!("Summary of {}", title))
    }
}

fn reference(title: &str, link: &str) -> ArticleReference {
    ArticleReference {
        title: title.to_string(),
        link: Some(link.to_string()),
        source: Some("Example Wire".to_string()),
        published: Some(Utc::now()),
    }
}

async fn store_and_dedup() -> (TempDir, Arc<ScheduleStore>, Deduplicator) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("pipeline.db");
    let store = Arc::new(ScheduleStore::open(&path).await.expect("open store"));
    let dedup = Deduplicator::new(store.clone(), 0);
    (dir, store, dedup)
}

fn pipeline(
    search: Arc<dyn NewsSearch>,
    fetcher: Arc<dyn ArticleFetch>,
    summarizer: Arc<dyn Summarize>,
    store: Arc<ScheduleStore>,
    dedup: Deduplicator,
) -> HarvestPipeline {
    let sink: Arc<dyn ArticleSink> = Arc::new(SqliteSink::new(store));
    HarvestPipeline::new(search, fetcher, summarizer, sink, dedup)
        .with_retry(RetryPolicy::new(2, 1))
}

#[tokio::test]
async fn test_mixed_run_accounts_for_every_candidate() {
    let (_dir, store, dedup) = store_and_dedup().await;

    // Two of the five candidates were seen in an earlier run.
    dedup
        .mark_seen("u:https://example.com/old-1", Utc::now())
        .await
        .expect("mark seen");
    dedup
        .mark_seen("u:https://example.com/old-2", Utc::now())
        .await
        .expect("mark seen");

    let search = Arc::new(FakeSearch {
        results: vec![
            reference("Old story one", "https://example.com/old-1"),
            reference("Old story two", "https://example.com/old-2"),
            reference("Paywalled story", "https://example.com/paywalled"),
            reference("Fresh story one", "https://example.com/fresh-1"),
            reference("Fresh story two", "https://example.com/fresh-2"),
        ],
        fail: false,
    });
    let fetcher = Arc::new(FakeFetcher {
        broken: vec!["https://example.com/paywalled".to_string()],
    });
    let summarizer = Arc::new(FakeSummarizer { fail: false });
    let pipeline = pipeline(search, fetcher, summarizer, store, dedup.clone());

    let result = pipeline.run(Some(1), "example").await.expect("run");

    assert_eq!(result.found, 5);
    assert_eq!(result.deduplicated, 2);
    assert_eq!(result.fetch_failed, 1);
    assert_eq!(result.summarized, 2);
    assert_eq!(result.stored, 2);
    assert_eq!(result.outcome, RunOutcome::Partial);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(
        result.found,
        result.deduplicated + result.fetch_failed + result.stored
    );
}

#[tokio::test]
async fn test_second_identical_run_stores_nothing() {
    let (_dir, store, dedup) = store_and_dedup().await;
    let search = Arc::new(FakeSearch {
        results: vec![
            reference("Paywalled story", "https://example.com/paywalled"),
            reference("Fresh story", "https://example.com/fresh"),
        ],
        fail: false,
    });
    let fetcher = Arc::new(FakeFetcher {
        broken: vec!["https://example.com/paywalled".to_string()],
    });
    let summarizer = Arc::new(FakeSummarizer { fail: false });
    let pipeline = pipeline(search, fetcher, summarizer, store, dedup);

    let first = pipeline.run(None, "example").await.expect("first run");
    assert_eq!(first.stored, 1);
    assert_eq!(first.fetch_failed, 1);

    // Everything processed last time was marked seen, including the failure.
    let second = pipeline.run(None, "example").await.expect("second run");
    assert_eq!(second.found, 2);
    assert_eq!(second.deduplicated, 2);
    assert_eq!(second.stored, 0);
    assert_eq!(second.fetch_failed, 0);
    assert_eq!(second.outcome, RunOutcome::Success);
}

#[tokio::test]
async fn test_summarizer_outage_still_delivers_articles() {
    let (_dir, store, dedup) = store_and_dedup().await;
    let search = Arc::new(FakeSearch {
        results: vec![reference("Fresh story", "https://example.com/fresh")],
        fail: false,
    });
    let fetcher = Arc::new(FakeFetcher { broken: vec![] });
    let summarizer = Arc::new(FakeSummarizer { fail: true });
    let pipeline = pipeline(search, fetcher, summarizer, store.clone(), dedup);

    let result = pipeline.run(None, "example").await.expect("run");

    assert_eq!(result.stored, 1);
    assert_eq!(result.summarized, 0);
    assert_eq!(result.outcome, RunOutcome::Partial);
    assert!(result.failures[0].detail.contains("model overloaded"));

    // The article row is present with a NULL summary.
    let summary: Option<String> = sqlx::query_scalar("SELECT summary FROM articles LIMIT 1")
        .fetch_one(store.pool())
        .await
        .expect("select summary");
    assert!(summary.is_none());
}

#[tokio::test]
async fn test_search_outage_is_a_failed_run_with_nothing_delivered() {
    let (_dir, store, dedup) = store_and_dedup().await;
    let search = Arc::new(FakeSearch {
        results: vec![],
        fail: true,
    });
    let fetcher = Arc::new(FakeFetcher { broken: vec![] });
    let summarizer = Arc::new(FakeSummarizer { fail: false });
    let pipeline = pipeline(search, fetcher, summarizer, store, dedup);

    let result = pipeline.run(Some(7), "example").await.expect("run");

    assert_eq!(result.outcome, RunOutcome::Failed);
    assert_eq!(result.found, 0);
    assert_eq!(result.stored, 0);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].stage, FailureStage::Search);
}

#[tokio::test]
async fn test_duplicate_candidates_within_one_run_collapse() {
    let (_dir, store, dedup) = store_and_dedup().await;
    // Same story twice, one link carrying a tracking parameter.
    let search = Arc::new(FakeSearch {
        results: vec![
            reference("Big story", "https://example.com/story"),
            reference("Big story", "https://example.com/story?utm_source=rss"),
        ],
        fail: false,
    });
    let fetcher = Arc::new(FakeFetcher { broken: vec![] });
    let summarizer = Arc::new(FakeSummarizer { fail: false });
    let pipeline = pipeline(search, fetcher, summarizer, store, dedup);

    let result = pipeline.run(None, "example").await.expect("run");

    assert_eq!(result.found, 2);
    assert_eq!(result.deduplicated, 1);
    assert_eq!(result.stored, 1);
}

#[tokio::test]
async fn test_transient_search_failures_are_retried() {
    let (_dir, store, dedup) = store_and_dedup().await;
    let search = Arc::new(FlakySearch {
        calls: AtomicUsize::new(0),
        results: vec![reference("Fresh story", "https://example.com/fresh")],
    });
    let fetcher = Arc::new(FakeFetcher { broken: vec![] });
    let summarizer = Arc::new(FakeSummarizer { fail: false });
    let pipeline = pipeline(search, fetcher, summarizer, store, dedup);

    let result = pipeline.run(None, "example").await.expect("run");

    assert_eq!(result.outcome, RunOutcome::Success);
    assert_eq!(result.stored, 1);
}
