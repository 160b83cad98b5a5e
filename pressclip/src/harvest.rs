use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dedup::{fingerprint, Deduplicator};
use crate::error::{HarvestError, Result};
use crate::llm::Summarize;
use crate::retry::RetryPolicy;
use crate::scraping::ArticleFetch;
use crate::search::{ArticleReference, NewsSearch};
use crate::sink::ArticleSink;

/// A fetched article ready for delivery. `summary` is None when
/// summarization failed; the article is delivered anyway.
#[derive(Debug, Clone)]
pub struct HarvestedArticle {
    pub reference: ArticleReference,
    pub body: Option<String>,
    pub summary: Option<String>,
}

/// Pipeline stage where an article was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Search,
    Fetch,
    Summarize,
    Deliver,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleFailure {
    pub stage: FailureStage,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Partial,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Partial => "partial",
            RunOutcome::Failed => "failed",
        }
    }
}

/// Accounting record of one pipeline run; appended to the execution log.
/// Every candidate in `found` ends up deduplicated, fetch-failed, or
/// handed to the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub schedule_id: Option<i64>,
    pub keyword: String,
    pub started_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub found: usize,
    pub deduplicated: usize,
    pub fetch_failed: usize,
    pub summarized: usize,
    pub stored: usize,
    pub failures: Vec<ArticleFailure>,
}

impl RunResult {
    fn start(schedule_id: Option<i64>, keyword: &str) -> Self {
        Self {
            schedule_id,
            keyword: keyword.to_string(),
            started_at: Utc::now(),
            outcome: RunOutcome::Success,
            found: 0,
            deduplicated: 0,
            fetch_failed: 0,
            summarized: 0,
            stored: 0,
            failures: Vec::new(),
        }
    }
}

enum Processed {
    Fetched {
        fp: String,
        reference: ArticleReference,
        body: String,
        summary: Result<String>,
    },
    FetchFailed {
        fp: String,
        reference: ArticleReference,
        error: String,
    },
}

/// Runs one keyword end to end: search, dedup, fetch, summarize, deliver.
///
/// Adapter failures fold into the returned `RunResult`; only dedup-index
/// and store failures propagate as `Err`.
pub struct HarvestPipeline {
    search: Arc<dyn NewsSearch>,
    fetcher: Arc<dyn ArticleFetch>,
    summarizer: Arc<dyn Summarize>,
    sink: Arc<dyn ArticleSink>,
    dedup: Deduplicator,
    retry: RetryPolicy,
    max_results: usize,
    concurrency: usize,
}

impl HarvestPipeline {
    pub fn new(
        search: Arc<dyn NewsSearch>,
        fetcher: Arc<dyn ArticleFetch>,
        summarizer: Arc<dyn Summarize>,
        sink: Arc<dyn ArticleSink>,
        dedup: Deduplicator,
    ) -> Self {
        Self {
            search,
            fetcher,
            summarizer,
            sink,
            dedup,
            retry: RetryPolicy::default(),
            max_results: 10,
            concurrency: 4,
        }
    }

    pub fn with_limits(mut self, max_results: usize, concurrency: usize) -> Self {
        self.max_results = max_results.max(1);
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn run(&self, schedule_id: Option<i64>, keyword: &str) -> Result<RunResult> {
        let mut result = RunResult::start(schedule_id, keyword);

        let candidates = match self
            .retry
            .run("search", || self.search.search(keyword, self.max_results))
            .await
        {
            Ok(candidates) => candidates,
            Err(HarvestError::Store(e)) => return Err(HarvestError::Store(e)),
            Err(e) => {
                warn!(keyword = %keyword, "search failed, recording failed run: {}", e);
                result.outcome = RunOutcome::Failed;
                result.failures.push(ArticleFailure {
                    stage: FailureStage::Search,
                    detail: e.to_string(),
                });
                return Ok(result);
            }
        };
        result.found = candidates.len();

        // Filter against the persistent index and within this run, so two
        // hits normalizing to one fingerprint cannot both proceed.
        let mut in_run: HashSet<String> = HashSet::new();
        let mut fresh: Vec<(String, ArticleReference)> = Vec::new();
        for candidate in candidates {
            let fp = fingerprint(&candidate);
            if in_run.contains(&fp) || self.dedup.seen(&fp).await? {
                result.deduplicated += 1;
                continue;
            }
            in_run.insert(fp.clone());
            fresh.push((fp, candidate));
        }

        // Bounded fan-out for the slow part (network + model), then a
        // serialized completion pass below: one writer over the dedup
        // index and the sink.
        let outcomes: Vec<Processed> = stream::iter(fresh)
            .map(|(fp, reference)| async move {
                let link = match reference.link.as_deref() {
                    Some(link) => link.to_string(),
                    None => {
                        return Processed::FetchFailed {
                            fp,
                            reference,
                            error: "article has no link".to_string(),
                        }
                    }
                };
                match self.fetcher.fetch(&link).await {
                    Ok(body) => {
                        let summary = self.summarizer.summarize(&reference.title, &body).await;
                        Processed::Fetched {
                            fp,
                            reference,
                            body,
                            summary,
                        }
                    }
                    Err(e) => Processed::FetchFailed {
                        fp,
                        reference,
                        error: e.to_string(),
                    },
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Processed::Fetched {
                    fp,
                    reference,
                    body,
                    summary,
                } => {
                    self.dedup.mark_seen(&fp, Utc::now()).await?;
                    let summary = match summary {
                        Ok(summary) => {
                            result.summarized += 1;
                            Some(summary)
                        }
                        Err(e) => {
                            warn!(
                                title = %reference.title,
                                "summarization failed, delivering without summary: {}", e
                            );
                            result.failures.push(ArticleFailure {
                                stage: FailureStage::Summarize,
                                detail: format!("{}: {}", reference.title, e),
                            });
                            None
                        }
                    };
                    let article = HarvestedArticle {
                        reference,
                        body: Some(body),
                        summary,
                    };
                    match self
                        .retry
                        .run("deliver", || self.sink.deliver(keyword, &fp, &article))
                        .await
                    {
                        Ok(true) => result.stored += 1,
                        Ok(false) => debug!(fingerprint = %fp, "article already delivered"),
                        Err(e) => {
                            warn!(title = %article.reference.title, "delivery failed: {}", e);
                            result.failures.push(ArticleFailure {
                                stage: FailureStage::Deliver,
                                detail: format!("{}: {}", article.reference.title, e),
                            });
                        }
                    }
                }
                Processed::FetchFailed {
                    fp,
                    reference,
                    error,
                } => {
                    // failed fetches are marked seen too; they are not
                    // retried on the next run
                    self.dedup.mark_seen(&fp, Utc::now()).await?;
                    result.fetch_failed += 1;
                    result.failures.push(ArticleFailure {
                        stage: FailureStage::Fetch,
                        detail: format!("{}: {}", reference.title, error),
                    });
                }
            }
        }

        if !result.failures.is_empty() {
            result.outcome = RunOutcome::Partial;
        }
        info!(
            keyword = %keyword,
            outcome = result.outcome.as_str(),
            found = result.found,
            deduplicated = result.deduplicated,
            fetch_failed = result.fetch_failed,
            summarized = result.summarized,
            stored = result.stored,
            "harvest run complete"
        );
        Ok(result)
    }
}
