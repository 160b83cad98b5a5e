use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{HarvestError, Result};
use crate::harvest::{ArticleFailure, HarvestedArticle, RunOutcome, RunResult};
use crate::schedule::{NewSchedule, Recurrence, ScheduleDefinition};

/// SQLite-backed store for schedules, the run log, the dedup index, and
/// harvested articles. Owns the connection pool for its whole lifetime;
/// `close` tears it down explicitly.
pub struct ScheduleStore {
    pool: SqlitePool,
}

impl ScheduleStore {
    /// Opens the database at `path` (creating file and parent directory if
    /// missing) and ensures the schema exists.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let pool = common::init_db_pool(&path.as_ref().to_string_lossy()).await?;
        ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persists a validated schedule and returns its assigned id.
    pub async fn add_schedule(&self, schedule: &NewSchedule) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO schedules (keyword, recurrence, next_fire_at, enabled, created_at)
            VALUES (?, ?, ?, TRUE, ?)
            RETURNING id
            "#,
        )
        .bind(&schedule.keyword)
        .bind(schedule.recurrence.to_string())
        .bind(schedule.next_fire_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Deletes a schedule; unknown ids are an error.
    pub async fn remove_schedule(&self, id: i64) -> Result<()> {
        let done = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(HarvestError::NotFound(id));
        }
        Ok(())
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleDefinition>> {
        let rows = sqlx::query(
            "SELECT id, keyword, recurrence, next_fire_at, enabled, created_at \
             FROM schedules ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_schedule).collect()
    }

    /// Schedules that should fire at `now`: enabled, with next_fire_at at
    /// or before `now`, in id order.
    pub async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleDefinition>> {
        let rows = sqlx::query(
            "SELECT id, keyword, recurrence, next_fire_at, enabled, created_at \
             FROM schedules WHERE enabled AND next_fire_at <= ? ORDER BY id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_schedule).collect()
    }

    /// Moves a schedule to its next fire time, or disables it when there is
    /// none (fired one-shots stay listed). A single UPDATE keeps the
    /// advance and the enabled flip atomic.
    pub async fn advance_schedule(&self, id: i64, next: Option<DateTime<Utc>>) -> Result<()> {
        sqlx::query(
            "UPDATE schedules SET next_fire_at = COALESCE(?, next_fire_at), enabled = ? WHERE id = ?",
        )
        .bind(next)
        .bind(next.is_some())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends a run to the execution log and prunes the log to `retention`
    /// newest rows (0 keeps everything). Returns the log row id.
    pub async fn append_run(&self, result: &RunResult, retention: u32) -> Result<i64> {
        let failures_json = serde_json::to_string(&result.failures)?;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO run_log
                (schedule_id, keyword, started_at, outcome, found, deduplicated,
                 fetch_failed, summarized, stored, failures_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(result.schedule_id)
        .bind(&result.keyword)
        .bind(result.started_at)
        .bind(result.outcome.as_str())
        .bind(result.found as i64)
        .bind(result.deduplicated as i64)
        .bind(result.fetch_failed as i64)
        .bind(result.summarized as i64)
        .bind(result.stored as i64)
        .bind(&failures_json)
        .fetch_one(&self.pool)
        .await?;

        if retention > 0 {
            sqlx::query(
                "DELETE FROM run_log WHERE id NOT IN \
                 (SELECT id FROM run_log ORDER BY id DESC LIMIT ?)",
            )
            .bind(retention as i64)
            .execute(&self.pool)
            .await?;
        }
        Ok(id)
    }

    /// Newest-first slice of the execution log.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunResult>> {
        let rows = sqlx::query(
            "SELECT schedule_id, keyword, started_at, outcome, found, deduplicated, \
             fetch_failed, summarized, stored, failures_json \
             FROM run_log ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            let failures_json: String = row.get("failures_json");
            let failures: Vec<ArticleFailure> = serde_json::from_str(&failures_json)?;
            let outcome_text: String = row.get("outcome");
            let outcome = match outcome_text.as_str() {
                "success" => RunOutcome::Success,
                "partial" => RunOutcome::Partial,
                _ => RunOutcome::Failed,
            };
            runs.push(RunResult {
                schedule_id: row.get("schedule_id"),
                keyword: row.get("keyword"),
                started_at: row.get("started_at"),
                outcome,
                found: row.get::<i64, _>("found") as usize,
                deduplicated: row.get::<i64, _>("deduplicated") as usize,
                fetch_failed: row.get::<i64, _>("fetch_failed") as usize,
                summarized: row.get::<i64, _>("summarized") as usize,
                stored: row.get::<i64, _>("stored") as usize,
                failures,
            });
        }
        Ok(runs)
    }

    pub async fn is_seen(&self, fingerprint: &str) -> Result<bool> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM seen_articles WHERE fingerprint = ?")
                .bind(fingerprint)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    /// Records a fingerprint; re-marking keeps the original first_seen_at.
    pub async fn mark_seen(&self, fingerprint: &str, when: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO seen_articles (fingerprint, first_seen_at) VALUES (?, ?)")
            .bind(fingerprint)
            .bind(when)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drops dedup entries first seen before `cutoff`; returns how many.
    pub async fn prune_seen_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query("DELETE FROM seen_articles WHERE first_seen_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    /// Inserts a harvested article; returns false when the fingerprint was
    /// already delivered.
    pub async fn insert_article(
        &self,
        keyword: &str,
        fingerprint: &str,
        article: &HarvestedArticle,
    ) -> Result<bool> {
        let done = sqlx::query(
            r#"
            INSERT OR IGNORE INTO articles
                (keyword, fingerprint, title, url, source, published_at, body, summary, harvested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(keyword)
        .bind(fingerprint)
        .bind(&article.reference.title)
        .bind(&article.reference.link)
        .bind(&article.reference.source)
        .bind(article.reference.published)
        .bind(&article.body)
        .bind(&article.summary)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }
}

fn row_to_schedule(row: &sqlx::sqlite::SqliteRow) -> Result<ScheduleDefinition> {
    let recurrence_text: String = row.get("recurrence");
    let recurrence: Recurrence = recurrence_text.parse().map_err(|_| {
        HarvestError::InvalidSchedule(format!("corrupt recurrence '{}' in store", recurrence_text))
    })?;
    Ok(ScheduleDefinition {
        id: row.get("id"),
        keyword: row.get("keyword"),
        recurrence,
        next_fire_at: row.get("next_fire_at"),
        enabled: row.get("enabled"),
        created_at: row.get("created_at"),
    })
}

async fn ensure_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    // run_log.schedule_id has no foreign key: run history outlives the
    // schedule it came from.
    let stmts = vec![
        r#"CREATE TABLE IF NOT EXISTS schedules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            keyword TEXT NOT NULL,
            recurrence TEXT NOT NULL,
            next_fire_at TIMESTAMP NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMP NOT NULL
        );"#,
        r#"CREATE TABLE IF NOT EXISTS run_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            schedule_id INTEGER,
            keyword TEXT NOT NULL,
            started_at TIMESTAMP NOT NULL,
            outcome TEXT NOT NULL,
            found INTEGER NOT NULL DEFAULT 0,
            deduplicated INTEGER NOT NULL DEFAULT 0,
            fetch_failed INTEGER NOT NULL DEFAULT 0,
            summarized INTEGER NOT NULL DEFAULT 0,
            stored INTEGER NOT NULL DEFAULT 0,
            failures_json TEXT NOT NULL DEFAULT '[]'
        );"#,
        r#"CREATE TABLE IF NOT EXISTS seen_articles (
            fingerprint TEXT PRIMARY KEY,
            first_seen_at TIMESTAMP NOT NULL
        );"#,
        r#"CREATE TABLE IF NOT EXISTS articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            keyword TEXT NOT NULL,
            fingerprint TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            url TEXT,
            source TEXT,
            published_at TIMESTAMP,
            body TEXT,
            summary TEXT,
            harvested_at TIMESTAMP NOT NULL
        );"#,
        r#"CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules (enabled, next_fire_at);"#,
        r#"CREATE INDEX IF NOT EXISTS idx_seen_first_seen ON seen_articles (first_seen_at);"#,
    ];

    for s in stmts {
        sqlx::query(s)
            .execute(pool)
            .await
            .with_context(|| "failed to ensure schema")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::FailureStage;
    use crate::search::ArticleReference;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, ScheduleStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::open(dir.path().join("pressclip.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn sample_run(keyword: &str) -> RunResult {
        RunResult {
            schedule_id: Some(1),
            keyword: keyword.to_string(),
            started_at: Utc::now(),
            outcome: RunOutcome::Partial,
            found: 5,
            deduplicated: 2,
            fetch_failed: 1,
            summarized: 2,
            stored: 2,
            failures: vec![ArticleFailure {
                stage: FailureStage::Fetch,
                detail: "paywalled: timed out".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn add_list_remove_schedules() {
        let (_dir, store) = open_store().await;
        let s = NewSchedule::new("chip shortage", Recurrence::Daily, Utc::now()).unwrap();
        let id = store.add_schedule(&s).await.unwrap();
        assert!(id > 0);

        let all = store.list_schedules().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].keyword, "chip shortage");
        assert_eq!(all[0].recurrence, Recurrence::Daily);
        assert!(all[0].enabled);

        store.remove_schedule(id).await.unwrap();
        assert!(store.list_schedules().await.unwrap().is_empty());

        match store.remove_schedule(id).await {
            Err(HarvestError::NotFound(missing)) => assert_eq!(missing, id),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn due_query_honors_the_boundary() {
        let (_dir, store) = open_store().await;
        let now = Utc::now();

        store
            .add_schedule(&NewSchedule::new("due", Recurrence::Daily, now - Duration::minutes(1)).unwrap())
            .await
            .unwrap();
        store
            .add_schedule(&NewSchedule::new("exact", Recurrence::Daily, now).unwrap())
            .await
            .unwrap();
        let disabled_id = store
            .add_schedule(&NewSchedule::new("disabled", Recurrence::Once, now - Duration::hours(1)).unwrap())
            .await
            .unwrap();
        store
            .add_schedule(&NewSchedule::new("future", Recurrence::Daily, now + Duration::minutes(1)).unwrap())
            .await
            .unwrap();
        store.advance_schedule(disabled_id, None).await.unwrap();

        let due = store.due_schedules(now).await.unwrap();
        let keywords: Vec<_> = due.iter().map(|s| s.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["due", "exact"]);
    }

    #[tokio::test]
    async fn advance_moves_recurring_and_disables_once() {
        let (_dir, store) = open_store().await;
        let now = Utc::now();
        let daily_id = store
            .add_schedule(&NewSchedule::new("daily topic", Recurrence::Daily, now).unwrap())
            .await
            .unwrap();
        let once_id = store
            .add_schedule(&NewSchedule::new("one shot", Recurrence::Once, now).unwrap())
            .await
            .unwrap();

        let next = now + Duration::days(1);
        store.advance_schedule(daily_id, Some(next)).await.unwrap();
        store.advance_schedule(once_id, None).await.unwrap();

        let all = store.list_schedules().await.unwrap();
        let daily = all.iter().find(|s| s.id == daily_id).unwrap();
        let once = all.iter().find(|s| s.id == once_id).unwrap();
        assert_eq!(daily.next_fire_at, next);
        assert!(daily.enabled);
        assert!(!once.enabled);
        assert_eq!(once.next_fire_at, now, "disabled one-shot keeps its fire time");
    }

    #[tokio::test]
    async fn run_log_is_newest_first_and_pruned() {
        let (_dir, store) = open_store().await;
        for i in 0..5i64 {
            let mut run = sample_run(&format!("kw{}", i));
            run.schedule_id = Some(i);
            store.append_run(&run, 3).await.unwrap();
        }

        let runs = store.recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 3, "retention keeps only the newest rows");
        let keywords: Vec<_> = runs.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["kw4", "kw3", "kw2"]);
        assert_eq!(runs[0].outcome, RunOutcome::Partial);
        assert_eq!(runs[0].found, 5);
        assert_eq!(runs[0].failures.len(), 1);
        assert_eq!(runs[0].failures[0].stage, FailureStage::Fetch);
    }

    #[tokio::test]
    async fn run_log_retention_zero_keeps_everything() {
        let (_dir, store) = open_store().await;
        for i in 0..5 {
            store.append_run(&sample_run(&format!("kw{}", i)), 0).await.unwrap();
        }
        assert_eq!(store.recent_runs(100).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn seen_index_keeps_the_first_seen_time() {
        let (_dir, store) = open_store().await;
        let fp = "u:https://example.com/a";
        let t1 = Utc::now() - Duration::days(10);
        let t2 = Utc::now();

        assert!(!store.is_seen(fp).await.unwrap());
        store.mark_seen(fp, t1).await.unwrap();
        store.mark_seen(fp, t2).await.unwrap();
        assert!(store.is_seen(fp).await.unwrap());

        // pruning between the two timestamps shows the first one survived
        let removed = store.prune_seen_before(Utc::now() - Duration::days(5)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.is_seen(fp).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_article_inserts_are_ignored() {
        let (_dir, store) = open_store().await;
        let article = HarvestedArticle {
            reference: ArticleReference {
                title: "Fab output falls".to_string(),
                link: Some("https://example.com/fab".to_string()),
                source: Some("Example Wire".to_string()),
                published: None,
            },
            body: Some("Production slipped again this quarter.".to_string()),
            summary: Some("Output fell.".to_string()),
        };
        let fp = "u:https://example.com/fab";
        assert!(store.insert_article("chip shortage", fp, &article).await.unwrap());
        assert!(!store.insert_article("chip shortage", fp, &article).await.unwrap());
    }
}
