use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::select;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::dedup::Deduplicator;
use crate::error::Result;
use crate::harvest::{HarvestPipeline, RunOutcome, RunResult};
use crate::schedule::{NewSchedule, Recurrence, ScheduleDefinition};
use crate::storage::ScheduleStore;

/// Drives the pipeline from stored schedules. A tick is a pure function
/// of the stored schedules and the passed clock so tests can replay any
/// moment.
pub struct SchedulerEngine {
    store: Arc<ScheduleStore>,
    pipeline: HarvestPipeline,
    dedup: Deduplicator,
    tick_interval: Duration,
    run_log_retention: u32,
}

impl SchedulerEngine {
    pub fn new(store: Arc<ScheduleStore>, pipeline: HarvestPipeline, dedup: Deduplicator) -> Self {
        Self {
            store,
            pipeline,
            dedup,
            tick_interval: Duration::from_secs(60),
            run_log_retention: 100,
        }
    }

    pub fn with_timing(mut self, tick_seconds: u64, run_log_retention: u32) -> Self {
        self.tick_interval = Duration::from_secs(tick_seconds.max(1));
        self.run_log_retention = run_log_retention;
        self
    }

    /// Runs every schedule due at `now` and advances it past `now`.
    /// Pipeline failures are logged and recorded; only store errors
    /// abort the tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<RunResult>> {
        let due = self.store.due_schedules(now).await?;
        if due.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = due.len(), "schedules due");

        let mut results = Vec::with_capacity(due.len());
        for schedule in due {
            let result = self.pipeline.run(Some(schedule.id), &schedule.keyword).await?;
            self.store.append_run(&result, self.run_log_retention).await?;
            let next = schedule.recurrence.next_after(schedule.next_fire_at, now);
            self.store.advance_schedule(schedule.id, next).await?;
            match result.outcome {
                RunOutcome::Success => info!(
                    schedule_id = schedule.id,
                    keyword = %schedule.keyword,
                    stored = result.stored,
                    "run succeeded"
                ),
                RunOutcome::Partial => warn!(
                    schedule_id = schedule.id,
                    keyword = %schedule.keyword,
                    failures = result.failures.len(),
                    "run completed with failures"
                ),
                RunOutcome::Failed => error!(
                    schedule_id = schedule.id,
                    keyword = %schedule.keyword,
                    "run failed"
                ),
            }
            results.push(result);
        }
        Ok(results)
    }

    pub async fn add(
        &self,
        keyword: &str,
        recurrence: Recurrence,
        first_fire: DateTime<Utc>,
    ) -> Result<i64> {
        let schedule = NewSchedule::new(keyword, recurrence, first_fire)?;
        let id = self.store.add_schedule(&schedule).await?;
        info!(schedule_id = id, keyword = %schedule.keyword, recurrence = %recurrence, "schedule added");
        Ok(id)
    }

    pub async fn remove(&self, id: i64) -> Result<()> {
        self.store.remove_schedule(id).await?;
        info!(schedule_id = id, "schedule removed");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ScheduleDefinition>> {
        self.store.list_schedules().await
    }

    pub async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleDefinition>> {
        self.store.due_schedules(now).await
    }

    /// One ad-hoc run outside any schedule; still logged.
    pub async fn run_once(&self, keyword: &str) -> Result<RunResult> {
        let result = self.pipeline.run(None, keyword).await?;
        self.store.append_run(&result, self.run_log_retention).await?;
        Ok(result)
    }

    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunResult>> {
        self.store.recent_runs(limit).await
    }

    /// Foreground loop: tick, sleep, repeat until `shutdown` is notified.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<()> {
        info!(tick_seconds = self.tick_interval.as_secs(), "scheduler starting");
        loop {
            self.dedup.prune(Utc::now()).await?;
            self.tick(Utc::now()).await?;
            select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                _ = shutdown.notified() => {
                    info!("scheduler: shutdown requested, exiting loop");
                    break;
                }
            }
        }
        info!("scheduler stopped");
        Ok(())
    }
}
