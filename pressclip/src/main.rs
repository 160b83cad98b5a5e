/*
pressclip - single-binary main.rs
This binary manages harvest schedules and runs the scheduler loop in the foreground.
*/

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::Notify;
use tokio::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use common::Config;

// Import modules from the lib
use pressclip::dedup::Deduplicator;
use pressclip::harvest::{HarvestPipeline, RunResult};
use pressclip::llm::remote::RemoteSummarizer;
use pressclip::llm::Summarize;
use pressclip::retry::RetryPolicy;
use pressclip::schedule::{first_fire_at, NewSchedule, Recurrence};
use pressclip::scheduler::SchedulerEngine;
use pressclip::scraping::{ArticleFetch, HttpArticleFetcher};
use pressclip::search::{GoogleNewsSearch, NewsSearch};
use pressclip::sink::{ArticleSink, SqliteSink};
use pressclip::storage::ScheduleStore;

#[derive(Parser, Debug)]
#[command(name = "pressclip", about = "Scheduled keyword news harvesting")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scheduler loop until Ctrl-C
    Serve,
    /// Run one harvest for a keyword and print the result
    Run { keyword: String },
    /// Add a harvest schedule
    Add {
        keyword: String,
        /// once, daily, weekly, or an interval like 30m
        #[arg(long, default_value = "daily")]
        recurrence: String,
        /// First fire as local wall-clock HH:MM (default: immediately)
        #[arg(long)]
        at: Option<String>,
    },
    /// Remove a schedule by id
    Remove { id: i64 },
    /// List all schedules
    List,
    /// Show recent harvest runs
    Log {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    // Load configuration with defaults
    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    // Resolve and log the DB path before opening the store
    let db_path = match tokio::fs::canonicalize(&config.database.path).await {
        Ok(p) => p.to_string_lossy().to_string(),
        Err(_) => config.database.path.clone(),
    };
    info!(db_path = %db_path, "resolved DB path");

    let store = match ScheduleStore::open(&db_path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(%e, db_path = %db_path, "failed to open schedule store");
            return Err(e);
        }
    };

    let outcome = dispatch(args.command, &config, store.clone()).await;
    store.close().await;
    outcome
}

async fn dispatch(command: Commands, config: &Config, store: Arc<ScheduleStore>) -> Result<()> {
    match command {
        Commands::Serve => serve_command(config, store).await,
        Commands::Run { keyword } => run_command(config, store, &keyword).await,
        Commands::Add {
            keyword,
            recurrence,
            at,
        } => add_command(store, &keyword, &recurrence, at.as_deref()).await,
        Commands::Remove { id } => remove_command(store, id).await,
        Commands::List => list_command(store).await,
        Commands::Log { limit } => log_command(store, limit).await,
    }
}

async fn serve_command(config: &Config, store: Arc<ScheduleStore>) -> Result<()> {
    let engine = build_engine(config, store)?;

    // Prepare a shutdown notifier for the scheduler loop
    let shutdown = Arc::new(Notify::new());
    let loop_shutdown = shutdown.clone();
    let mut handle = tokio::spawn(async move { engine.run(loop_shutdown).await });

    // Wait for CTRL-C or scheduler completion
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, notifying scheduler to shutdown");
            shutdown.notify_waiters();
        }
        res = &mut handle => {
            match res {
                Ok(Ok(())) => info!("scheduler exited on its own"),
                Ok(Err(e)) => return Err(e.into()),
                Err(join_err) => {
                    return Err(anyhow::anyhow!("scheduler task panicked: {}", join_err))
                }
            }
            return Ok(());
        }
    }

    // Give the loop a grace period to finish any tick in flight
    match tokio::time::timeout(Duration::from_secs(20), handle).await {
        Ok(join_res) => match join_res {
            Ok(Ok(())) => info!("scheduler exited cleanly"),
            Ok(Err(e)) => error!(%e, "scheduler task returned an error"),
            Err(join_err) => error!(%join_err, "scheduler task panicked"),
        },
        Err(_) => {
            info!("Timed out waiting for scheduler to exit; continuing shutdown");
        }
    }
    Ok(())
}

fn build_engine(config: &Config, store: Arc<ScheduleStore>) -> Result<SchedulerEngine> {
    let search = build_search(config)?;
    let fetcher = build_fetcher(config)?;
    let summarizer = build_summarizer(config)?;
    let sink: Arc<dyn ArticleSink> = Arc::new(SqliteSink::new(store.clone()));

    let retention_days = config
        .dedup
        .as_ref()
        .and_then(|d| d.retention_days)
        .unwrap_or(0);
    let dedup = Deduplicator::new(store.clone(), retention_days);

    let max_results = config
        .search
        .as_ref()
        .and_then(|s| s.max_results)
        .unwrap_or(10);
    let concurrency = config
        .fetch
        .as_ref()
        .and_then(|f| f.concurrency)
        .unwrap_or(4);
    let retry = RetryPolicy::new(
        config
            .retry
            .as_ref()
            .and_then(|r| r.max_attempts)
            .unwrap_or(3),
        config
            .retry
            .as_ref()
            .and_then(|r| r.base_delay_ms)
            .unwrap_or(500),
    );
    let pipeline = HarvestPipeline::new(search, fetcher, summarizer, sink, dedup.clone())
        .with_limits(max_results, concurrency)
        .with_retry(retry);

    let tick_seconds = config
        .scheduler
        .as_ref()
        .and_then(|s| s.tick_seconds)
        .unwrap_or(60);
    let run_log_retention = config
        .scheduler
        .as_ref()
        .and_then(|s| s.run_log_retention)
        .unwrap_or(100);
    Ok(SchedulerEngine::new(store, pipeline, dedup).with_timing(tick_seconds, run_log_retention))
}

fn build_search(config: &Config) -> Result<Arc<dyn NewsSearch>> {
    let search = config.search.as_ref();
    let timeout = search.and_then(|s| s.timeout_seconds).unwrap_or(10);
    let language = search
        .and_then(|s| s.language.clone())
        .unwrap_or_else(|| "en-US".to_string());
    let country = search
        .and_then(|s| s.country.clone())
        .unwrap_or_else(|| "US".to_string());
    let mut client = GoogleNewsSearch::new(timeout, language, country)?;
    if let Some(base_url) = search.and_then(|s| s.base_url.clone()) {
        client = client.with_base_url(base_url);
    }
    Ok(Arc::new(client))
}

fn build_fetcher(config: &Config) -> Result<Arc<dyn ArticleFetch>> {
    let fetch = config.fetch.as_ref();
    let timeout = fetch.and_then(|f| f.timeout_seconds).unwrap_or(15);
    let user_agent = fetch
        .and_then(|f| f.user_agent.clone())
        .unwrap_or_else(|| "Pressclip/0.1.0".to_string());
    Ok(Arc::new(HttpArticleFetcher::new(timeout, &user_agent)?))
}

/// The API key is read from the environment variable named by
/// `api_key_env`, never from the config file.
fn build_summarizer(config: &Config) -> Result<Arc<dyn Summarize>> {
    let summarizer = config
        .summarizer
        .as_ref()
        .context("missing [summarizer] section in configuration")?;
    let api_key_env = summarizer
        .api_key_env
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("Missing api_key_env in summarizer config"))?;
    let api_key = std::env::var(api_key_env)
        .with_context(|| format!("summarizer API key env var '{}' not set", api_key_env))?;

    let api_url = summarizer
        .api_url
        .clone()
        .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string());
    let model = summarizer
        .model
        .clone()
        .unwrap_or_else(|| "gpt-4o-mini".to_string());
    let timeout_secs = summarizer.timeout_seconds.unwrap_or(30);
    let max_tokens = summarizer.max_tokens.unwrap_or(500);
    let max_body_chars = summarizer.max_body_chars.unwrap_or(12_000);

    let mut remote = RemoteSummarizer::new(api_url, api_key, model)?.with_defaults(
        timeout_secs,
        max_tokens,
        max_body_chars,
    )?;
    if let Some(prompt) = summarizer.prompt.clone() {
        remote = remote.with_prompt(prompt);
    }
    Ok(Arc::new(remote))
}

async fn run_command(config: &Config, store: Arc<ScheduleStore>, keyword: &str) -> Result<()> {
    let engine = build_engine(config, store)?;
    let result = engine.run_once(keyword).await?;
    print_run(&result);
    Ok(())
}

async fn add_command(
    store: Arc<ScheduleStore>,
    keyword: &str,
    recurrence: &str,
    at: Option<&str>,
) -> Result<()> {
    let recurrence: Recurrence = recurrence.parse()?;
    let first_fire = first_fire_at(at, Utc::now())?;
    let schedule = NewSchedule::new(keyword, recurrence, first_fire)?;
    let id = store.add_schedule(&schedule).await?;
    println!(
        "added schedule {} for '{}' ({}), first fire {}",
        id,
        schedule.keyword,
        recurrence,
        first_fire.format("%Y-%m-%d %H:%M UTC")
    );
    Ok(())
}

async fn remove_command(store: Arc<ScheduleStore>, id: i64) -> Result<()> {
    store.remove_schedule(id).await?;
    println!("removed schedule {}", id);
    Ok(())
}

async fn list_command(store: Arc<ScheduleStore>) -> Result<()> {
    let schedules = store.list_schedules().await?;
    if schedules.is_empty() {
        println!("no schedules");
        return Ok(());
    }
    println!(
        "{:<5} {:<30} {:<10} {:<20} {}",
        "id", "keyword", "recur", "next fire (UTC)", "enabled"
    );
    for s in schedules {
        println!(
            "{:<5} {:<30} {:<10} {:<20} {}",
            s.id,
            s.keyword,
            s.recurrence.to_string(),
            s.next_fire_at.format("%Y-%m-%d %H:%M").to_string(),
            s.enabled
        );
    }
    Ok(())
}

async fn log_command(store: Arc<ScheduleStore>, limit: u32) -> Result<()> {
    let runs = store.recent_runs(limit).await?;
    if runs.is_empty() {
        println!("no runs logged");
        return Ok(());
    }
    for run in runs {
        print_run(&run);
    }
    Ok(())
}

fn print_run(run: &RunResult) {
    let label = run
        .schedule_id
        .map(|id| format!("schedule {}", id))
        .unwrap_or_else(|| "ad-hoc".to_string());
    println!(
        "{} [{}] '{}' {}: found {}, deduplicated {}, fetch failed {}, summarized {}, stored {}",
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        label,
        run.keyword,
        run.outcome.as_str(),
        run.found,
        run.deduplicated,
        run.fetch_failed,
        run.summarized,
        run.stored
    );
    for failure in &run.failures {
        println!("    {:?}: {}", failure.stage, failure.detail);
    }
}
