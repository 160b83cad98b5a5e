/*!
common/src/lib.rs

Configuration and database plumbing shared across the Pressclip workspace:
the TOML-backed Config tree, a layered default/override loader, and the
SQLite pool initializer.
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Where the SQLite file lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/pressclip.db")
    pub path: String,
}

/// Scheduler loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-schedule scans
    pub tick_seconds: Option<u64>,
    /// Number of run log entries kept when pruning
    pub run_log_retention: Option<u32>,
}

/// News search configuration (Google News RSS)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Override the search endpoint (tests point this at a local server)
    pub base_url: Option<String>,
    /// `hl` language code, e.g. "ko" or "en"
    pub language: Option<String>,
    /// `gl` country code, e.g. "KR" or "US"
    pub country: Option<String>,
    pub max_results: Option<usize>,
    pub timeout_seconds: Option<u64>,
}

/// Article body fetching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub timeout_seconds: Option<u64>,
    /// How many articles are fetched and summarized concurrently per run
    pub concurrency: Option<usize>,
    pub user_agent: Option<String>,
}

/// Remote summarizer config (OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    /// Article bodies longer than this are truncated before prompting
    pub max_body_chars: Option<usize>,
    /// Override the summarization instruction sent with each article
    pub prompt: Option<String>,
}

/// Retry policy for transient upstream failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
}

/// Dedup index retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Days to remember seen articles; 0 keeps them forever
    pub retention_days: Option<u32>,
}

/// The full configuration tree; every section except `database` is optional
/// and falls back to built-in defaults at the call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: Option<SchedulerConfig>,
    pub search: Option<SearchConfig>,
    pub fetch: Option<FetchConfig>,
    pub summarizer: Option<SummarizerConfig>,
    pub retry: Option<RetryConfig>,
    pub dedup: Option<DedupConfig>,
}

impl Config {
    /// Read a single TOML file as a complete configuration.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Layered load: the default file first, then the override file merged
    /// on top table by table, override keys winning.
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Open (and if needed create) the SQLite database at `path` and return a
/// connection pool. Schema creation is left to the caller.
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create DB parent directory: {}", parent.display())
        })?;
    }

    // Touch the file up front so path and permission problems surface here
    // with a readable error instead of through the connection attempt.
    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create or open DB file: {}", path))?;

    // WAL keeps the serving process writable while CLI invocations read the same file.
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

/// Async sleep in milliseconds; shared so retry backoff has one clock.
pub async fn sleep_millis(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
