use thiserror::Error;

/// Failure classes for scheduling and harvesting.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("schedule {0} not found")]
    NotFound(i64),

    #[error("news search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("article fetch failed: {0}")]
    FetchTimeout(String),

    #[error("summarization failed: {0}")]
    Summarization(String),

    #[error("sink write failed: {0}")]
    SinkWrite(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl HarvestError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HarvestError::SearchUnavailable(_)
                | HarvestError::FetchTimeout(_)
                | HarvestError::SinkWrite(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
