use crate::error::Result;

pub mod remote;

/// Produces a short prose summary of an article.
#[async_trait::async_trait]
pub trait Summarize: Send + Sync {
    async fn summarize(&self, title: &str, body: &str) -> Result<String>;
}
