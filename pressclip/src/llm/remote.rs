use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Summarize;
use crate::error::{HarvestError, Result};

/// Default instruction sent ahead of the article text.
pub const DEFAULT_PROMPT: &str = "Summarize the following news article in a few neutral, \
     concise sentences. Keep the article's original language.";

/// Summarizer backed by an OpenAI-compatible chat completions API.
pub struct RemoteSummarizer {
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    max_tokens: usize,
    max_body_chars: usize,
    prompt: String,
    client: reqwest::Client,
}

impl RemoteSummarizer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(30);
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout,
            max_tokens: 500,
            max_body_chars: 12_000,
            prompt: DEFAULT_PROMPT.to_string(),
            client: http_client(timeout)?,
        })
    }

    /// Rebuilds the HTTP client so the client-level timeout tracks the
    /// configured one.
    pub fn with_defaults(
        mut self,
        timeout_secs: u64,
        max_tokens: usize,
        max_body_chars: usize,
    ) -> anyhow::Result<Self> {
        self.timeout = Duration::from_secs(timeout_secs);
        self.max_tokens = max_tokens;
        self.max_body_chars = max_body_chars;
        self.client = http_client(self.timeout)?;
        Ok(self)
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build reqwest client")
}

#[async_trait::async_trait]
impl Summarize for RemoteSummarizer {
    async fn summarize(&self, title: &str, body: &str) -> Result<String> {
        let body = truncate_chars(body, self.max_body_chars);
        let prompt = format!("{}\n\nTitle: {}\n\n{}", self.prompt, title, body);

        let req_body = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt,
            }],
            max_tokens: Some(self.max_tokens),
            temperature: Some(0.3),
        };

        // The timeout covers the whole exchange; a server that returns
        // headers and then stalls the body still gets cut off.
        let exchange = async {
            let response = self
                .client
                .post(&self.base_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        HarvestError::Summarization("request timed out".to_string())
                    } else {
                        HarvestError::Summarization(format!("request failed: {}", e))
                    }
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(HarvestError::Summarization(format!(
                    "API error {}: {}",
                    status, body
                )));
            }

            response.json::<ChatResponse>().await.map_err(|e| {
                if e.is_timeout() {
                    HarvestError::Summarization("request timed out".to_string())
                } else {
                    HarvestError::Summarization(format!("malformed response: {}", e))
                }
            })
        };

        let resp_body = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| HarvestError::Summarization("request timed out".to_string()))??;

        resp_body
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| HarvestError::Summarization("response has no choices".to_string()))
    }
}

/// Cuts `s` after `max_chars` characters on a char boundary; 0 disables.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return s;
    }
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// OpenAI-compatible request/response structures
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("anything", 0), "anything");
    }
}
