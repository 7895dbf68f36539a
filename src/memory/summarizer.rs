//! Summarization capability used by overflow condensation
//!
//! One `condense` call covers a whole batch of texts. The call is best-effort:
//! the overflow manager owns retry and timeout policy.

use super::embedder::join_url;
use crate::config::SummarizerConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Trait for condensing a batch of texts into one
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Produce one condensed text covering every input
    async fn condense(&self, texts: &[String]) -> Result<String>;
}

/// Default upper bound on extractive summary length, in characters.
pub const DEFAULT_SUMMARY_CHARS_MAX: usize = 4_000;

/// Local summarizer keeping the first sentence of each text.
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    chars_max: usize,
}

impl ExtractiveSummarizer {
    /// Create a summarizer with a custom length bound
    pub fn new(chars_max: usize) -> Self {
        Self {
            chars_max: chars_max.max(16),
        }
    }
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_CHARS_MAX)
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn condense(&self, texts: &[String]) -> Result<String> {
        let mut summary = String::new();
        for (i, text) in texts.iter().enumerate() {
            let sentence = first_sentence(text);
            if sentence.is_empty() {
                continue;
            }
            let separator = if summary.is_empty() { "" } else { " | " };
            if summary.chars().count() + separator.len() + sentence.chars().count() > self.chars_max {
                let remaining = texts.len() - i;
                if summary.is_empty() {
                    summary = sentence.chars().take(self.chars_max).collect();
                }
                tracing::debug!(remaining, "Extractive summary reached length bound");
                break;
            }
            summary.push_str(separator);
            summary.push_str(sentence);
        }

        if summary.is_empty() {
            return Err(Error::SummarizationFailed(
                "nothing to summarize".to_string(),
            ));
        }
        Ok(summary)
    }
}

fn first_sentence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.find(|c: char| matches!(c, '.' | '!' | '?' | '\n')) {
        Some(end) => trimmed[..end].trim(),
        None => trimmed,
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

const CONDENSE_INSTRUCTION: &str = "Condense the following memory entries into one \
concise summary that preserves every durable fact, preference and outcome. \
Reply with the summary text only.";

/// Client for an OpenAI-compatible chat completions endpoint
pub struct HttpSummarizer {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpSummarizer {
    /// Build a client from configuration; the endpoint must be set
    pub fn from_config(config: &SummarizerConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::Config("summarizer.endpoint is not set".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: join_url(endpoint, "chat/completions"),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
        })
    }

    /// Request URL
    pub fn url(&self) -> &str {
        &self.url
    }

    fn build_messages(texts: &[String]) -> Vec<ChatMessage> {
        let entries = texts
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{}. {}", i + 1, t.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        vec![
            ChatMessage {
                role: "system".to_string(),
                content: CONDENSE_INSTRUCTION.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: entries,
            },
        ]
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn condense(&self, texts: &[String]) -> Result<String> {
        let mut request = self.client.post(&self.url).json(&ChatRequest {
            model: &self.model,
            messages: Self::build_messages(texts),
            temperature: 0.0,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::SummarizationFailed(format!("request failed: {}", e)))?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::SummarizationFailed(format!("invalid response: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::SummarizationFailed("empty completion".to_string()))
    }
}
