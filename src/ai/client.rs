use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;

use crate::analysis::chunker::approximate_tokens;
use crate::config::Config;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One completion attempt against an LLM provider. Implementations carry
/// their own credentials, model and per-attempt timeout.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    fn model(&self) -> &str;
}

/// Fixed-delay bounded retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_secs(config.retry_delay_secs),
        }
    }
}

#[derive(Clone)]
pub struct ClassificationClient {
    backend: Arc<dyn CompletionBackend>,
    retry: RetryPolicy,
}

impl ClassificationClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Sends the conversation, retrying per the policy. `None` means every
    /// attempt failed; callers skip the chunk and carry on.
    pub async fn classify(&self, messages: &[ChatMessage]) -> Option<String> {
        let approx_tokens: usize = messages.iter().map(|m| approximate_tokens(&m.content)).sum();
        tracing::info!(
            model = self.backend.model(),
            messages = messages.len(),
            approx_tokens,
            "Sending classification request"
        );

        for attempt in 1..=self.retry.max_attempts {
            let started = Instant::now();
            match self.backend.complete(messages).await {
                Ok(text) => {
                    tracing::info!(
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Classification request succeeded"
                    );
                    return Some(text.trim().to_string());
                }
                Err(e) => {
                    tracing::error!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "Classification request failed"
                    );
                    if attempt < self.retry.max_attempts {
                        tracing::warn!(delay_secs = self.retry.delay.as_secs_f64(), "Retrying");
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }

        None
    }
}
