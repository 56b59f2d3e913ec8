use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::client::{ChatMessage, ClassificationClient, CompletionBackend, RetryPolicy};
use crate::error::{AppError, Result};

/// Replays canned replies in order and records every request it sees.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String>>>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push_failure(&self) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(AppError::LlmApi("scripted failure".to_string())));
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Ok(reply.into()));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn user_prompt(&self, index: usize) -> String {
        self.requests.lock().unwrap()[index]
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::LlmApi("no scripted reply left".to_string())))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Single attempt, no delay: one scripted reply per chunk.
pub fn client_for(backend: Arc<ScriptedBackend>) -> ClassificationClient {
    ClassificationClient::new(
        backend,
        RetryPolicy {
            max_attempts: 1,
            delay: Duration::ZERO,
        },
    )
}
