use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{Config, Provider};
use crate::error::{AppError, Result};

use super::client::{ChatMessage, CompletionBackend, Role};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 8192;

/// Builds the configured provider. Missing credentials are fatal here.
pub fn backend_from_config(config: &Config) -> Result<Arc<dyn CompletionBackend>> {
    let api_key = config.resolve_api_key()?;
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let backend: Arc<dyn CompletionBackend> = match config.provider {
        Provider::OpenAi => Arc::new(OpenAiBackend::new(
            api_key,
            config.model(),
            config.api_url(),
            timeout,
        )?),
        Provider::Anthropic => Arc::new(AnthropicBackend::new(
            api_key,
            config.model(),
            config.api_url(),
            timeout,
        )?),
    };
    Ok(backend)
}

fn http_client(timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent("threat-digest/0.1")
        .build()?;
    Ok(client)
}

// OpenAI-compatible chat completions

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    model: String,
    api_url: String,
}

impl OpenAiBackend {
    pub fn new(api_key: String, model: String, api_url: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            model,
            api_url,
        })
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::LlmApi(format!("HTTP {}: {}", status, error_text)));
        }

        let chat_response: ChatResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::LlmApi("Response contained no message content".to_string()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// Anthropic messages

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<&'a ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    model: String,
    api_url: String,
}

impl AnthropicBackend {
    pub fn new(api_key: String, model: String, api_url: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            model,
            api_url,
        })
    }
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        // system prompts travel outside the message list
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>();
        let request = MessageRequest {
            model: &self.model,
            max_tokens: ANTHROPIC_MAX_TOKENS,
            messages: messages.iter().filter(|m| m.role != Role::System).collect(),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::LlmApi(format!("HTTP {}: {}", status, error_text)));
        }

        let message_response: MessageResponse = response.json().await?;

        let text = message_response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
