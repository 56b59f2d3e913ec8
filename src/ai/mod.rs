mod client;
mod provider;
pub mod response;

pub use client::{ChatMessage, ClassificationClient, CompletionBackend, RetryPolicy, Role};
pub use provider::{backend_from_config, AnthropicBackend, OpenAiBackend};

#[cfg(test)]
pub(crate) mod testing;
