//! Ollama adapter for local models.
//!
//! Ollama models are driven through the tagged `<tool_use>` form: the
//! request never carries a tools field, and responses are post-processed
//! with [`tagged::extract_tool_calls`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::{
    error::ProviderError,
    tagged,
    traits::{ChatMessage, ChatProvider, Completion, Role, ToolSpec},
};

/// Ollama adapter for local models. No native function calling.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaProvider {
    /// Create a new Ollama adapter.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            base_url: "http://localhost:11434".to_string(),
            model: model.into(),
            temperature: 0.7,
        }
    }

    /// Set the base URL of the Ollama server.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

impl From<&ChatMessage> for OllamaMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: match msg.role {
                Role::System => "system",
                Role::Assistant => "assistant",
                _ => "user",
            }
            .to_string(),
            content: match msg.role {
                Role::Tool => format!("Tool result: {}", msg.content),
                _ => msg.content.clone(),
            },
        }
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn provider(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_native_tools(&self) -> bool {
        false
    }

    #[instrument(skip(self, messages, tools), fields(provider = "ollama", model = %self.model))]
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<Completion, ProviderError> {
        debug!("completing with {} messages", messages.len());

        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages: messages.iter().map(OllamaMessage::from).collect(),
            stream: false,
            options: OllamaOptions { temperature: self.temperature },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Connection(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::Api(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let mut content = chat_response.message.content;
        let mut tool_calls = Vec::new();
        if !tools.is_empty() {
            let (clean, parsed) = tagged::extract_tool_calls(&content);
            content = clean;
            tool_calls = parsed;
        }

        Ok(Completion { content, tool_calls })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_mapping() {
        let msg = OllamaMessage::from(&ChatMessage::tool("ok"));
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content, "Tool result: ok");

        let msg = OllamaMessage::from(&ChatMessage::assistant("hi"));
        assert_eq!(msg.role, "assistant");
    }
}
