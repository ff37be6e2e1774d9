//! OpenAI adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::{
    error::ProviderError,
    tagged,
    traits::{ChatMessage, ChatProvider, Completion, Role, ToolInvocation, ToolSpec},
};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI adapter. Uses native function calling.
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiProvider {
    /// Create a new OpenAI adapter.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
        }
    }

    fn prepare_messages(messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|m| OpenAiMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::Assistant => "assistant",
                    _ => "user",
                }
                .to_string(),
                content: match m.role {
                    Role::Tool => format!("Tool result: {}", m.content),
                    _ => m.content.clone(),
                },
            })
            .collect()
    }
}

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool>,
}

#[derive(Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OpenAiFunction,
}

#[derive(Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCall>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiCalledFunction,
}

#[derive(Deserialize)]
struct OpenAiCalledFunction {
    name: String,
    /// JSON-encoded arguments object
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiErrorEnvelope {
    error: OpenAiErrorDetail,
}

#[derive(Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    #[instrument(skip(self, messages, tools), fields(provider = "openai", model = %self.model))]
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<Completion, ProviderError> {
        debug!("completing with {} messages, {} tools", messages.len(), tools.len());

        let request = OpenAiRequest {
            model: self.model.clone(),
            messages: Self::prepare_messages(messages),
            temperature: self.temperature,
            tools: tools
                .iter()
                .map(|t| OpenAiTool {
                    tool_type: "function",
                    function: OpenAiFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
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
            let error: OpenAiErrorEnvelope = response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            return Err(ProviderError::Api(error.error.message));
        }

        let api_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let message = api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(ProviderError::InvalidResponse("no choices".into()))?;

        let mut content = message.content.unwrap_or_default();
        let mut tool_calls = Vec::with_capacity(message.tool_calls.len());
        for call in message.tool_calls {
            let arguments: Value = serde_json::from_str(&call.function.arguments)
                .map_err(|e| ProviderError::InvalidResponse(format!("tool arguments: {e}")))?;
            tool_calls.push(ToolInvocation {
                name: call.function.name,
                arguments,
                id: Some(call.id),
            });
        }

        if tool_calls.is_empty() && !tools.is_empty() {
            let (clean, parsed) = tagged::extract_tool_calls(&content);
            content = clean;
            tool_calls = parsed;
        }

        Ok(Completion { content, tool_calls })
    }
}
