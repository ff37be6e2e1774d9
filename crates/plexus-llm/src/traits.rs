//! Core trait and types for model provider adapters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Instructions (role text + peer catalogue)
    System,
    /// Human or peer input
    User,
    /// Model output
    Assistant,
    /// Result of a dispatched tool call
    Tool,
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    #[must_use]
    pub fn tool(content: impl Into<String>) -> Self {
        Self { role: Role::Tool, content: content.into() }
    }
}

/// A tool made available to the model for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name (e.g. `communicate_with_bob`)
    pub name: String,
    /// One-line description shown to the model
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

impl ToolSpec {
    /// A tool taking a single required string parameter `message`.
    #[must_use]
    pub fn message_tool(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The message to send"
                    }
                },
                "required": ["message"]
            }),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Name of the requested tool
    pub name: String,
    /// Arguments object
    pub arguments: Value,
    /// Provider-assigned call id, when the provider has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A completed model response, normalized across providers.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    /// User-visible text, with any tagged tool blocks stripped
    pub content: String,
    /// Structured tool invocations, native or parsed from tags
    pub tool_calls: Vec<ToolInvocation>,
}

/// Abstract request/response contract to a language model.
///
/// Implement this to add a provider. Adapters normalize tool-call
/// emission: callers always receive [`Completion::tool_calls`] regardless
/// of whether the underlying model has native function calling.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider id ("anthropic", "openai", "ollama").
    fn provider(&self) -> &str;

    /// Model identifier in use.
    fn model(&self) -> &str;

    /// Whether the model emits structured tool calls natively.
    ///
    /// When `false`, the caller must include the tagged-form primer
    /// ([`crate::tagged::tool_primer`]) in the system preamble.
    fn supports_native_tools(&self) -> bool;

    /// Complete a conversation, optionally offering tools.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails or the response cannot be
    /// decoded.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<Completion, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_tool_schema() {
        let tool = ToolSpec::message_tool("communicate_with_bob", "Send a message to bob");
        assert_eq!(tool.parameters["required"][0], "message");
        assert_eq!(tool.parameters["properties"]["message"]["type"], "string");
    }

    #[test]
    fn test_invocation_round_trip() {
        let call = ToolInvocation {
            name: "communicate_with_bob".into(),
            arguments: serde_json::json!({"message": "hi"}),
            id: None,
        };
        let text = serde_json::to_string(&call).unwrap();
        let back: ToolInvocation = serde_json::from_str(&text).unwrap();
        assert_eq!(back, call);
    }
}
