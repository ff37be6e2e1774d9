//! # plexus-llm
//!
//! Model provider adapters behind the [`ChatProvider`] trait.
//!
//! Providers with native function calling (Anthropic, OpenAI) surface tool
//! invocations structurally; providers without it (Ollama) are driven
//! through the tagged `<tool_use>` form in [`tagged`], so the reasoning
//! loop sees the same [`Completion`] either way.

mod anthropic;
mod error;
mod ollama;
mod openai;
pub mod tagged;
mod traits;

use std::sync::Arc;

pub use anthropic::AnthropicProvider;
pub use error::ProviderError;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use traits::{ChatMessage, ChatProvider, Completion, Role, ToolInvocation, ToolSpec};

/// Environment variable holding the Anthropic API key.
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
/// Environment variable holding the OpenAI API key.
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Environment variable overriding the Ollama base URL.
pub const OLLAMA_HOST: &str = "OLLAMA_HOST";

/// Build a provider adapter from a descriptor's provider/model identifiers.
///
/// Credentials come from the process environment and are never part of the
/// descriptor.
///
/// # Errors
///
/// Returns [`ProviderError::UnknownProvider`] for an unrecognized provider
/// id and [`ProviderError::MissingCredentials`] when the required API key
/// is not set.
pub fn create_provider(provider: &str, model: &str) -> Result<Arc<dyn ChatProvider>, ProviderError> {
    match provider {
        "anthropic" => {
            let key = require_env(ANTHROPIC_API_KEY)?;
            Ok(Arc::new(AnthropicProvider::new(key, model)))
        }
        "openai" => {
            let key = require_env(OPENAI_API_KEY)?;
            Ok(Arc::new(OpenAiProvider::new(key, model)))
        }
        "ollama" => {
            let base = std::env::var(OLLAMA_HOST)
                .unwrap_or_else(|_| "http://localhost:11434".to_string());
            Ok(Arc::new(OllamaProvider::new(model).with_base_url(base)))
        }
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}

fn require_env(var: &str) -> Result<String, ProviderError> {
    std::env::var(var).map_err(|_| ProviderError::MissingCredentials(var.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_is_rejected() {
        let err = match create_provider("cohere", "command-r") {
            Err(e) => e,
            Ok(_) => panic!("expected create_provider to fail"),
        };
        assert!(matches!(err, ProviderError::UnknownProvider(_)));
    }

    #[test]
    fn test_ollama_needs_no_credentials() {
        let provider = create_provider("ollama", "llama3.2").unwrap();
        assert_eq!(provider.provider(), "ollama");
        assert!(!provider.supports_native_tools());
    }
}
