//! Provider error types.

use thiserror::Error;

/// Errors that can occur when talking to a model provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// API error reported by the provider
    #[error("API error: {0}")]
    Api(String),

    /// Network/connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Response body did not match the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Required API key is not present in the environment
    #[error("missing credentials: {0} is not set")]
    MissingCredentials(String),

    /// Provider id not recognized by the factory
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Request exceeded its deadline
    #[error("request timed out")]
    Timeout,
}

impl ProviderError {
    /// Whether a retry with backoff is worthwhile.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout | Self::Api(_))
    }
}
