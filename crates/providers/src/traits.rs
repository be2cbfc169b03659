use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Circuit breaker open: LLM service unavailable")]
    CircuitOpen,
}

impl ProviderError {
    /// Transport failures, rate limits and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(_) => true,
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Parse(_) | ProviderError::CircuitOpen => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub content: Option<String>,
    pub finish_reason: String,
}

/// A single-shot chat completion transport.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(&self, messages: &[Message]) -> Result<GenerateResponse, ProviderError>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Http("reset".to_string()).is_retryable());
        assert!(ProviderError::Api { status: 429, body: String::new() }.is_retryable());
        assert!(ProviderError::Api { status: 503, body: String::new() }.is_retryable());
        assert!(!ProviderError::Api { status: 401, body: String::new() }.is_retryable());
        assert!(!ProviderError::Parse("bad".to_string()).is_retryable());
        assert!(!ProviderError::CircuitOpen.is_retryable());
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::system("x").role, "system");
        assert_eq!(Message::user("y").role, "user");
    }
}
