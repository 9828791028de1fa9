pub mod anthropic;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Token usage from a single provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Total tokens (input + output).
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One call to the text provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
}

/// The raw reply: whatever text the model produced, plus accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    /// Model that actually served the request.
    pub model: String,
}

/// Failure classes a provider reports. Only `Timeout` and `Transient` are
/// worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider timed out")]
    Timeout,
    /// Connection failures, overload and 5xx responses.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Anything the provider will keep refusing: bad credentials, bad request.
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    /// The provider answered, but not in a shape we can read.
    #[error("unreadable provider response: {0}")]
    Unreadable(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout | ProviderError::Transient(_))
    }
}

/// The external model. Could be a hosted API or a test script.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;
}
