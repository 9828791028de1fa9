use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Completion, CompletionRequest, Provider, ProviderError, TokenUsage};

/// One scripted reply, optionally delayed to exercise deadlines.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub delay: Option<Duration>,
    pub outcome: Result<String, ProviderError>,
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            delay: None,
            outcome: Ok(text.into()),
        }
    }

    pub fn error(err: ProviderError) -> Self {
        Self {
            delay: None,
            outcome: Err(err),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A scripted provider for tests. Returns pre-defined replies in order.
pub struct MockProvider {
    replies: Vec<MockReply>,
    index: AtomicUsize,
    usage: TokenUsage,
}

impl MockProvider {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            index: AtomicUsize::new(0),
            usage: TokenUsage {
                input_tokens: 120,
                output_tokens: 80,
            },
        }
    }

    /// How many times `complete` has been called.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let i = self.index.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.get(i).cloned().ok_or_else(|| {
            ProviderError::Rejected(format!(
                "MockProvider: no more replies (called {} times)",
                i + 1
            ))
        })?;
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.outcome.map(|text| Completion {
            text,
            usage: self.usage,
            model: request.model.clone(),
        })
    }
}
