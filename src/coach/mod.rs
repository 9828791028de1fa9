//! The resilient wrapper around the external text provider.
//!
//! [`Orchestrator::invoke`] builds the prompt, runs each provider call under
//! a deadline, retries transient failures per [`RetryConfig`], and parses the
//! reply into a [`CoachingResult`]. Malformed output is never retried.

pub mod result;
pub mod retry;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::gate::Capability;
use crate::prompts::coach::{build_system_prompt, build_user_prompt};
use crate::provider::{Completion, CompletionRequest, Provider, ProviderError};

pub use result::{CoachingResult, ErrorCategory, FeedbackItem, Phrase, StyleVariant};
pub use retry::{FailureCause, RetryConfig, RetryState};

/// Reply budget for a single coaching call.
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Register {
    Casual,
    #[default]
    Neutral,
    Formal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    #[default]
    Correct,
    Polish,
    Simplify,
    Persuade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WritingContext {
    #[default]
    General,
    Email,
    Academic,
    Business,
    Social,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Proficiency {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
    Native,
}

/// A validated submission, ready for the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachingRequest {
    pub text: String,
    pub register: Register,
    pub goal: Goal,
    pub context: WritingContext,
    pub level: Proficiency,
    pub capability: Capability,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoachError {
    #[error("provider unavailable after {attempts} attempt(s): {cause}")]
    Unavailable { cause: FailureCause, attempts: u32 },
    #[error("malformed provider output: {0}")]
    Malformed(String),
    #[error("provider refused the request: {0}")]
    Refused(String),
}

/// Outcome of a single attempt, before retry policy is applied.
enum AttemptError {
    Retryable(FailureCause, String),
    Unreadable(String),
    Fatal(ProviderError),
}

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    retry: RetryConfig,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, retry: RetryConfig) -> Self {
        Self { provider, retry }
    }

    pub async fn invoke(&self, request: &CoachingRequest) -> Result<CoachingResult, CoachError> {
        let call = CompletionRequest {
            model: request.capability.model().to_string(),
            system: build_system_prompt(),
            prompt: build_user_prompt(request),
            max_tokens: MAX_TOKENS,
        };

        let mut state = RetryState::start();
        loop {
            state = match state {
                RetryState::Attempting { attempt } => match self.attempt(&call).await {
                    Ok(completion) => {
                        if attempt > 0 {
                            debug!(
                                provider = %self.provider.name(),
                                attempt,
                                "provider call succeeded after retry"
                            );
                        }
                        return result::parse_reply(
                            &completion.text,
                            completion.usage,
                            &completion.model,
                        )
                        .map_err(|reason| {
                            warn!(
                                provider = %self.provider.name(),
                                %reason,
                                "malformed provider output"
                            );
                            CoachError::Malformed(reason)
                        });
                    }
                    Err(AttemptError::Retryable(cause, detail)) => {
                        warn!(
                            provider = %self.provider.name(),
                            attempt,
                            %cause,
                            error = %detail,
                            "provider attempt failed"
                        );
                        self.retry.after_failure(attempt, cause)
                    }
                    Err(AttemptError::Unreadable(reason)) => {
                        warn!(
                            provider = %self.provider.name(),
                            %reason,
                            "malformed provider output"
                        );
                        return Err(CoachError::Malformed(reason));
                    }
                    Err(AttemptError::Fatal(err)) => {
                        warn!(
                            provider = %self.provider.name(),
                            error = %err,
                            "provider refused request"
                        );
                        return Err(CoachError::Refused(err.to_string()));
                    }
                },
                RetryState::Backoff { attempt, delay, .. } => {
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
                    tokio::time::sleep(delay).await;
                    RetryState::Attempting {
                        attempt: attempt + 1,
                    }
                }
                RetryState::Exhausted { attempts, cause } => {
                    return Err(CoachError::Unavailable { cause, attempts });
                }
            };
        }
    }

    async fn attempt(&self, call: &CompletionRequest) -> Result<Completion, AttemptError> {
        match tokio::time::timeout(self.retry.attempt_timeout, self.provider.complete(call)).await {
            Err(_) => Err(AttemptError::Retryable(
                FailureCause::Timeout,
                format!("no reply within {:?}", self.retry.attempt_timeout),
            )),
            Ok(Ok(completion)) => Ok(completion),
            Ok(Err(err)) if err.is_transient() => {
                let cause = match err {
                    ProviderError::Timeout => FailureCause::Timeout,
                    _ => FailureCause::Transient,
                };
                Err(AttemptError::Retryable(cause, err.to_string()))
            }
            Ok(Err(ProviderError::Unreadable(reason))) => Err(AttemptError::Unreadable(reason)),
            Ok(Err(err)) => Err(AttemptError::Fatal(err)),
        }
    }
}
