//! Per-request sequencing: filter, identify, validate, admit, gate, coach,
//! then hand the result to persistence without waiting for it.

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::coach::{
    CoachingRequest, CoachingResult, Goal, Orchestrator, Proficiency, Register, WritingContext,
};
use crate::consts::{MAX_TEXT_CHARS, MIN_TEXT_CHARS};
use crate::filter;
use crate::gate::{self, Access, Capability};
use crate::identity::{self, AccessTier, Caller, IdentityFacts};
use crate::limiter::{RateDecision, RateLimiter};
use crate::persist::{PersistReport, PersistenceSink};

/// Transport-level facts about who is calling.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub user_agent: Option<String>,
    pub remote_addr: String,
    pub identity: IdentityFacts,
}

/// Raw caller input, not yet validated.
#[derive(Debug, Clone)]
pub struct Submission {
    pub text: String,
    pub register: Register,
    pub goal: Goal,
    pub context: WritingContext,
    pub level: Proficiency,
    pub capability: String,
}

/// Caller-facing failures. Serialises to the public error payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SubmitError {
    #[error("request refused")]
    Forbidden,
    #[error("validation error: {detail}")]
    #[serde(rename = "validation_error")]
    Validation { detail: String },
    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited {
        retry_after_seconds: u64,
        is_anonymous: bool,
    },
    #[error("this model requires {required_tier} access")]
    ModelAccessDenied { required_tier: AccessTier },
    #[error("the writing coach is unavailable, please try again later")]
    #[serde(rename = "provider_error")]
    Provider,
}

/// A successful submission plus the bookkeeping around it.
pub struct Receipt {
    pub result: CoachingResult,
    pub caller: Caller,
    pub rate: RateDecision,
    /// The detached persistence task. Dropping it does not cancel it.
    pub persistence: JoinHandle<PersistReport>,
}

pub struct Coordinator {
    limiter: Arc<RateLimiter>,
    orchestrator: Orchestrator,
    sink: PersistenceSink,
}

impl Coordinator {
    pub fn new(
        limiter: Arc<RateLimiter>,
        orchestrator: Orchestrator,
        sink: PersistenceSink,
    ) -> Self {
        Self {
            limiter,
            orchestrator,
            sink,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn submit(
        &self,
        envelope: &Envelope,
        submission: Submission,
    ) -> Result<CoachingResult, SubmitError> {
        self.submit_with_receipt(envelope, submission)
            .await
            .map(|receipt| receipt.result)
    }

    pub async fn submit_with_receipt(
        &self,
        envelope: &Envelope,
        submission: Submission,
    ) -> Result<Receipt, SubmitError> {
        if filter::is_blocked(envelope.user_agent.as_deref()) {
            info!(
                addr = %envelope.remote_addr,
                user_agent = envelope.user_agent.as_deref().unwrap_or(""),
                "blocked automated client"
            );
            return Err(SubmitError::Forbidden);
        }

        let caller = identity::resolve(&envelope.identity, &envelope.remote_addr);
        let request = validate(submission)?;

        let rate = self.limiter.check(&caller.key, caller.tier);
        if rate.limited {
            info!(
                caller = %caller.key,
                limit = rate.limit,
                retry_after = rate.retry_after_seconds,
                "rate limited"
            );
            return Err(SubmitError::RateLimited {
                retry_after_seconds: rate.retry_after_seconds,
                is_anonymous: caller.tier.is_anonymous(),
            });
        }

        if let Access::Deny { required } = gate::authorize(request.capability, caller.tier) {
            info!(
                caller = %caller.key,
                tier = %caller.tier,
                capability = %request.capability,
                required = %required,
                "model access denied"
            );
            return Err(SubmitError::ModelAccessDenied {
                required_tier: required,
            });
        }

        let result = self.orchestrator.invoke(&request).await.map_err(|e| {
            warn!(
                caller = %caller.key,
                capability = %request.capability,
                error = %e,
                "coaching failed"
            );
            SubmitError::Provider
        })?;

        let persistence = self.sink.record(&caller.key, &request, &result);
        Ok(Receipt {
            result,
            caller,
            rate,
            persistence,
        })
    }
}

/// Check bounds and resolve the capability id.
pub fn validate(submission: Submission) -> Result<CoachingRequest, SubmitError> {
    let chars = submission.text.chars().count();
    if chars < MIN_TEXT_CHARS {
        return Err(SubmitError::Validation {
            detail: format!("text must be at least {MIN_TEXT_CHARS} characters (got {chars})"),
        });
    }
    if chars > MAX_TEXT_CHARS {
        return Err(SubmitError::Validation {
            detail: format!("text must be at most {MAX_TEXT_CHARS} characters (got {chars})"),
        });
    }
    let capability: Capability = submission
        .capability
        .parse()
        .map_err(|e: gate::UnknownCapability| SubmitError::Validation {
            detail: e.to_string(),
        })?;

    Ok(CoachingRequest {
        text: submission.text,
        register: submission.register,
        goal: submission.goal,
        context: submission.context,
        level: submission.level,
        capability,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(text: &str, capability: &str) -> Submission {
        Submission {
            text: text.to_string(),
            register: Register::default(),
            goal: Goal::default(),
            context: WritingContext::default(),
            level: Proficiency::default(),
            capability: capability.to_string(),
        }
    }

    #[test]
    fn short_text_cites_the_minimum() {
        let err = validate(submission("too shrt", "haiku")).unwrap_err();
        match err {
            SubmitError::Validation { detail } => {
                assert!(detail.contains("at least 10"), "{detail}")
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn bounds_are_inclusive() {
        assert!(validate(submission(&"a".repeat(10), "haiku")).is_ok());
        assert!(validate(submission(&"a".repeat(5000), "haiku")).is_ok());
        assert!(validate(submission(&"a".repeat(9), "haiku")).is_err());
        assert!(validate(submission(&"a".repeat(5001), "haiku")).is_err());
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        // Ten characters, twenty bytes.
        assert!(validate(submission(&"é".repeat(10), "haiku")).is_ok());
    }

    #[test]
    fn unknown_capability_is_a_validation_error() {
        let err = validate(submission("a perfectly fine text", "gpt-4o")).unwrap_err();
        assert!(matches!(err, SubmitError::Validation { .. }));
    }

    #[test]
    fn error_payload_shapes() {
        let json = serde_json::to_value(SubmitError::RateLimited {
            retry_after_seconds: 42,
            is_anonymous: true,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "kind": "rate_limited",
                "retryAfterSeconds": 42,
                "isAnonymous": true
            })
        );

        let json = serde_json::to_value(SubmitError::ModelAccessDenied {
            required_tier: AccessTier::Authenticated,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "model_access_denied", "requiredTier": "Authenticated"})
        );

        let json = serde_json::to_value(SubmitError::Validation {
            detail: "nope".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"kind": "validation_error", "detail": "nope"}));

        let json = serde_json::to_value(SubmitError::Provider).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "provider_error"}));

        let json = serde_json::to_value(SubmitError::Forbidden).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "forbidden"}));
    }
}
