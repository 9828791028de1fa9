//! The coaching payload the model must return, and its strict parser.

use serde::{Deserialize, Serialize};

use crate::provider::TokenUsage;

/// Closed set of error categories the model may tag feedback with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Grammar,
    Spelling,
    Punctuation,
    WordChoice,
    Style,
    Tone,
    Structure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleVariant {
    pub style: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub issue: String,
    pub rationale: String,
    pub rule: String,
    pub example: String,
    pub category: ErrorCategory,
}

/// A reusable expression worth keeping in the caller's phrase bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    pub phrase: String,
    pub meaning: String,
    pub example: String,
}

/// Everything one accepted submission produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachingResult {
    pub corrected: String,
    pub enhanced: String,
    pub variants: Vec<StyleVariant>,
    pub feedback: Vec<FeedbackItem>,
    pub phrases: Vec<Phrase>,
    pub error_categories: Vec<ErrorCategory>,
    pub ambiguity: Option<String>,
    pub usage: TokenUsage,
    /// Provider model that produced this result.
    pub model: String,
}

/// Wire shape of the model's answer.
#[derive(Deserialize)]
struct Payload {
    corrected: String,
    enhanced: String,
    #[serde(default)]
    variants: Vec<StyleVariant>,
    feedback: Vec<FeedbackItem>,
    phrases: Vec<Phrase>,
    error_categories: Vec<ErrorCategory>,
    #[serde(default)]
    ambiguity: Option<String>,
}

/// Parse a model reply into a [`CoachingResult`].
///
/// Returns a human-readable reason on failure. The reply may be wrapped in
/// markdown fences; anything else that does not match the schema is an error.
pub fn parse_reply(text: &str, usage: TokenUsage, model: &str) -> Result<CoachingResult, String> {
    let json = extract_json(text);
    if json.is_empty() {
        return Err("empty reply".to_string());
    }
    let payload: Payload =
        serde_json::from_str(json).map_err(|e| format!("reply does not match schema: {e}"))?;

    if payload.corrected.trim().is_empty() {
        return Err("`corrected` is empty".to_string());
    }
    if payload.enhanced.trim().is_empty() {
        return Err("`enhanced` is empty".to_string());
    }
    if let Some(i) = payload.feedback.iter().position(|f| f.issue.trim().is_empty()) {
        return Err(format!("feedback item {i} has no issue"));
    }
    if let Some(i) = payload.phrases.iter().position(|p| p.phrase.trim().is_empty()) {
        return Err(format!("phrase {i} is empty"));
    }

    Ok(CoachingResult {
        corrected: payload.corrected,
        enhanced: payload.enhanced,
        variants: payload.variants,
        feedback: payload.feedback,
        phrases: payload.phrases,
        error_categories: payload.error_categories,
        ambiguity: payload.ambiguity.filter(|a| !a.trim().is_empty()),
        usage,
        model: model.to_string(),
    })
}

/// Extract JSON from text that may be wrapped in markdown code fences.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(after) = trimmed.strip_prefix("```json")
        && let Some(json) = after.strip_suffix("```")
    {
        return json.trim();
    }
    if let Some(after) = trimmed.strip_prefix("```")
        && let Some(json) = after.strip_suffix("```")
    {
        return json.trim();
    }

    trimmed
}
