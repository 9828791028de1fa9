use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{Completion, CompletionRequest, Provider, ProviderError, TokenUsage};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Anthropic's "overloaded" status.
const STATUS_OVERLOADED: u16 = 529;

/// Calls the Anthropic Messages API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    url: String,
}

impl AnthropicProvider {
    /// Build a provider that reads its key from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        Self::new(api_key, API_URL)
    }

    pub fn new(api_key: Option<String>, url: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Rejected(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            url: url.into(),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ProviderError::Rejected(format!("no Anthropic credentials found. Set {API_KEY_ENV}."))
        })?;

        let messages = [Message {
            role: "user",
            content: &request.prompt,
        }];
        let body = ApiRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: &messages,
        };

        let resp = self
            .client
            .post(&self.url)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .header("x-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Unreadable(format!("Anthropic response envelope: {e}")))?;

        let text: String = api_resp
            .content
            .iter()
            .filter_map(|block| {
                if block.content_type == "text" {
                    block.text.as_deref()
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("");

        let usage = api_resp
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default();
        debug!(
            model = %api_resp.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "anthropic call finished"
        );

        Ok(Completion {
            text,
            usage,
            model: api_resp.model,
        })
    }
}

fn classify_send_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else if err.is_connect() || err.is_request() {
        ProviderError::Transient(err.to_string())
    } else {
        ProviderError::Rejected(err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = format!("Anthropic API error ({status}): {body}");
    let transient = status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
        || status.as_u16() == STATUS_OVERLOADED;
    if transient {
        ProviderError::Transient(detail)
    } else {
        ProviderError::Rejected(detail)
    }
}

// --- API types ---

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [Message<'a>],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}
