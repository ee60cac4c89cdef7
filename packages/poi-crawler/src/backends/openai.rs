//! OpenAI-compatible chat completions backend.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};
use crate::traits::{Prompt, PromptKind, ReasoningBackend};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Clone)]
pub struct OpenAiBackend {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Build from `OPENAI_API_KEY`, optional `OPENAI_BASE_URL` and `POI_MODEL`.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?;
        let mut backend = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            backend = backend.with_base_url(base_url);
        }
        if let Ok(model) = std::env::var("POI_MODEL") {
            backend = backend.with_model(model);
        }
        Ok(backend)
    }

    /// Set a custom base URL (for Azure, proxies, local servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &Prompt) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": 0.0,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
        });
        if prompt.kind == PromptKind::Extraction {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

fn parse_completion(body: &str) -> BackendResult<String> {
    let response: ChatResponseRaw =
        serde_json::from_str(body).map_err(|e| BackendError::Malformed(e.to_string()))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| BackendError::Malformed("completion has no content".into()))
}

#[async_trait]
impl ReasoningBackend for OpenAiBackend {
    async fn complete(&self, prompt: &Prompt) -> BackendResult<String> {
        let start = std::time::Instant::now();

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, page_url = %prompt.page_url, "Chat completion request failed");
                if e.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        if !status.is_success() {
            warn!(status = %status, error = %body, "Chat completion API error");
            return Err(BackendError::Unreachable(format!("HTTP {status}: {body}")));
        }

        let content = parse_completion(&body)?;
        debug!(
            model = %self.model,
            kind = ?prompt.kind,
            page_url = %prompt.page_url,
            duration_ms = start.elapsed().as_millis(),
            "Chat completion"
        );
        Ok(content)
    }
}
