//! Vision backends: one port, two adapters.
//!
//! ## Why two adapters for three tiers?
//!
//! The primary tier is a document-AI service with its own multipart REST API
//! ([`UpstageBackend`]). The secondary and local tiers are both chat models
//! that accept an image attachment, differing only in the provider behind
//! them (Gemini / OpenAI vs. Ollama / LM Studio), so one
//! [`LlmVisionBackend`] serves both with a different [`DescriptionSource`].

use crate::output::{DescriptionSource, ExtractedImage};
use crate::pipeline::encode::to_image_data;
use crate::prompts::IMAGE_DESCRIPTION_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Tier this backend occupies in the fallback chain.
    fn tier(&self) -> DescriptionSource;

    /// Human-readable name for logs.
    fn name(&self) -> &str;

    async fn describe(&self, image: &ExtractedImage) -> Result<String, VisionError>;
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("vision request failed: {0}")]
    ApiRequestFailed(String),
    #[error("vision service rate limited or out of quota")]
    RateLimited,
    #[error("invalid vision response: {0}")]
    InvalidResponse(String),
    #[error("vision service returned no text")]
    EmptyResponse,
}

// ── Upstage document parse ───────────────────────────────────────────────

/// Primary tier: Upstage document-digitization API.
pub struct UpstageBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl UpstageBackend {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, VisionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VisionError::ApiRequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl VisionBackend for UpstageBackend {
    fn tier(&self) -> DescriptionSource {
        DescriptionSource::Primary
    }

    fn name(&self) -> &str {
        "upstage"
    }

    async fn describe(&self, image: &ExtractedImage) -> Result<String, VisionError> {
        let extension = if image.mime_type == "image/jpeg" { "jpg" } else { "png" };
        let part = Part::bytes(image.bytes.clone())
            .file_name(format!(
                "page{}_img{}.{extension}",
                image.page_number, image.index_on_page
            ))
            .mime_str(&image.mime_type)
            .map_err(|e| VisionError::ApiRequestFailed(e.to_string()))?;
        let form = Form::new()
            .part("document", part)
            .text("model", "document-parse")
            .text("ocr", "force")
            .text("output_formats", "['markdown', 'text']");

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VisionError::ApiRequestFailed(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::PAYMENT_REQUIRED {
            return Err(VisionError::RateLimited);
        }
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(VisionError::ApiRequestFailed(format!("HTTP {status}: {body}")));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| VisionError::InvalidResponse(e.to_string()))?;
        parse_upstage_response(&json).ok_or(VisionError::EmptyResponse)
    }
}

/// Pull the best available text out of a document-parse response.
///
/// Preference: `content.markdown`, then `content.text`, then the elements'
/// own content joined by blank lines.
pub(crate) fn parse_upstage_response(json: &Value) -> Option<String> {
    let non_empty = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let content = json.get("content");
    if let Some(text) = non_empty(content.and_then(|c| c.get("markdown")))
        .or_else(|| non_empty(content.and_then(|c| c.get("text"))))
    {
        return Some(text);
    }

    let parts: Vec<String> = json
        .get("elements")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|el| {
            let c = el.get("content");
            non_empty(c.and_then(|c| c.get("markdown")))
                .or_else(|| non_empty(c.and_then(|c| c.get("text"))))
                .or_else(|| non_empty(el.get("text")))
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

// ── Chat-model vision ────────────────────────────────────────────────────

/// Secondary or local tier: any `edgequake-llm` provider with vision input.
pub struct LlmVisionBackend {
    provider: Arc<dyn LLMProvider>,
    tier: DescriptionSource,
    name: String,
    max_tokens: usize,
}

impl LlmVisionBackend {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        tier: DescriptionSource,
        name: impl Into<String>,
        max_tokens: usize,
    ) -> Self {
        Self {
            provider,
            tier,
            name: name.into(),
            max_tokens,
        }
    }
}

#[async_trait]
impl VisionBackend for LlmVisionBackend {
    fn tier(&self) -> DescriptionSource {
        self.tier
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn describe(&self, image: &ExtractedImage) -> Result<String, VisionError> {
        let messages = vec![
            ChatMessage::system(IMAGE_DESCRIPTION_PROMPT),
            ChatMessage::user_with_images("", vec![to_image_data(image)]),
        ];
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("429") || msg.to_lowercase().contains("quota") {
                    VisionError::RateLimited
                } else {
                    VisionError::ApiRequestFailed(msg)
                }
            })?;

        debug!(
            "{}: page {} image {} described ({} output tokens)",
            self.name, image.page_number, image.index_on_page, response.completion_tokens
        );

        let text = response.content.trim();
        if text.is_empty() {
            return Err(VisionError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}
