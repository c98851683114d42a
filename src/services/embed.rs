//! Embedding port and an OpenAI-compatible `/embeddings` client.

use crate::config::EmbeddingSettings;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut out = self.embed_batch(&[text]).await?;
        out.pop()
            .ok_or_else(|| EmbedError::InvalidResponse("no embedding returned".into()))
    }

    /// Embeddings for `texts`, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding api request failed: {0}")]
    ApiRequestFailed(String),
    #[error("embedding rate limited")]
    RateLimited,
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("embedding client misconfigured: {0}")]
    Misconfigured(String),
}

/// Async client for OpenAI-compatible embedding endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self, EmbedError> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                EmbedError::Misconfigured(
                    "missing embedding API key (set OPENAI_API_KEY or EMBEDDING_API_KEY)".into(),
                )
            })?;
        if settings.model.trim().is_empty() {
            return Err(EmbedError::Misconfigured("missing embedding model name".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| EmbedError::Misconfigured("invalid embedding API key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| EmbedError::Misconfigured(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            dimensions: settings.dimensions,
            batch_size: settings.batch_size.max(1),
        })
    }

    async fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbedError::ApiRequestFailed(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbedError::RateLimited);
        }
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbedError::ApiRequestFailed(format!("HTTP {status}: {body}")));
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::InvalidResponse(e.to_string()))?;
        into_ordered(parsed, inputs.len())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!("embedding batch of {} inputs", batch.len());
            out.extend(self.request(batch).await?);
        }
        Ok(out)
    }
}

fn into_ordered(mut parsed: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, EmbedError> {
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.len() != expected {
        return Err(EmbedError::InvalidResponse(format!(
            "{} embeddings returned for {} inputs",
            parsed.data.len(),
            expected
        )));
    }
    Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_is_reordered_by_index() {
        let parsed: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#,
        )
        .unwrap();
        let out = into_ordered(parsed, 2).unwrap();
        assert_eq!(out, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn count_mismatch_is_invalid() {
        let parsed: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"index":0,"embedding":[1.0]}]}"#).unwrap();
        assert!(matches!(
            into_ordered(parsed, 3),
            Err(EmbedError::InvalidResponse(_))
        ));
    }

    #[test]
    fn missing_key_is_misconfigured() {
        let settings = EmbeddingSettings::default();
        assert!(matches!(
            OpenAiEmbedder::new(&settings),
            Err(EmbedError::Misconfigured(_))
        ));
    }

    #[test]
    fn request_omits_absent_dimensions() {
        let inputs = ["a"];
        let req = EmbeddingRequest {
            model: "m",
            input: &inputs,
            dimensions: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"model":"m","input":["a"]}"#);
    }
}
