//! Language-model port and the `edgequake-llm` adapter behind it.
//!
//! Both structured extraction and answer synthesis go through
//! [`LanguageModel::complete`]: a system prompt, a user prompt, a
//! temperature. Keeping the port this narrow means tests can script
//! responses without implementing the full `LLMProvider` surface.

use crate::config::ProviderSpec;
use crate::error::IngestError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, LlmError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("api request failed: {0}")]
    ApiRequestFailed(String),
    #[error("model returned an empty response")]
    EmptyResponse,
}

/// [`LanguageModel`] backed by any `edgequake-llm` provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    max_tokens: usize,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, max_tokens: usize) -> Self {
        Self {
            provider,
            max_tokens,
        }
    }

    /// Build from a provider/model pair, or auto-detect when `spec` is `None`.
    pub fn from_spec(spec: Option<&ProviderSpec>, max_tokens: usize) -> Result<Self, IngestError> {
        Ok(Self::new(resolve_provider(spec)?, max_tokens))
    }

    pub fn provider(&self) -> &Arc<dyn LLMProvider> {
        &self.provider
    }
}

#[async_trait]
impl LanguageModel for ProviderModel {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ];
        let options = CompletionOptions {
            temperature: Some(temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| LlmError::ApiRequestFailed(e.to_string()))?;

        debug!(
            "completion: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        if response.content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(response.content)
    }
}

/// Create an `edgequake-llm` provider.
///
/// With an explicit spec the factory is asked for exactly that provider and
/// model; it reads the matching API key (`OPENAI_API_KEY`, `GEMINI_API_KEY`,
/// ...) itself. Without one the factory auto-detects; the OpenAI default is
/// chosen earlier, by [`PipelineConfig::from_lookup`](crate::PipelineConfig::from_lookup).
pub fn resolve_provider(spec: Option<&ProviderSpec>) -> Result<Arc<dyn LLMProvider>, IngestError> {
    if let Some(spec) = spec {
        return create_provider(spec);
    }

    let (llm, _embedding) =
        ProviderFactory::from_env().map_err(|e| IngestError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, GEMINI_API_KEY, or LLM_PROVIDER + LLM_MODEL.\n\
                Error: {e}"
            ),
        })?;
    Ok(llm)
}

pub(crate) fn create_provider(spec: &ProviderSpec) -> Result<Arc<dyn LLMProvider>, IngestError> {
    ProviderFactory::create_llm_provider(&spec.provider, &spec.model).map_err(|e| {
        IngestError::ProviderNotConfigured {
            provider: spec.provider.clone(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_not_configured() {
        let err = create_provider(&ProviderSpec::new("no-such-provider", "m"))
            .err()
            .expect("unknown provider must fail");
        assert!(matches!(
            err,
            IngestError::ProviderNotConfigured { ref provider, .. } if provider == "no-such-provider"
        ));
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            LlmError::ApiRequestFailed("429".into()).to_string(),
            "api request failed: 429"
        );
        assert_eq!(
            LlmError::EmptyResponse.to_string(),
            "model returned an empty response"
        );
    }
}
