//! Configuration types for ingestion, indexing and question answering.
//!
//! All behaviour is controlled through one immutable [`PipelineConfig`],
//! built once at process start via [`PipelineConfig::builder()`] or
//! [`PipelineConfig::from_env()`] and passed explicitly to every component.
//! Nothing inside the pipeline reads the environment on its own.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A provider name paired with a model identifier, e.g. `gemini` /
/// `gemini-2.0-flash`. Provider names are those understood by
/// `edgequake_llm::ProviderFactory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub provider: String,
    pub model: String,
}

impl ProviderSpec {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ProviderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Settings for the OpenAI-compatible embeddings endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct EmbeddingSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Requested output dimensionality (only some models honour it).
    pub dimensions: Option<usize>,
    /// Inputs per request.
    pub batch_size: usize,
    /// HTTP timeout for one embedding request, in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
            batch_size: 64,
            timeout_secs: 60,
        }
    }
}

impl fmt::Debug for EmbeddingSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("batch_size", &self.batch_size)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Configuration for every stage of the pipeline.
///
/// # Example
/// ```rust
/// use multimodal_rag::{PipelineConfig, ProviderSpec};
///
/// let config = PipelineConfig::builder()
///     .data_dir("./data")
///     .chunk_size(800)
///     .chunk_overlap(100)
///     .vision_llm(ProviderSpec::new("gemini", "gemini-2.0-flash"))
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 800);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root directory for saved artifacts, the vector index and the record
    /// database. Default: `./data`.
    pub data_dir: PathBuf,

    /// Maximum characters per chunk. Default: 1000.
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks of a page. Default: 200.
    pub chunk_overlap: usize,

    /// Chunks retrieved per question. Default: 4.
    pub retrieval_k: usize,

    /// Per-backend timeout for one image description, in seconds. Default: 60.
    pub vision_timeout_secs: u64,

    /// Images described at once. Output order is unaffected. Default: 4.
    pub describe_concurrency: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Upstage API key. Enables the primary vision tier when set.
    pub upstage_api_key: Option<String>,

    /// Upstage document-digitization endpoint.
    pub upstage_endpoint: String,

    /// Use the primary tier when it is configured. Turning this off skips
    /// Upstage for a run without unsetting its key. Default: true.
    pub use_primary_vision: bool,

    /// Secondary vision tier (remote vision LLM). Disabled when `None`.
    pub vision_llm: Option<ProviderSpec>,

    /// Local vision tier (e.g. `ollama` / `llava`). Disabled when `None`.
    pub local_vision: Option<ProviderSpec>,

    /// Model used for answer synthesis. `None` auto-detects from API keys.
    pub answer_llm: Option<ProviderSpec>,

    /// Model used for structured extraction. `None` reuses `answer_llm`.
    pub extraction_llm: Option<ProviderSpec>,

    /// Previous exchanges carried into each conversational answer.
    /// Default: 3.
    pub chat_history_turns: usize,

    /// Sampling temperature for answers. Extraction always runs at 0.
    /// Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens per completion. Default: 4096.
    pub max_tokens: usize,

    pub embedding: EmbeddingSettings,

    /// Name of the vector collection. Default: `multimodal_docs`.
    pub collection_name: String,

    /// Run structured record extraction after indexing. Default: true.
    pub extract_structured: bool,

    /// Reprocess a source even when its bytes are unchanged. Default: false.
    pub force: bool,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            chunk_size: 1000,
            chunk_overlap: 200,
            retrieval_k: 4,
            vision_timeout_secs: 60,
            describe_concurrency: 4,
            download_timeout_secs: 120,
            upstage_api_key: None,
            upstage_endpoint: "https://api.upstage.ai/v1/document-digitization".to_string(),
            use_primary_vision: true,
            vision_llm: None,
            local_vision: None,
            answer_llm: None,
            extraction_llm: None,
            chat_history_turns: 3,
            temperature: 0.1,
            max_tokens: 4096,
            embedding: EmbeddingSettings::default(),
            collection_name: "multimodal_docs".to_string(),
            extract_structured: true,
            force: false,
            password: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("data_dir", &self.data_dir)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("retrieval_k", &self.retrieval_k)
            .field("vision_timeout_secs", &self.vision_timeout_secs)
            .field("describe_concurrency", &self.describe_concurrency)
            .field(
                "upstage_api_key",
                &self.upstage_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("use_primary_vision", &self.use_primary_vision)
            .field("vision_llm", &self.vision_llm)
            .field("local_vision", &self.local_vision)
            .field("answer_llm", &self.answer_llm)
            .field("extraction_llm", &self.extraction_llm)
            .field("chat_history_turns", &self.chat_history_turns)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("embedding", &self.embedding)
            .field("collection_name", &self.collection_name)
            .field("extract_structured", &self.extract_structured)
            .field("force", &self.force)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a configuration from process environment variables.
    pub fn from_env() -> Result<Self, IngestError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Recognised keys: `DATA_DIR`, `CHUNK_SIZE`, `CHUNK_OVERLAP`,
    /// `RETRIEVAL_K`, `VISION_TIMEOUT_SECS`, `UPSTAGE_API_KEY`,
    /// `GEMINI_API_KEY` / `GOOGLE_API_KEY` (enable the Gemini vision tier),
    /// `VISION_PROVIDER`, `VISION_MODEL`, `LOCAL_VISION_PROVIDER`,
    /// `LOCAL_VISION_MODEL`, `LLM_PROVIDER`, `LLM_MODEL`,
    /// `EXTRACTION_PROVIDER`, `EXTRACTION_MODEL`, `OPENAI_API_KEY`,
    /// `EMBEDDING_API_KEY`, `EMBEDDING_BASE_URL`, `EMBEDDING_MODEL`,
    /// `EMBEDDING_TIMEOUT_SECS`, `CHAT_HISTORY_TURNS`, `COLLECTION_NAME`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IngestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parse_usize = |key: &str| -> Result<Option<usize>, IngestError> {
            get(key)
                .map(|v| {
                    v.trim().parse::<usize>().map_err(|_| {
                        IngestError::InvalidConfig(format!("{key} must be an integer, got '{v}'"))
                    })
                })
                .transpose()
        };

        let mut b = Self::builder();

        if let Some(dir) = get("DATA_DIR") {
            b = b.data_dir(dir);
        }
        if let Some(n) = parse_usize("CHUNK_SIZE")? {
            b = b.chunk_size(n);
        }
        if let Some(n) = parse_usize("CHUNK_OVERLAP")? {
            b = b.chunk_overlap(n);
        }
        if let Some(n) = parse_usize("RETRIEVAL_K")? {
            b = b.retrieval_k(n);
        }
        if let Some(n) = parse_usize("VISION_TIMEOUT_SECS")? {
            b = b.vision_timeout_secs(n as u64);
        }
        if let Some(key) = get("UPSTAGE_API_KEY") {
            b = b.upstage_api_key(key);
        }

        let vision_model = get("VISION_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string());
        if let Some(provider) = get("VISION_PROVIDER") {
            b = b.vision_llm(ProviderSpec::new(provider, vision_model));
        } else if get("GEMINI_API_KEY").is_some() || get("GOOGLE_API_KEY").is_some() {
            b = b.vision_llm(ProviderSpec::new("gemini", vision_model));
        }

        if let Some(model) = get("LOCAL_VISION_MODEL") {
            let provider = get("LOCAL_VISION_PROVIDER").unwrap_or_else(|| "ollama".to_string());
            b = b.local_vision(ProviderSpec::new(provider, model));
        }

        // An OpenAI key picks the answer model when no provider is named;
        // otherwise the provider factory auto-detects at build time.
        if let (Some(provider), Some(model)) = (get("LLM_PROVIDER"), get("LLM_MODEL")) {
            b = b.answer_llm(ProviderSpec::new(provider, model));
        } else if get("OPENAI_API_KEY").is_some() {
            let model = get("LLM_MODEL").unwrap_or_else(|| "gpt-4o".to_string());
            b = b.answer_llm(ProviderSpec::new("openai", model));
        }
        if let Some(n) = parse_usize("CHAT_HISTORY_TURNS")? {
            b = b.chat_history_turns(n);
        }
        if let (Some(provider), Some(model)) = (get("EXTRACTION_PROVIDER"), get("EXTRACTION_MODEL"))
        {
            b = b.extraction_llm(ProviderSpec::new(provider, model));
        }

        let mut embedding = EmbeddingSettings {
            api_key: get("EMBEDDING_API_KEY").or_else(|| get("OPENAI_API_KEY")),
            ..EmbeddingSettings::default()
        };
        if let Some(url) = get("EMBEDDING_BASE_URL") {
            embedding.base_url = url;
        }
        if let Some(model) = get("EMBEDDING_MODEL") {
            embedding.model = model;
        }
        if let Some(secs) = parse_usize("EMBEDDING_TIMEOUT_SECS")? {
            embedding.timeout_secs = secs as u64;
        }
        b = b.embedding(embedding);

        if let Some(name) = get("COLLECTION_NAME") {
            b = b.collection_name(name);
        }

        b.build()
    }

    /// Directory holding saved intermediate artifacts.
    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }

    /// SQLite database holding the vector index.
    pub fn index_path(&self) -> PathBuf {
        self.data_dir
            .join("vectorstore")
            .join(format!("{}.sqlite3", self.collection_name))
    }

    /// SQLite database for structured records.
    pub fn records_db_path(&self) -> PathBuf {
        self.data_dir.join("records.sqlite3")
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n;
        self
    }

    pub fn chunk_overlap(mut self, n: usize) -> Self {
        self.config.chunk_overlap = n;
        self
    }

    pub fn retrieval_k(mut self, k: usize) -> Self {
        self.config.retrieval_k = k;
        self
    }

    pub fn vision_timeout_secs(mut self, secs: u64) -> Self {
        self.config.vision_timeout_secs = secs;
        self
    }

    pub fn describe_concurrency(mut self, n: usize) -> Self {
        self.config.describe_concurrency = n.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn upstage_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.upstage_api_key = Some(key.into());
        self
    }

    pub fn upstage_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.upstage_endpoint = url.into();
        self
    }

    pub fn use_primary_vision(mut self, v: bool) -> Self {
        self.config.use_primary_vision = v;
        self
    }

    pub fn chat_history_turns(mut self, n: usize) -> Self {
        self.config.chat_history_turns = n;
        self
    }

    pub fn vision_llm(mut self, spec: ProviderSpec) -> Self {
        self.config.vision_llm = Some(spec);
        self
    }

    pub fn local_vision(mut self, spec: ProviderSpec) -> Self {
        self.config.local_vision = Some(spec);
        self
    }

    pub fn answer_llm(mut self, spec: ProviderSpec) -> Self {
        self.config.answer_llm = Some(spec);
        self
    }

    pub fn extraction_llm(mut self, spec: ProviderSpec) -> Self {
        self.config.extraction_llm = Some(spec);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn embedding(mut self, settings: EmbeddingSettings) -> Self {
        self.config.embedding = settings;
        self
    }

    pub fn collection_name(mut self, name: impl Into<String>) -> Self {
        self.config.collection_name = name.into();
        self
    }

    pub fn extract_structured(mut self, v: bool) -> Self {
        self.config.extract_structured = v;
        self
    }

    pub fn force(mut self, v: bool) -> Self {
        self.config.force = v;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, IngestError> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(IngestError::InvalidConfig(
                "chunk size must be ≥ 1".into(),
            ));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(IngestError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if c.vision_timeout_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "vision timeout must be ≥ 1 second".into(),
            ));
        }
        if c.embedding.timeout_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "embedding timeout must be ≥ 1 second".into(),
            ));
        }
        if c.embedding.batch_size == 0 {
            return Err(IngestError::InvalidConfig(
                "embedding batch size must be ≥ 1".into(),
            ));
        }
        if c.collection_name.trim().is_empty()
            || c.collection_name.contains(['/', '\\'])
        {
            return Err(IngestError::InvalidConfig(format!(
                "invalid collection name '{}'",
                c.collection_name
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let c = PipelineConfig::builder().build().unwrap();
        assert_eq!(c.chunk_size, 1000);
        assert_eq!(c.chunk_overlap, 200);
        assert_eq!(c.retrieval_k, 4);
        assert!(c.extract_structured);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let err = PipelineConfig::builder()
            .chunk_size(100)
            .chunk_overlap(100)
            .build()
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(_)));
    }

    #[test]
    fn collection_name_cannot_escape_data_dir() {
        let err = PipelineConfig::builder()
            .collection_name("../x")
            .build()
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(_)));
    }

    #[test]
    fn from_lookup_enables_tiers() {
        let c = PipelineConfig::from_lookup(lookup(&[
            ("UPSTAGE_API_KEY", "up-123"),
            ("GEMINI_API_KEY", "g-123"),
            ("LOCAL_VISION_MODEL", "llava"),
            ("CHUNK_SIZE", "500"),
            ("CHUNK_OVERLAP", "50"),
        ]))
        .unwrap();
        assert_eq!(c.upstage_api_key.as_deref(), Some("up-123"));
        assert_eq!(
            c.vision_llm,
            Some(ProviderSpec::new("gemini", "gemini-2.0-flash"))
        );
        assert_eq!(c.local_vision, Some(ProviderSpec::new("ollama", "llava")));
        assert_eq!(c.chunk_size, 500);
        assert_eq!(c.chunk_overlap, 50);
    }

    #[test]
    fn openai_key_selects_answer_model() {
        let c = PipelineConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-1")])).unwrap();
        assert_eq!(c.answer_llm, Some(ProviderSpec::new("openai", "gpt-4o")));

        let c = PipelineConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-1"),
            ("LLM_MODEL", "gpt-4.1-mini"),
        ]))
        .unwrap();
        assert_eq!(c.answer_llm, Some(ProviderSpec::new("openai", "gpt-4.1-mini")));

        let c = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert!(c.answer_llm.is_none());
    }

    #[test]
    fn embedding_timeout_is_its_own_setting() {
        let c = PipelineConfig::from_lookup(lookup(&[("EMBEDDING_TIMEOUT_SECS", "15")])).unwrap();
        assert_eq!(c.embedding.timeout_secs, 15);
        assert_eq!(c.download_timeout_secs, 120);

        let settings = EmbeddingSettings {
            timeout_secs: 0,
            ..EmbeddingSettings::default()
        };
        assert!(PipelineConfig::builder().embedding(settings).build().is_err());
    }

    #[test]
    fn from_lookup_rejects_garbage_numbers() {
        let err = PipelineConfig::from_lookup(lookup(&[("CHUNK_SIZE", "big")])).unwrap_err();
        assert!(err.to_string().contains("CHUNK_SIZE"));
    }

    #[test]
    fn from_lookup_ignores_blank_values() {
        let c = PipelineConfig::from_lookup(lookup(&[("UPSTAGE_API_KEY", "  ")])).unwrap();
        assert!(c.upstage_api_key.is_none());
        assert!(c.vision_llm.is_none());
    }

    #[test]
    fn debug_redacts_secrets() {
        let c = PipelineConfig::builder()
            .upstage_api_key("secret-key")
            .password("hunter2")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-key"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn derived_paths_live_under_data_dir() {
        let c = PipelineConfig::builder().data_dir("/tmp/rag").build().unwrap();
        assert_eq!(c.processed_dir(), PathBuf::from("/tmp/rag/processed"));
        assert_eq!(
            c.index_path(),
            PathBuf::from("/tmp/rag/vectorstore/multimodal_docs.sqlite3")
        );
    }
}
