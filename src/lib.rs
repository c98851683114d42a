//! # multimodal-rag
//!
//! Ingest PDF documents (text *and* images) into a vector index, extract
//! structured telecom-package records from them, and answer questions over
//! the indexed corpus.
//!
//! ## Why describe images?
//!
//! Brochures and price lists keep much of their content in pictures: tables
//! pasted as images, charts, scanned appendices. Text extraction alone loses
//! all of it. Every embedded image is therefore sent through a fallback chain
//! of vision services (document-AI → vision LLM → local model) and its
//! description is merged into the page it came from, so the same chunks that
//! answer questions also feed record extraction.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL, validate magic bytes
//!  ├─ 2. Extract   page text + embedded images via pdfium (spawn_blocking)
//!  ├─ 3. Describe  primary → secondary → local vision chain, per image
//!  ├─ 4. Merge     ordered pages + descriptions, SHA-256 content hash
//!  ├─ 5. Save      {data_dir}/processed/{source}.content.json
//!  ├─ 6. Index     page-bounded chunks → embeddings → vector store
//!  └─ 7. Records   LLM extraction → cleaning → SQLite upsert by package name
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use multimodal_rag::{Ingestor, PipelineConfig, QueryPipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Keys and models come from UPSTAGE_API_KEY / GEMINI_API_KEY / OPENAI_API_KEY ...
//!     let config = PipelineConfig::from_env()?;
//!
//!     let ingestor = Ingestor::from_config(config.clone())?;
//!     let report = ingestor.ingest("brochure.pdf").await?;
//!     eprintln!("{} chunks, {} records", report.chunks_indexed, report.records.len());
//!
//!     let answer = QueryPipeline::from_config(&config)?
//!         .answer("Giá gói SD70 là bao nhiêu?")
//!         .await?;
//!     println!("{}", answer.answer);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mmrag` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! multimodal-rag = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod content;
pub mod error;
pub mod index;
pub mod ingest;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod query;
pub mod schema;
pub mod services;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EmbeddingSettings, PipelineConfig, PipelineConfigBuilder, ProviderSpec};
pub use content::{ArtifactStatistics, ContentArtifact, ContentStore};
pub use error::{IngestError, Stage, StageWarning};
pub use index::VectorIndexer;
pub use ingest::{Ingestor, Services};
pub use output::{
    Answer, DescriptionSource, ExtractedImage, ImageDescription, IngestOutcome, IngestReport,
    MergedDocument, PageContent, PageText, SourceReference, VectorChunk,
};
pub use pipeline::describe::ImageDescriber;
pub use pipeline::extract::{ExtractedPdf, PdfExtractor, PdfiumExtractor};
pub use pipeline::merge::merge;
pub use pipeline::structured::{ExtractionOutcome, StructuredExtractor};
pub use progress::{IngestPhase, IngestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use query::{Conversation, QueryPipeline, Turn};
pub use schema::{
    EmptyFieldTable, FieldKind, FieldSpec, FieldTable, StructuredRecord, ValidationIssue,
};
