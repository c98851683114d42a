//! Capability traits for every external collaborator, plus the adapters
//! that ship with the crate.
//!
//! The pipeline only ever talks to these traits. Production wiring builds
//! the concrete adapters from a [`crate::PipelineConfig`]; tests substitute
//! in-memory fakes.
//!
//! | Trait | Adapter(s) |
//! |-------|------------|
//! | [`vision::VisionBackend`] | [`vision::UpstageBackend`], [`vision::LlmVisionBackend`] |
//! | [`llm::LanguageModel`] | [`llm::ProviderModel`] |
//! | [`embed::Embedder`] | [`embed::OpenAiEmbedder`] |
//! | [`vector_store::VectorStore`] | [`vector_store::SqliteVectorStore`] |
//! | [`record_store::RecordStore`] | [`record_store::SqliteRecordStore`] |

pub mod embed;
pub mod llm;
pub mod record_store;
pub mod vector_store;
pub mod vision;

pub use embed::{EmbedError, Embedder, OpenAiEmbedder};
pub use llm::{LanguageModel, LlmError, ProviderModel};
pub use record_store::{RecordStore, RecordStoreError, SqliteRecordStore};
pub use vector_store::{ScoredChunk, SqliteVectorStore, VectorStore, VectorStoreError};
pub use vision::{LlmVisionBackend, UpstageBackend, VisionBackend, VisionError};
