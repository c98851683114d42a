//! Error types for the multimodal-rag library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`IngestError`] — **Fatal**: the operation cannot proceed at all
//!   (bad input file, empty document, provider not configured, store
//!   unreachable). Returned as `Err(IngestError)` from the top-level
//!   entry points.
//!
//! * [`StageWarning`] — **Non-fatal**: a single image could not be
//!   described, a model response could not be parsed, or one record failed
//!   to persist. Collected inside [`crate::output::IngestReport`] so callers
//!   can tell a partial run from a clean one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the multimodal-rag library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The input was read, but is not a PDF.
    #[error("Input is not a valid PDF: '{source_id}'\nFirst bytes: {magic:?}")]
    NotAPdf { source_id: String, magic: Vec<u8> },

    /// The PDF parsed, but holds no pages or no content at all.
    #[error("Document '{source_id}' is empty: nothing to ingest")]
    EmptyDocument { source_id: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{source_id}' is corrupt: {detail}")]
    CorruptPdf { source_id: String, detail: String },

    /// PDF requires a password but none (or the wrong one) was provided.
    #[error("PDF '{source_id}' is encrypted; provide the password with --password")]
    PasswordRequired { source_id: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first run.\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Service errors ────────────────────────────────────────────────────
    /// A configured LLM provider could not be created.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The language model failed on a call whose failure is fatal
    /// (answer synthesis).
    #[error("Language model call failed: {0}")]
    LanguageModel(#[from] crate::services::llm::LlmError),

    /// Embedding computation failed.
    #[error("Embedding failed: {0}")]
    Embedding(#[from] crate::services::embed::EmbedError),

    /// The vector store rejected an operation or is unreachable.
    #[error("Vector store error: {0}")]
    VectorStore(#[from] crate::services::vector_store::VectorStoreError),

    /// The relational record store is unreachable.
    #[error("Record store error: {0}")]
    RecordStore(#[from] crate::services::record_store::RecordStoreError),

    // ── Artifact errors ───────────────────────────────────────────────────
    /// No saved content exists for the requested source.
    #[error("No saved content for '{source_id}' (looked in {path})")]
    ArtifactNotFound { source_id: String, path: PathBuf },

    /// A saved artifact exists but cannot be decoded.
    #[error("Saved content '{path}' is unreadable: {detail}")]
    ArtifactCorrupt { path: PathBuf, detail: String },

    /// Page sequence handed to the merger is out of order.
    #[error("Page {page} appears after page {previous}; page order must be non-decreasing")]
    PageOrder { previous: u32, page: u32 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Pipeline stage a [`StageWarning`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Describe,
    Extract,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Describe => "describe",
            Stage::Extract => "extract",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// A non-fatal problem reported by one stage of the pipeline.
///
/// The run continues; the warning ends up in the report so callers can
/// decide whether to re-run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("[{stage}] {detail}")]
pub struct StageWarning {
    pub stage: Stage,
    pub detail: String,
}

impl StageWarning {
    pub fn new(stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_a_pdf_display() {
        let e = IngestError::NotAPdf {
            source_id: "notes.txt".into(),
            magic: b"hell".to_vec(),
        };
        let msg = e.to_string();
        assert!(msg.contains("notes.txt"), "got: {msg}");
    }

    #[test]
    fn page_order_display() {
        let e = IngestError::PageOrder {
            previous: 3,
            page: 2,
        };
        assert!(e.to_string().contains("Page 2 appears after page 3"));
    }

    #[test]
    fn warning_display_carries_stage() {
        let w = StageWarning::new(Stage::Extract, "response was not JSON");
        assert_eq!(w.to_string(), "[extract] response was not JSON");
    }

    #[test]
    fn warning_serialises_stage_snake_case() {
        let w = StageWarning::new(Stage::Persist, "db locked");
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("\"persist\""), "got: {json}");
    }
}
