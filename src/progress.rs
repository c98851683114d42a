//! Progress-callback trait for ingestion events.
//!
//! Pass an [`Arc<dyn IngestProgressCallback>`] to
//! [`crate::Ingestor::with_progress`] to receive events as a document moves
//! through extraction, description, indexing and record extraction.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal progress bar, a log line or a
//! channel without the library knowing how the host communicates. Image
//! descriptions run concurrently, so the trait is `Send + Sync`.
//!
//! # Example
//!
//! ```rust
//! use multimodal_rag::IngestProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     described: AtomicUsize,
//! }
//!
//! impl IngestProgressCallback for CountingCallback {
//!     fn on_image_described(&self, _page: u32, _total: usize, succeeded: bool) {
//!         if succeeded {
//!             self.described.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//! ```

use std::sync::Arc;

/// Phases reported through [`IngestProgressCallback::on_phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPhase {
    Extracting,
    Describing,
    Indexing,
    ExtractingRecords,
    PersistingRecords,
}

impl std::fmt::Display for IngestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IngestPhase::Extracting => "extracting pages",
            IngestPhase::Describing => "describing images",
            IngestPhase::Indexing => "indexing",
            IngestPhase::ExtractingRecords => "extracting records",
            IngestPhase::PersistingRecords => "persisting records",
        };
        f.write_str(s)
    }
}

/// Called by the ingestor as it processes a document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_image_described` may be called from several tasks at once.
/// Implementations must protect shared mutable state (e.g. `AtomicUsize`).
pub trait IngestProgressCallback: Send + Sync {
    /// Called once after extraction, before any image is described.
    ///
    /// # Arguments
    /// * `source`       — source identifier
    /// * `total_pages`  — pages extracted
    /// * `total_images` — images that will be described
    fn on_ingest_start(&self, source: &str, total_pages: usize, total_images: usize) {
        let _ = (source, total_pages, total_images);
    }

    /// Called on entry to each phase.
    fn on_phase(&self, phase: IngestPhase) {
        let _ = phase;
    }

    /// Called once per image, whichever backend answered.
    ///
    /// # Arguments
    /// * `page_number`  — page the image belongs to
    /// * `total_images` — images in the document
    /// * `succeeded`    — false when the whole fallback chain failed
    fn on_image_described(&self, page_number: u32, total_images: usize, succeeded: bool) {
        let _ = (page_number, total_images, succeeded);
    }

    /// Called once when the run finishes.
    ///
    /// # Arguments
    /// * `chunks_indexed` — chunks written to the vector store
    /// * `records`        — structured records extracted
    fn on_ingest_complete(&self, chunks_indexed: usize, records: usize) {
        let _ = (chunks_indexed, records);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn IngestProgressCallback>;
