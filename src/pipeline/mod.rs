//! Pipeline stages for multimodal PDF ingestion.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a fake extractor in tests) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ clean ──▶ describe ──▶ merge ──▶ chunk
//! (URL/path) (pdfium)   (text)   (vision chain) (hash)   (windows)
//!                                                  │
//!                                                  └──▶ structured
//!                                                       (records)
//! ```
//!
//! 1. [`input`]   — canonicalise the user-supplied path or URL to PDF bytes
//! 2. [`extract`] — per-page text and embedded images; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`]  — PNG-encode images and wrap them for multimodal requests
//! 4. [`clean`]   — deterministic cleanup of page text and model output
//! 5. [`describe`] — the primary → secondary → local vision fallback chain
//! 6. [`merge`]   — pair descriptions with pages, render, hash
//! 7. [`chunk`]   — page-bounded character windows for the vector index
//! 8. [`structured`] — schema-driven record extraction with a text model

pub mod chunk;
pub mod clean;
pub mod describe;
pub mod encode;
pub mod extract;
pub mod input;
pub mod merge;
pub mod structured;
