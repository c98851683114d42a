//! Data model shared by every pipeline stage.
//!
//! Page ordering is the one invariant that runs through all of these types:
//! `page_number` is 1-indexed and never decreases along a sequence, so any
//! chunk or answer source can be traced back to the page it came from.

use crate::error::StageWarning;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Text block produced by the Page Extractor for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

impl PageText {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
        }
    }
}

/// Image produced by the Image Extractor, PNG-encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub page_number: u32,
    /// 0-based position of the image among the images of its page.
    pub index_on_page: usize,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ExtractedImage {
    pub fn png(page_number: u32, index_on_page: usize, bytes: Vec<u8>) -> Self {
        Self {
            page_number,
            index_on_page,
            bytes,
            mime_type: "image/png".to_string(),
        }
    }
}

impl fmt::Debug for ExtractedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractedImage")
            .field("page_number", &self.page_number)
            .field("index_on_page", &self.index_on_page)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Which tier of the vision fallback chain produced a description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionSource {
    /// Remote document-AI service (Upstage).
    Primary,
    /// Remote general vision LLM.
    Secondary,
    /// Locally hosted model.
    Local,
}

impl fmt::Display for DescriptionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DescriptionSource::Primary => "primary",
            DescriptionSource::Secondary => "secondary",
            DescriptionSource::Local => "local",
        };
        f.write_str(name)
    }
}

/// Placeholder text used when no backend could describe an image.
pub const IMAGE_PLACEHOLDER: &str = "<---image--->";

/// Description of one image, with the backend that satisfied the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescription {
    pub source_backend: DescriptionSource,
    pub text: String,
    pub succeeded: bool,
}

impl ImageDescription {
    pub fn described(source_backend: DescriptionSource, text: impl Into<String>) -> Self {
        Self {
            source_backend,
            text: text.into(),
            succeeded: true,
        }
    }

    /// Placeholder for an image every backend failed on. It keeps its slot
    /// so positional order is preserved.
    pub fn placeholder(last_attempted: DescriptionSource) -> Self {
        Self {
            source_backend: last_attempted,
            text: IMAGE_PLACEHOLDER.to_string(),
            succeeded: false,
        }
    }
}

/// One page after merging: its text plus the descriptions of its images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    pub page_number: u32,
    pub text: String,
    #[serde(default)]
    pub images: Vec<ImageDescription>,
}

/// Ordered, hashed result of the Document Merger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedDocument {
    pub source_identifier: String,
    pub pages: Vec<PageContent>,
    pub content_hash: String,
}

impl MergedDocument {
    pub fn image_count(&self) -> usize {
        self.pages.iter().map(|p| p.images.len()).sum()
    }

    pub fn failed_image_count(&self) -> usize {
        self.pages
            .iter()
            .flat_map(|p| p.images.iter())
            .filter(|d| !d.succeeded)
            .count()
    }

    /// True when no page carries any text and no image was described.
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| {
            p.text.trim().is_empty() && p.images.iter().all(|d| !d.succeeded)
        })
    }
}

/// Where a chunk came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceReference {
    pub source_identifier: String,
    pub page_number: u32,
}

/// A unit of text stored in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorChunk {
    pub chunk_id: String,
    pub embedding: Vec<f32>,
    pub source_reference: SourceReference,
    pub text: String,
}

/// Answer returned by the query pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<VectorChunk>,
    /// False when nothing was retrieved and the model answered without context.
    pub grounded: bool,
}

/// Overall result class of an ingest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Every stage succeeded.
    Complete,
    /// Content was produced but some images or records failed.
    Partial,
    /// Nothing usable was extracted.
    Empty,
}

/// Summary of one ingest or regenerate run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub source_identifier: String,
    pub content_hash: String,
    pub pages: usize,
    pub images: usize,
    pub images_described: usize,
    pub images_failed: usize,
    pub chunks_indexed: usize,
    pub records: Vec<crate::schema::StructuredRecord>,
    pub records_persisted: usize,
    pub warnings: Vec<StageWarning>,
    /// The source had already been processed with identical bytes.
    pub skipped_unchanged: bool,
    pub outcome: IngestOutcome,
    pub duration_ms: u64,
}

impl IngestReport {
    /// Derive the outcome class from the counters gathered during the run.
    pub fn classify(
        document_blank: bool,
        images_failed: usize,
        records_attempted: usize,
        records_persisted: usize,
    ) -> IngestOutcome {
        if document_blank {
            IngestOutcome::Empty
        } else if images_failed > 0 || records_persisted < records_attempted {
            IngestOutcome::Partial
        } else {
            IngestOutcome::Complete
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: u32, text: &str, images: Vec<ImageDescription>) -> PageContent {
        PageContent {
            page_number: n,
            text: text.to_string(),
            images,
        }
    }

    #[test]
    fn placeholder_is_unsucceeded() {
        let d = ImageDescription::placeholder(DescriptionSource::Local);
        assert!(!d.succeeded);
        assert_eq!(d.text, IMAGE_PLACEHOLDER);
    }

    #[test]
    fn blank_document_detection() {
        let doc = MergedDocument {
            source_identifier: "s".into(),
            pages: vec![page(
                1,
                "  ",
                vec![ImageDescription::placeholder(DescriptionSource::Local)],
            )],
            content_hash: String::new(),
        };
        assert!(doc.is_blank());
        assert_eq!(doc.failed_image_count(), 1);
    }

    #[test]
    fn described_image_makes_document_non_blank() {
        let doc = MergedDocument {
            source_identifier: "s".into(),
            pages: vec![page(
                1,
                "",
                vec![ImageDescription::described(DescriptionSource::Primary, "a chart")],
            )],
            content_hash: String::new(),
        };
        assert!(!doc.is_blank());
    }

    #[test]
    fn classify_outcomes() {
        assert_eq!(IngestReport::classify(true, 0, 0, 0), IngestOutcome::Empty);
        assert_eq!(IngestReport::classify(false, 1, 0, 0), IngestOutcome::Partial);
        assert_eq!(IngestReport::classify(false, 0, 3, 2), IngestOutcome::Partial);
        assert_eq!(IngestReport::classify(false, 0, 3, 3), IngestOutcome::Complete);
    }

    #[test]
    fn extracted_image_debug_hides_bytes() {
        let img = ExtractedImage::png(2, 0, vec![0u8; 64]);
        let dbg = format!("{img:?}");
        assert!(dbg.contains("<64 bytes>"));
    }
}
