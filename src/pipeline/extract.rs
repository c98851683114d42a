//! PDF extraction: per-page text and embedded images via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! [`extract_pdf`] moves the work onto Tokio's blocking pool so worker
//! threads never stall on a large document.
//!
//! ## Why a trait?
//!
//! The ingestor only needs "bytes in, pages and images out". Putting pdfium
//! behind [`PdfExtractor`] lets tests drive the whole pipeline with
//! synthetic pages, with no native library present.

use crate::error::IngestError;
use crate::output::{ExtractedImage, PageText};
use crate::pipeline::encode::encode_png;
use pdfium_render::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything extracted from one PDF, in page order.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPdf {
    pub pages: Vec<PageText>,
    pub images: Vec<ExtractedImage>,
}

/// PDF text + image extraction service.
pub trait PdfExtractor: Send + Sync {
    /// Extract every page's text and every embedded image.
    ///
    /// Pages are returned in document order, 1-indexed; images are ordered
    /// by page, then by their position in the page's object list.
    fn extract(
        &self,
        source_id: &str,
        bytes: &[u8],
        password: Option<&str>,
    ) -> Result<ExtractedPdf, IngestError>;
}

/// Run an extractor on the blocking pool.
pub async fn extract_pdf(
    extractor: Arc<dyn PdfExtractor>,
    source_id: &str,
    bytes: Vec<u8>,
    password: Option<String>,
) -> Result<ExtractedPdf, IngestError> {
    let source = source_id.to_string();
    tokio::task::spawn_blocking(move || extractor.extract(&source, &bytes, password.as_deref()))
        .await
        .map_err(|e| IngestError::Internal(format!("Extraction task panicked: {e}")))?
}

/// [`PdfExtractor`] backed by pdfium, bound through `pdfium-auto`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumExtractor;

impl PdfExtractor for PdfiumExtractor {
    fn extract(
        &self,
        source_id: &str,
        bytes: &[u8],
        password: Option<&str>,
    ) -> Result<ExtractedPdf, IngestError> {
        let pdfium = pdfium_auto::bind_pdfium_silent()
            .map_err(|e| IngestError::PdfiumBindingFailed(e.to_string()))?;

        let document = pdfium
            .load_pdf_from_byte_slice(bytes, password)
            .map_err(|e| {
                let err_str = format!("{e:?}");
                if err_str.to_lowercase().contains("password") {
                    IngestError::PasswordRequired {
                        source_id: source_id.to_string(),
                    }
                } else {
                    IngestError::CorruptPdf {
                        source_id: source_id.to_string(),
                        detail: err_str,
                    }
                }
            })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF '{}' loaded: {} pages", source_id, total_pages);
        if total_pages == 0 {
            return Err(IngestError::EmptyDocument {
                source_id: source_id.to_string(),
            });
        }

        let mut out = ExtractedPdf {
            pages: Vec::with_capacity(total_pages),
            images: Vec::new(),
        };

        for (index, page) in pages.iter().enumerate() {
            let page_number = index as u32 + 1;

            let text = match page.text() {
                Ok(t) => t.all(),
                Err(e) => {
                    warn!("Page {}: text layer unreadable: {:?}", page_number, e);
                    String::new()
                }
            };
            out.pages.push(PageText::new(page_number, text));

            let mut index_on_page = 0usize;
            for object in page.objects().iter() {
                let Some(image_object) = object.as_image_object() else {
                    continue;
                };
                let raw = match image_object.get_raw_image() {
                    Ok(img) => img,
                    Err(e) => {
                        warn!("Page {}: skipping undecodable image: {:?}", page_number, e);
                        continue;
                    }
                };
                match encode_png(&raw) {
                    Ok(png) => {
                        out.images
                            .push(ExtractedImage::png(page_number, index_on_page, png));
                        index_on_page += 1;
                    }
                    Err(e) => warn!("Page {}: PNG encoding failed: {}", page_number, e),
                }
            }
            debug!(
                "Page {}: {} chars, {} images",
                page_number,
                out.pages[index].text.len(),
                index_on_page
            );
        }

        Ok(out)
    }
}
