//! Document merging: page text + image descriptions → [`MergedDocument`].
//!
//! Rendering layout, one block per page:
//!
//! ```text
//! <!-- page 1 -->
//!
//! page text
//!
//! [IMAGE DESCRIPTION]
//! first image of the page
//!
//! [IMAGE DESCRIPTION]
//! second image of the page
//!
//! <!-- page 2 -->
//!
//! ...
//! ```
//!
//! Pages are never reordered. A sequence whose page numbers go backwards is
//! rejected: sorting it would hide an upstream bug and silently change
//! which page a chunk is attributed to.

use crate::error::IngestError;
use crate::output::{ExtractedImage, ImageDescription, MergedDocument, PageContent, PageText};
use crate::pipeline::clean::{normalise_line_endings, trim_trailing_whitespace};
use crate::prompts::IMAGE_DESCRIPTION_DELIMITER;
use sha2::{Digest, Sha256};

/// Marker opening each page in rendered text.
pub fn page_marker(page_number: u32) -> String {
    format!("<!-- page {page_number} -->")
}

/// Pair each description with its page, in extraction order.
///
/// `images` and `descriptions` are parallel slices. An image on a page with
/// no text block gets an empty-text page so it is not lost.
pub fn attach_descriptions(
    pages: Vec<PageText>,
    images: &[ExtractedImage],
    descriptions: Vec<ImageDescription>,
) -> Result<Vec<PageContent>, IngestError> {
    if images.len() != descriptions.len() {
        return Err(IngestError::Internal(format!(
            "{} images but {} descriptions",
            images.len(),
            descriptions.len()
        )));
    }
    check_order(pages.iter().map(|p| p.page_number))?;
    check_order(images.iter().map(|i| i.page_number))?;

    let mut out: Vec<PageContent> = pages
        .into_iter()
        .map(|p| PageContent {
            page_number: p.page_number,
            text: p.text,
            images: Vec::new(),
        })
        .collect();

    for (image, description) in images.iter().zip(descriptions) {
        let slot = match out.binary_search_by_key(&image.page_number, |p| p.page_number) {
            Ok(i) => i,
            Err(i) => {
                out.insert(
                    i,
                    PageContent {
                        page_number: image.page_number,
                        text: String::new(),
                        images: Vec::new(),
                    },
                );
                i
            }
        };
        out[slot].images.push(description);
    }

    Ok(out)
}

/// Merge ordered pages into a hashed document.
pub fn merge(source_identifier: &str, pages: Vec<PageContent>) -> Result<MergedDocument, IngestError> {
    if pages.iter().any(|p| p.page_number == 0) {
        return Err(IngestError::InvalidInput {
            input: source_identifier.to_string(),
            reason: "page numbers start at 1".into(),
        });
    }
    check_order(pages.iter().map(|p| p.page_number))?;

    let content_hash = content_hash(&render(&pages));
    Ok(MergedDocument {
        source_identifier: source_identifier.to_string(),
        pages,
        content_hash,
    })
}

/// Text of one page followed by its image descriptions.
///
/// A page without images renders as its text, unchanged.
pub fn render_page(page: &PageContent) -> String {
    let mut out = page.text.clone();
    for image in &page.images {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(IMAGE_DESCRIPTION_DELIMITER);
        out.push('\n');
        out.push_str(&image.text);
    }
    out
}

/// Full rendered text of a document, pages in order.
pub fn render(pages: &[PageContent]) -> String {
    pages
        .iter()
        .map(|p| format!("{}\n\n{}", page_marker(p.page_number), render_page(p)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Lowercase hex SHA-256 of rendered text after normalisation
/// (CRLF → LF, trailing whitespace trimmed per line and at the end).
pub fn content_hash(rendered: &str) -> String {
    let normalised = trim_trailing_whitespace(&normalise_line_endings(rendered));
    hex::encode(Sha256::digest(normalised.trim_end().as_bytes()))
}

fn check_order(numbers: impl Iterator<Item = u32>) -> Result<(), IngestError> {
    let mut previous = 0u32;
    for page in numbers {
        if page < previous {
            return Err(IngestError::PageOrder { previous, page });
        }
        previous = page;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::DescriptionSource;

    fn page(n: u32, text: &str) -> PageContent {
        PageContent {
            page_number: n,
            text: text.into(),
            images: Vec::new(),
        }
    }

    #[test]
    fn page_without_images_renders_unchanged() {
        assert_eq!(render_page(&page(2, "Bảng giá\nSD70")), "Bảng giá\nSD70");
    }

    #[test]
    fn descriptions_follow_text_in_order() {
        let mut p = page(1, "Intro");
        p.images.push(ImageDescription::described(DescriptionSource::Primary, "first"));
        p.images.push(ImageDescription::placeholder(DescriptionSource::Local));
        assert_eq!(
            render_page(&p),
            "Intro\n\n[IMAGE DESCRIPTION]\nfirst\n\n[IMAGE DESCRIPTION]\n<---image--->"
        );
    }

    #[test]
    fn image_only_page_has_no_leading_blank() {
        let mut p = page(1, "");
        p.images.push(ImageDescription::described(DescriptionSource::Secondary, "table"));
        assert_eq!(render_page(&p), "[IMAGE DESCRIPTION]\ntable");
    }

    #[test]
    fn render_marks_pages() {
        let text = render(&[page(1, "a"), page(2, "b")]);
        assert_eq!(text, "<!-- page 1 -->\n\na\n\n<!-- page 2 -->\n\nb");
    }

    #[test]
    fn out_of_order_pages_rejected() {
        let err = merge("s", vec![page(2, "b"), page(1, "a")]).unwrap_err();
        assert!(matches!(err, IngestError::PageOrder { previous: 2, page: 1 }));
    }

    #[test]
    fn page_zero_rejected() {
        assert!(matches!(
            merge("s", vec![page(0, "a")]),
            Err(IngestError::InvalidInput { .. })
        ));
    }

    #[test]
    fn hash_is_stable_and_sensitive() {
        let a = merge("s", vec![page(1, "a"), page(2, "b")]).unwrap();
        let b = merge("s", vec![page(1, "a"), page(2, "b")]).unwrap();
        let c = merge("s", vec![page(1, "a"), page(2, "c")]).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.content_hash, c.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }

    #[test]
    fn hash_ignores_line_ending_and_trailing_space() {
        assert_eq!(content_hash("a  \r\nb\n\n"), content_hash("a\nb"));
    }

    #[test]
    fn attach_groups_by_page_and_fills_gaps() {
        let pages = vec![PageText::new(1, "one"), PageText::new(3, "three")];
        let images = vec![
            ExtractedImage::png(1, 0, vec![1]),
            ExtractedImage::png(1, 1, vec![2]),
            ExtractedImage::png(2, 0, vec![3]),
        ];
        let descriptions = vec![
            ImageDescription::described(DescriptionSource::Primary, "1a"),
            ImageDescription::described(DescriptionSource::Primary, "1b"),
            ImageDescription::described(DescriptionSource::Primary, "2a"),
        ];
        let out = attach_descriptions(pages, &images, descriptions).unwrap();
        let numbers: Vec<u32> = out.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(out[0].images.len(), 2);
        assert_eq!(out[0].images[1].text, "1b");
        assert_eq!(out[1].text, "");
        assert_eq!(out[1].images[0].text, "2a");
        assert!(out[2].images.is_empty());
    }

    #[test]
    fn attach_rejects_length_mismatch() {
        let err = attach_descriptions(
            vec![PageText::new(1, "x")],
            &[ExtractedImage::png(1, 0, vec![1])],
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::Internal(_)));
    }
}
