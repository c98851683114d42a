//! Page-bounded character chunking.
//!
//! Chunks never cross a page boundary, so every chunk carries exactly one
//! page number for its source reference. Within a page the text (including
//! its image descriptions) is cut into windows of at most `chunk_size`
//! characters, consecutive windows sharing `chunk_overlap` characters. A
//! window prefers to end on a line break or space found in its second half.

use crate::output::MergedDocument;
use crate::pipeline::merge::render_page;

/// A chunk before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub page_number: u32,
    /// 0-based position of the chunk within its page.
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl CharacterSplitter {
    /// `chunk_overlap` is clamped below `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    /// Split one text into windows. Whitespace-only windows are skipped.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total_len = chars.len();
        let mut chunks = Vec::new();
        let mut offset = 0;

        while offset < total_len {
            let mut end = (offset + self.chunk_size).min(total_len);
            if end < total_len {
                let floor = offset + self.chunk_size / 2;
                if let Some(pos) = (floor..end).rev().find(|&i| chars[i] == '\n') {
                    end = pos + 1;
                } else if let Some(pos) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                    end = pos + 1;
                }
            }

            let chunk: String = chars[offset..end].iter().collect();
            let trimmed = chunk.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if end == total_len {
                break;
            }
            offset = end.saturating_sub(self.chunk_overlap).max(offset + 1);
        }

        chunks
    }

    /// Chunk every page of a merged document, in page order.
    pub fn split_document(&self, document: &MergedDocument) -> Vec<TextChunk> {
        document
            .pages
            .iter()
            .flat_map(|page| {
                self.split(&render_page(page))
                    .into_iter()
                    .enumerate()
                    .map(move |(index, text)| TextChunk {
                        page_number: page.page_number,
                        index,
                        text,
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{DescriptionSource, ImageDescription, PageContent};

    #[test]
    fn short_text_is_one_chunk() {
        let s = CharacterSplitter::new(1000, 200);
        assert_eq!(s.split("Gói SD70"), vec!["Gói SD70".to_string()]);
    }

    #[test]
    fn exact_fit_has_no_trailing_sliver() {
        let s = CharacterSplitter::new(10, 3);
        assert_eq!(s.split("abcdefghij").len(), 1);
    }

    #[test]
    fn windows_overlap() {
        let s = CharacterSplitter::new(10, 4);
        let chunks = s.split("abcdefghijklmnopqrst");
        assert_eq!(chunks[0], "abcdefghij");
        assert_eq!(chunks[1], "ghijklmnop");
        assert_eq!(chunks.last().map(String::as_str), Some("mnopqrst"));
    }

    #[test]
    fn prefers_word_boundaries() {
        let s = CharacterSplitter::new(12, 0);
        let chunks = s.split("alpha beta gamma delta");
        assert_eq!(chunks[0], "alpha beta");
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
    }

    #[test]
    fn multibyte_text_is_split_on_chars() {
        let s = CharacterSplitter::new(5, 1);
        for c in s.split("Giá cước trả trước") {
            assert!(c.chars().count() <= 5);
        }
    }

    #[test]
    fn empty_and_blank_text() {
        let s = CharacterSplitter::new(10, 2);
        assert!(s.split("").is_empty());
        assert!(s.split("   \n  ").is_empty());
    }

    #[test]
    fn document_chunks_stay_on_their_page() {
        let mut p1 = PageContent {
            page_number: 1,
            text: "page one".into(),
            images: Vec::new(),
        };
        p1.images
            .push(ImageDescription::described(DescriptionSource::Primary, "a chart"));
        let doc = MergedDocument {
            source_identifier: "s".into(),
            pages: vec![
                p1,
                PageContent {
                    page_number: 2,
                    text: String::new(),
                    images: Vec::new(),
                },
                PageContent {
                    page_number: 3,
                    text: "page three".into(),
                    images: Vec::new(),
                },
            ],
            content_hash: String::new(),
        };
        let chunks = CharacterSplitter::new(1000, 200).split_document(&doc);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page_number, 1);
        assert!(chunks[0].text.contains("[IMAGE DESCRIPTION]\na chart"));
        assert_eq!(chunks[1].page_number, 3);
        assert_eq!(chunks[1].index, 0);
    }
}
