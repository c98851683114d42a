//! Vector indexing and similarity search over merged documents.
//!
//! ## Why delete before upsert?
//!
//! Chunk ids are positional (`{source}#p{page}-c{n}`). A re-ingested document
//! that shrank would otherwise leave its old tail chunks in the index, and
//! queries would keep citing text the source no longer contains.

use crate::config::PipelineConfig;
use crate::error::IngestError;
use crate::output::{MergedDocument, SourceReference, VectorChunk};
use crate::pipeline::chunk::{CharacterSplitter, TextChunk};
use crate::services::embed::{Embedder, OpenAiEmbedder};
use crate::services::vector_store::{ScoredChunk, SqliteVectorStore, VectorStore};
use std::sync::Arc;
use tracing::{debug, info};

/// Chunk id for the `index`-th chunk of a page.
pub fn chunk_id(source_identifier: &str, page_number: u32, index: usize) -> String {
    format!("{source_identifier}#p{page_number}-c{index}")
}

pub struct VectorIndexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    splitter: CharacterSplitter,
}

impl VectorIndexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        splitter: CharacterSplitter,
    ) -> Self {
        Self {
            embedder,
            store,
            splitter,
        }
    }

    /// OpenAI-compatible embedder over the collection's local index file.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, IngestError> {
        let embedder = OpenAiEmbedder::new(&config.embedding)?;
        let store = SqliteVectorStore::open(config.index_path())?;
        Ok(Self::new(
            Arc::new(embedder),
            Arc::new(store),
            CharacterSplitter::new(config.chunk_size, config.chunk_overlap),
        ))
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Chunk, embed and store a document, replacing any chunks previously
    /// indexed for the same source. Returns the number of chunks written.
    ///
    /// Old chunks are only removed once every new embedding is in hand; an
    /// embedding failure leaves the previous index for the source intact.
    pub async fn index(&self, document: &MergedDocument) -> Result<usize, IngestError> {
        let source = &document.source_identifier;
        let chunks: Vec<TextChunk> = self.splitter.split_document(document);

        if chunks.is_empty() {
            let removed = self.store.delete_source(source).await?;
            info!(
                "'{}' produced no chunks; removed {} stale chunks",
                source, removed
            );
            return Ok(0);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(IngestError::Internal(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let vector_chunks: Vec<VectorChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorChunk {
                chunk_id: chunk_id(source, chunk.page_number, chunk.index),
                embedding,
                source_reference: SourceReference {
                    source_identifier: source.clone(),
                    page_number: chunk.page_number,
                },
                text: chunk.text,
            })
            .collect();

        let removed = self.store.replace_source(source, &vector_chunks).await?;
        if removed > 0 {
            debug!("Replaced {} stale chunks for '{}'", removed, source);
        }
        info!("Indexed {} chunks for '{}'", vector_chunks.len(), source);
        Ok(vector_chunks.len())
    }

    /// Top `k` chunks for a query, best first.
    ///
    /// `k == 0` and an empty index both return an empty list without
    /// calling the embedder.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, IngestError> {
        if k == 0 || self.store.count().await? == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query).await?;
        Ok(self.store.search(&embedding, k).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PageContent;
    use crate::services::embed::EmbedError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Two-dimensional embedding: does the text mention "SD70"?
    #[derive(Default)]
    struct KeywordEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| if t.contains("SD70") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    fn doc(source: &str, pages: &[&str]) -> MergedDocument {
        MergedDocument {
            source_identifier: source.into(),
            pages: pages
                .iter()
                .enumerate()
                .map(|(i, t)| PageContent {
                    page_number: i as u32 + 1,
                    text: t.to_string(),
                    images: Vec::new(),
                })
                .collect(),
            content_hash: String::new(),
        }
    }

    fn indexer(embedder: Arc<KeywordEmbedder>) -> VectorIndexer {
        VectorIndexer::new(
            embedder,
            Arc::new(SqliteVectorStore::in_memory().unwrap()),
            CharacterSplitter::new(1000, 200),
        )
    }

    #[test]
    fn chunk_id_format() {
        assert_eq!(chunk_id("brochure", 3, 0), "brochure#p3-c0");
    }

    #[tokio::test]
    async fn empty_index_search_skips_embedder() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let idx = indexer(embedder.clone());
        assert!(idx.search("SD70", 4).await.unwrap().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn search_returns_source_page() {
        let idx = indexer(Arc::new(KeywordEmbedder::default()));
        idx.index(&doc("brochure", &["intro", "Gói SD70 giá 70000"]))
            .await
            .unwrap();
        let hits = idx.search("SD70", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.source_reference.page_number, 2);
        assert_eq!(hits[0].chunk.chunk_id, "brochure#p2-c0");
    }

    #[tokio::test]
    async fn k_zero_is_empty() {
        let idx = indexer(Arc::new(KeywordEmbedder::default()));
        idx.index(&doc("a", &["x"])).await.unwrap();
        assert!(idx.search("x", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reindex_replaces_previous_chunks() {
        let idx = indexer(Arc::new(KeywordEmbedder::default()));
        assert_eq!(idx.index(&doc("a", &["one", "two", "three"])).await.unwrap(), 3);
        assert_eq!(idx.index(&doc("a", &["only"])).await.unwrap(), 1);
        idx.index(&doc("b", &["other"])).await.unwrap();
        assert_eq!(idx.store().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn blank_document_indexes_nothing() {
        let idx = indexer(Arc::new(KeywordEmbedder::default()));
        assert_eq!(idx.index(&doc("a", &["  "])).await.unwrap(), 0);
    }
}
