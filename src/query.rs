//! Question answering over the vector index.
//!
//! ## Why call the model when nothing was retrieved?
//!
//! An empty index or an off-topic question still gets an answer, produced
//! under [`NO_CONTEXT_SYSTEM_PROMPT`], which tells the model that no passage
//! was found. The returned [`Answer`] carries `grounded = false` so callers
//! can flag or suppress it.
//!
//! ## Conversations
//!
//! A [`Conversation`] wraps the pipeline for multi-turn chat. Retrieval still
//! runs on the current message alone; only the model sees earlier exchanges,
//! rendered by [`conversation_prompt`].

use crate::config::PipelineConfig;
use crate::error::IngestError;
use crate::index::VectorIndexer;
use crate::output::{Answer, VectorChunk};
use crate::prompts::{answer_system_prompt, NO_CONTEXT_SYSTEM_PROMPT};
use crate::services::llm::{LanguageModel, ProviderModel};
use crate::services::vector_store::ScoredChunk;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

pub struct QueryPipeline {
    indexer: Arc<VectorIndexer>,
    model: Arc<dyn LanguageModel>,
    retrieval_k: usize,
    temperature: f32,
}

impl QueryPipeline {
    pub fn new(
        indexer: Arc<VectorIndexer>,
        model: Arc<dyn LanguageModel>,
        retrieval_k: usize,
        temperature: f32,
    ) -> Self {
        Self {
            indexer,
            model,
            retrieval_k,
            temperature,
        }
    }

    /// Index and answer model as configured; no vision backend is needed.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, IngestError> {
        let indexer = VectorIndexer::from_config(config)?;
        let model = ProviderModel::from_spec(config.answer_llm.as_ref(), config.max_tokens)?;
        Ok(Self::new(
            Arc::new(indexer),
            Arc::new(model),
            config.retrieval_k,
            config.temperature,
        ))
    }

    /// Answer with the configured number of retrieved chunks.
    pub async fn answer(&self, question: &str) -> Result<Answer, IngestError> {
        self.answer_with_k(question, self.retrieval_k).await
    }

    pub async fn answer_with_k(&self, question: &str, k: usize) -> Result<Answer, IngestError> {
        let question = non_empty(question)?;
        self.respond(question, question, k).await
    }

    /// Retrieve for `question`; send `user_prompt` to the model.
    async fn respond(
        &self,
        question: &str,
        user_prompt: &str,
        k: usize,
    ) -> Result<Answer, IngestError> {
        let hits = self.indexer.search(question, k).await?;
        debug!("Retrieved {} chunks for question", hits.len());

        let (system_prompt, grounded) = if hits.is_empty() {
            info!("No context found; answering ungrounded");
            (NO_CONTEXT_SYSTEM_PROMPT.to_string(), false)
        } else {
            (answer_system_prompt(&build_context(&hits)), true)
        };

        let answer = self
            .model
            .complete(&system_prompt, user_prompt, self.temperature)
            .await?;

        let sources: Vec<VectorChunk> = hits.into_iter().map(|h| h.chunk).collect();
        Ok(Answer {
            answer: answer.trim().to_string(),
            sources,
            grounded,
        })
    }
}

// ── Conversation ─────────────────────────────────────────────────────────────

/// One exchange of a [`Conversation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

/// Multi-turn chat keeping the last `max_turns` exchanges.
pub struct Conversation {
    pipeline: QueryPipeline,
    history: VecDeque<Turn>,
    max_turns: usize,
}

impl Conversation {
    pub fn new(pipeline: QueryPipeline, max_turns: usize) -> Self {
        Self {
            pipeline,
            history: VecDeque::with_capacity(max_turns),
            max_turns,
        }
    }

    pub fn history(&self) -> &VecDeque<Turn> {
        &self.history
    }

    /// Answer `message` in the light of the remembered exchanges, then
    /// remember this one.
    pub async fn ask(&mut self, message: &str) -> Result<Answer, IngestError> {
        let message = non_empty(message)?;
        let prompt = conversation_prompt(&self.history, message);
        let answer = self
            .pipeline
            .respond(message, &prompt, self.pipeline.retrieval_k)
            .await?;

        if self.max_turns > 0 {
            if self.history.len() == self.max_turns {
                self.history.pop_front();
            }
            self.history.push_back(Turn {
                user: message.to_string(),
                assistant: answer.answer.clone(),
            });
        }
        Ok(answer)
    }

    pub fn reset(&mut self) {
        self.history.clear();
        info!("Chat history cleared");
    }
}

/// User prompt for a conversational turn. Without history the message is
/// sent unchanged.
pub fn conversation_prompt<'a>(
    history: impl IntoIterator<Item = &'a Turn>,
    message: &str,
) -> String {
    let exchanges: Vec<String> = history
        .into_iter()
        .map(|t| format!("User: {}\nAssistant: {}", t.user, t.assistant))
        .collect();
    if exchanges.is_empty() {
        return message.to_string();
    }
    format!(
        "Previous conversation:\n{}\n\nCurrent question: {}",
        exchanges.join("\n"),
        message
    )
}

fn non_empty(question: &str) -> Result<&str, IngestError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(IngestError::InvalidInput {
            input: String::new(),
            reason: "question is empty".into(),
        });
    }
    Ok(question)
}

/// Retrieved chunks, best first, each headed by its source and page.
pub fn build_context(hits: &[ScoredChunk]) -> String {
    hits.iter()
        .map(|h| {
            let r = &h.chunk.source_reference;
            format!(
                "[source: {}, page {}]\n{}",
                r.source_identifier, r.page_number, h.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{MergedDocument, PageContent, SourceReference};
    use crate::pipeline::chunk::CharacterSplitter;
    use crate::services::embed::{EmbedError, Embedder};
    use crate::services::llm::LlmError;
    use crate::services::vector_store::SqliteVectorStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ConstEmbedder;

    #[async_trait]
    impl Embedder for ConstEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.5]).collect())
        }
    }

    /// Records the prompts it was called with.
    #[derive(Default)]
    struct RecordingModel {
        system_prompts: Mutex<Vec<String>>,
        user_prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn complete(&self, system: &str, user: &str, _t: f32) -> Result<String, LlmError> {
            self.system_prompts.lock().unwrap().push(system.to_string());
            self.user_prompts.lock().unwrap().push(user.to_string());
            Ok("  SD70 costs 70000 VND. ".into())
        }
    }

    fn pipeline(model: Arc<RecordingModel>) -> (QueryPipeline, Arc<VectorIndexer>) {
        let indexer = Arc::new(VectorIndexer::new(
            Arc::new(ConstEmbedder),
            Arc::new(SqliteVectorStore::in_memory().unwrap()),
            CharacterSplitter::new(1000, 200),
        ));
        (QueryPipeline::new(indexer.clone(), model, 4, 0.1), indexer)
    }

    #[tokio::test]
    async fn empty_index_still_calls_model() {
        let model = Arc::new(RecordingModel::default());
        let (q, _) = pipeline(model.clone());
        let a = q.answer("Giá gói SD70?").await.unwrap();
        assert!(!a.grounded);
        assert!(a.sources.is_empty());
        assert_eq!(a.answer, "SD70 costs 70000 VND.");
        let prompts = model.system_prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("No context found"));
    }

    #[tokio::test]
    async fn retrieved_chunks_become_context_and_sources() {
        let model = Arc::new(RecordingModel::default());
        let (q, indexer) = pipeline(model.clone());
        indexer
            .index(&MergedDocument {
                source_identifier: "brochure".into(),
                pages: vec![PageContent {
                    page_number: 2,
                    text: "Gói SD70 giá 70.000đ".into(),
                    images: Vec::new(),
                }],
                content_hash: String::new(),
            })
            .await
            .unwrap();

        let a = q.answer("Giá gói SD70?").await.unwrap();
        assert!(a.grounded);
        assert_eq!(a.sources.len(), 1);
        assert_eq!(a.sources[0].source_reference.page_number, 2);
        let prompts = model.system_prompts.lock().unwrap();
        assert!(prompts[0].contains("[source: brochure, page 2]\nGói SD70 giá 70.000đ"));
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let (q, _) = pipeline(Arc::new(RecordingModel::default()));
        assert!(matches!(
            q.answer("   ").await,
            Err(IngestError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn conversation_carries_last_three_exchanges() {
        let model = Arc::new(RecordingModel::default());
        let (q, _) = pipeline(model.clone());
        let mut chat = Conversation::new(q, 3);

        chat.ask("Gói SD70 giá bao nhiêu?").await.unwrap();
        assert_eq!(model.user_prompts.lock().unwrap()[0], "Gói SD70 giá bao nhiêu?");

        for i in 2..=4 {
            chat.ask(&format!("câu {i}")).await.unwrap();
        }
        assert_eq!(chat.history().len(), 3);
        assert_eq!(chat.history()[0].user, "câu 2");
        assert_eq!(chat.history()[0].assistant, "SD70 costs 70000 VND.");

        chat.ask("  còn gói VIP?  ").await.unwrap();
        let prompts = model.user_prompts.lock().unwrap();
        assert_eq!(
            prompts[4],
            "Previous conversation:\n\
             User: câu 2\nAssistant: SD70 costs 70000 VND.\n\
             User: câu 3\nAssistant: SD70 costs 70000 VND.\n\
             User: câu 4\nAssistant: SD70 costs 70000 VND.\n\n\
             Current question: còn gói VIP?"
        );
    }

    #[tokio::test]
    async fn reset_forgets_history() {
        let model = Arc::new(RecordingModel::default());
        let (q, _) = pipeline(model.clone());
        let mut chat = Conversation::new(q, 3);
        chat.ask("Gói SD70?").await.unwrap();
        chat.reset();
        assert!(chat.history().is_empty());

        chat.ask("Gói VIP?").await.unwrap();
        assert_eq!(model.user_prompts.lock().unwrap()[1], "Gói VIP?");
    }

    #[tokio::test]
    async fn empty_chat_message_is_rejected_and_not_remembered() {
        let (q, _) = pipeline(Arc::new(RecordingModel::default()));
        let mut chat = Conversation::new(q, 3);
        assert!(matches!(
            chat.ask(" ").await,
            Err(IngestError::InvalidInput { .. })
        ));
        assert!(chat.history().is_empty());
    }

    #[test]
    fn context_keeps_retrieval_order() {
        let hit = |id: &str, page: u32, score: f32| ScoredChunk {
            chunk: VectorChunk {
                chunk_id: id.into(),
                embedding: Vec::new(),
                source_reference: SourceReference {
                    source_identifier: "s".into(),
                    page_number: page,
                },
                text: id.into(),
            },
            score,
        };
        let ctx = build_context(&[hit("best", 3, 0.9), hit("next", 1, 0.5)]);
        assert!(ctx.find("best").unwrap() < ctx.find("next").unwrap());
    }
}
