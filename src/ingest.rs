//! Ingestion entry points: PDF in, indexed chunks and structured records out.
//!
//! ## Stages
//!
//! ```text
//! resolve ─▶ digest ─▶ (unchanged and indexed? stop) ─▶ extract ─▶ clean
//!    ─▶ describe ─▶ merge ─▶ save artifact ─▶ index ─▶ mark indexed
//!    ─▶ extract records ─▶ persist
//! ```
//!
//! Everything after "save artifact" only needs the saved
//! [`MergedDocument`](crate::output::MergedDocument),
//! which is what [`Ingestor::regenerate`] replays. The artifact is saved
//! again with [`ContentArtifact::indexed`] set only after the index holds
//! its chunks, so a run that dies while embedding is redone next time.
//!
//! ## Fatal vs. soft failures
//!
//! Unreadable input, pdfium failures and store failures abort the run with
//! an [`IngestError`]. A failed image description, an unparsable extraction
//! response or a record that cannot be written is recorded as a
//! [`StageWarning`] and the run carries on; [`IngestOutcome`] tells the
//! caller whether anything was lost.

use crate::config::PipelineConfig;
use crate::content::{ContentArtifact, ContentStore};
use crate::error::{IngestError, Stage, StageWarning};
use crate::index::VectorIndexer;
use crate::output::{IngestOutcome, IngestReport, PageText};
use crate::pipeline::clean::clean_page_text;
use crate::pipeline::describe::ImageDescriber;
use crate::pipeline::extract::{extract_pdf, PdfExtractor, PdfiumExtractor};
use crate::pipeline::input::{pdf_files_in, resolve_input, ResolvedInput};
use crate::pipeline::merge::{attach_descriptions, merge, render};
use crate::pipeline::structured::StructuredExtractor;
use crate::progress::{IngestPhase, NoopProgressCallback, ProgressCallback};
use crate::schema::{FieldTable, StructuredRecord};
use crate::services::llm::ProviderModel;
use crate::services::record_store::{RecordStore, SqliteRecordStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The collaborators an [`Ingestor`] drives.
///
/// Built from configuration by [`Services::from_config`], or assembled by
/// hand to swap in other implementations.
pub struct Services {
    pub extractor: Arc<dyn PdfExtractor>,
    pub describer: ImageDescriber,
    pub indexer: Arc<VectorIndexer>,
    /// `None` disables structured extraction.
    pub structured: Option<StructuredExtractor>,
    pub records: Option<Arc<dyn RecordStore>>,
    pub content: ContentStore,
}

impl Services {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, IngestError> {
        let (structured, records) = if config.extract_structured {
            let spec = config
                .extraction_llm
                .as_ref()
                .or(config.answer_llm.as_ref());
            let model = ProviderModel::from_spec(spec, config.max_tokens)?;
            let store = SqliteRecordStore::new(&config.records_db_path())?;
            (
                Some(StructuredExtractor::new(Arc::new(model))),
                Some(Arc::new(store) as Arc<dyn RecordStore>),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            extractor: Arc::new(PdfiumExtractor),
            describer: ImageDescriber::from_config(config)?,
            indexer: Arc::new(VectorIndexer::from_config(config)?),
            structured,
            records,
            content: ContentStore::new(config.processed_dir()),
        })
    }
}

pub struct Ingestor {
    config: PipelineConfig,
    services: Services,
    table: FieldTable,
    progress: ProgressCallback,
}

impl Ingestor {
    pub fn new(config: PipelineConfig, services: Services) -> Self {
        Self {
            config,
            services,
            table: FieldTable::telecom_packages(),
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Ingestor with every service built from `config`.
    pub fn from_config(config: PipelineConfig) -> Result<Self, IngestError> {
        let services = Services::from_config(&config)?;
        Ok(Self::new(config, services))
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Replace the telecom-package field table.
    pub fn with_field_table(mut self, table: FieldTable) -> Self {
        self.table = table;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn indexer(&self) -> &Arc<VectorIndexer> {
        &self.services.indexer
    }

    /// Ingest a local PDF path or an HTTP(S) URL.
    ///
    /// # Errors
    /// Returns `Err(IngestError)` only for fatal errors:
    /// - File not found / not a PDF / empty file
    /// - pdfium cannot open the document
    /// - the artifact, vector index or embedder fails
    pub async fn ingest(&self, input: &str) -> Result<IngestReport, IngestError> {
        let start = Instant::now();
        info!("Starting ingestion: {}", input);
        let resolved = resolve_input(input, self.config.download_timeout_secs).await?;
        self.ingest_resolved(resolved, start).await
    }

    /// Ingest every PDF directly inside `dir`, one after another, in path
    /// order. A failing file is logged and reported; the rest still run.
    ///
    /// # Errors
    /// Only when `dir` itself cannot be listed.
    pub async fn ingest_dir(
        &self,
        dir: &Path,
    ) -> Result<Vec<(PathBuf, Result<IngestReport, IngestError>)>, IngestError> {
        let files = pdf_files_in(dir).await?;
        info!("Batch: {} PDF files in {}", files.len(), dir.display());

        let mut results = Vec::with_capacity(files.len());
        for path in files {
            let result = self.ingest(&path.to_string_lossy()).await;
            if let Err(e) = &result {
                warn!("Batch: '{}' failed: {}", path.display(), e);
            }
            results.push((path, result));
        }
        Ok(results)
    }

    /// Ingest PDF bytes already in memory.
    pub async fn ingest_bytes(
        &self,
        source_identifier: &str,
        bytes: Vec<u8>,
    ) -> Result<IngestReport, IngestError> {
        let start = Instant::now();
        let resolved = ResolvedInput::from_bytes(source_identifier, bytes)?;
        self.ingest_resolved(resolved, start).await
    }

    /// Re-index and re-extract a source from its saved artifact, without
    /// calling pdfium or any vision backend.
    pub async fn regenerate(&self, source_identifier: &str) -> Result<IngestReport, IngestError> {
        let start = Instant::now();
        let artifact = self.services.content.load(source_identifier).await?;
        info!(
            "Regenerating '{}' from artifact extracted at {}",
            source_identifier, artifact.extracted_at
        );
        self.progress.on_ingest_start(
            &artifact.source_identifier,
            artifact.statistics.pages,
            0,
        );
        self.finish(artifact, Vec::new(), start).await
    }

    /// Sources with a saved artifact.
    pub async fn list(&self) -> Result<Vec<String>, IngestError> {
        self.services.content.list().await
    }

    /// Saved artifact for one source.
    pub async fn load(&self, source_identifier: &str) -> Result<ContentArtifact, IngestError> {
        self.services.content.load(source_identifier).await
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    async fn ingest_resolved(
        &self,
        resolved: ResolvedInput,
        start: Instant,
    ) -> Result<IngestReport, IngestError> {
        let source = resolved.source_identifier.clone();
        let digest = resolved.digest();

        // ── Step 1: Skip unchanged sources ───────────────────────────────
        if !self.config.force {
            if let Some(existing) = self.services.content.find(&source).await {
                if existing.source_digest == digest && self.index_is_current(&existing).await? {
                    info!(
                        "'{}' unchanged since {}; skipping (use force to re-process)",
                        source, existing.extracted_at
                    );
                    return Ok(skipped_report(&existing, start));
                }
                debug!("'{}' changed or not fully indexed since last run", source);
            }
        }

        // ── Step 2: Extract pages and images ─────────────────────────────
        self.progress.on_phase(IngestPhase::Extracting);
        let extracted = extract_pdf(
            Arc::clone(&self.services.extractor),
            &source,
            resolved.bytes,
            self.config.password.clone(),
        )
        .await?;
        if extracted.pages.is_empty() {
            return Err(IngestError::EmptyDocument { source_id: source });
        }

        let pages: Vec<PageText> = extracted
            .pages
            .into_iter()
            .map(|p| PageText::new(p.page_number, clean_page_text(&p.text)))
            .collect();
        info!(
            "'{}': {} pages, {} images",
            source,
            pages.len(),
            extracted.images.len()
        );
        self.progress
            .on_ingest_start(&source, pages.len(), extracted.images.len());

        // ── Step 3: Describe images ──────────────────────────────────────
        self.progress.on_phase(IngestPhase::Describing);
        let descriptions = self
            .services
            .describer
            .describe_all(&extracted.images, &self.progress)
            .await;

        let warnings: Vec<StageWarning> = extracted
            .images
            .iter()
            .zip(&descriptions)
            .filter(|(_, d)| !d.succeeded)
            .map(|(img, _)| {
                StageWarning::new(
                    Stage::Describe,
                    format!(
                        "page {} image {}: no vision backend could describe it",
                        img.page_number, img.index_on_page
                    ),
                )
            })
            .collect();

        // ── Step 4: Merge and save ───────────────────────────────────────
        let page_contents = attach_descriptions(pages, &extracted.images, descriptions)?;
        let document = merge(&source, page_contents)?;
        let artifact = ContentArtifact::new(digest, document);
        let path = self.services.content.save(&artifact).await?;
        info!("Saved merged content to {}", path.display());

        self.finish(artifact, warnings, start).await
    }

    /// Whether the vector index still holds what `artifact` describes.
    async fn index_is_current(&self, artifact: &ContentArtifact) -> Result<bool, IngestError> {
        if !artifact.indexed {
            return Ok(false);
        }
        if artifact.document.is_blank() {
            return Ok(true);
        }
        let stored = self
            .services
            .indexer
            .store()
            .count_source(&artifact.source_identifier)
            .await?;
        Ok(stored > 0)
    }

    /// Index, extract and persist a merged document.
    async fn finish(
        &self,
        mut artifact: ContentArtifact,
        mut warnings: Vec<StageWarning>,
        start: Instant,
    ) -> Result<IngestReport, IngestError> {
        let source = artifact.source_identifier.clone();
        let blank = artifact.document.is_blank();

        let mut chunks_indexed = 0;
        let mut records = Vec::new();
        let mut records_persisted = 0;

        if blank {
            warn!("'{}' has no extractable content", source);
            self.services.indexer.store().delete_source(&source).await?;
        } else {
            // ── Index ────────────────────────────────────────────────────
            self.progress.on_phase(IngestPhase::Indexing);
            chunks_indexed = self.services.indexer.index(&artifact.document).await?;
        }

        if !artifact.indexed {
            artifact.indexed = true;
            self.services.content.save(&artifact).await?;
        }

        let document = &artifact.document;
        if !blank {
            // ── Structured records ───────────────────────────────────────
            if let Some(extractor) = &self.services.structured {
                self.progress.on_phase(IngestPhase::ExtractingRecords);
                let outcome = extractor
                    .extract(&render(&document.pages), &self.table)
                    .await;
                warnings.extend(outcome.warnings);
                records = outcome.records;

                if let Some(store) = &self.services.records {
                    self.progress.on_phase(IngestPhase::PersistingRecords);
                    records_persisted =
                        persist_records(store.as_ref(), &records, &source, &mut warnings).await;
                }
            }
        }

        let images = document.image_count();
        let images_failed = document.failed_image_count();
        let outcome =
            match IngestReport::classify(blank, images_failed, records.len(), records_persisted) {
                IngestOutcome::Complete if !warnings.is_empty() => IngestOutcome::Partial,
                other => other,
            };

        self.progress.on_ingest_complete(chunks_indexed, records.len());
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Ingestion of '{}' {:?}: {} chunks, {} records, {} warnings, {}ms",
            source,
            outcome,
            chunks_indexed,
            records.len(),
            warnings.len(),
            duration_ms
        );

        Ok(IngestReport {
            source_identifier: source,
            content_hash: document.content_hash.clone(),
            pages: document.pages.len(),
            images,
            images_described: images - images_failed,
            images_failed,
            chunks_indexed,
            records,
            records_persisted,
            warnings,
            skipped_unchanged: false,
            outcome,
            duration_ms,
        })
    }
}

/// Upsert each record on its own; one failure does not stop the rest.
async fn persist_records(
    store: &dyn RecordStore,
    records: &[StructuredRecord],
    source: &str,
    warnings: &mut Vec<StageWarning>,
) -> usize {
    let mut persisted = 0;
    for record in records {
        match store.upsert(record, source).await {
            Ok(()) => persisted += 1,
            Err(e) => {
                warn!("Failed to persist record '{}': {}", record.name, e);
                warnings.push(StageWarning::new(
                    Stage::Persist,
                    format!("record '{}': {e}", record.name),
                ));
            }
        }
    }
    persisted
}

/// Report for an unchanged source. The outcome reflects what the earlier
/// run produced; records are not re-read, so they do not count against it.
fn skipped_report(existing: &ContentArtifact, start: Instant) -> IngestReport {
    let stats = &existing.statistics;
    IngestReport {
        source_identifier: existing.source_identifier.clone(),
        content_hash: existing.document.content_hash.clone(),
        pages: stats.pages,
        images: stats.images,
        images_described: stats.images_described,
        images_failed: stats.images_failed,
        chunks_indexed: 0,
        records: Vec::new(),
        records_persisted: 0,
        warnings: Vec::new(),
        skipped_unchanged: true,
        outcome: IngestReport::classify(existing.document.is_blank(), stats.images_failed, 0, 0),
        duration_ms: start.elapsed().as_millis() as u64,
    }
}
