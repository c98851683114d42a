//! Intermediate artifacts: merged documents saved to disk after ingestion.
//!
//! ## Why persist the merged document?
//!
//! Vision calls are the slow and paid part of ingestion. Saving the merged
//! document lets a source be re-indexed or re-extracted (`regenerate`)
//! without touching pdfium or any vision backend, and the stored
//! `source_digest` lets an unchanged PDF be skipped entirely.
//!
//! Layout: `{data_dir}/processed/{source}.content.json`, written through a
//! temp file in the same directory and renamed into place.

use crate::error::IngestError;
use crate::output::MergedDocument;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ARTIFACT_SUFFIX: &str = ".content.json";

/// Counters captured when the artifact was produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStatistics {
    pub pages: usize,
    pub images: usize,
    pub images_described: usize,
    pub images_failed: usize,
}

impl ArtifactStatistics {
    pub fn of(document: &MergedDocument) -> Self {
        let images = document.image_count();
        let images_failed = document.failed_image_count();
        Self {
            pages: document.pages.len(),
            images,
            images_described: images - images_failed,
            images_failed,
        }
    }
}

/// A merged document plus the provenance needed to skip or regenerate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentArtifact {
    pub source_identifier: String,
    /// Lowercase hex SHA-256 of the source PDF bytes.
    pub source_digest: String,
    /// RFC 3339 timestamp of the extraction run.
    pub extracted_at: String,
    pub statistics: ArtifactStatistics,
    /// Set once the document's chunks reached the vector index. An artifact
    /// saved by an interrupted run stays `false` and is never skipped.
    #[serde(default)]
    pub indexed: bool,
    pub document: MergedDocument,
}

impl ContentArtifact {
    pub fn new(source_digest: impl Into<String>, document: MergedDocument) -> Self {
        Self {
            source_identifier: document.source_identifier.clone(),
            source_digest: source_digest.into(),
            extracted_at: chrono::Utc::now().to_rfc3339(),
            statistics: ArtifactStatistics::of(&document),
            indexed: false,
            document,
        }
    }
}

/// File-backed artifact store rooted at `{data_dir}/processed`.
#[derive(Debug, Clone)]
pub struct ContentStore {
    dir: PathBuf,
}

impl ContentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, source_identifier: &str) -> PathBuf {
        self.dir.join(format!("{source_identifier}{ARTIFACT_SUFFIX}"))
    }

    pub async fn save(&self, artifact: &ContentArtifact) -> Result<PathBuf, IngestError> {
        let path = self.path_for(&artifact.source_identifier);
        let json = serde_json::to_vec_pretty(artifact)
            .map_err(|e| IngestError::Internal(format!("artifact serialisation: {e}")))?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &json))
            .await
            .map_err(|e| IngestError::Internal(format!("artifact write task panicked: {e}")))?
            .map_err(|source| IngestError::WriteFailed {
                path: path.clone(),
                source,
            })?;

        debug!("Saved artifact {}", path.display());
        Ok(path)
    }

    pub async fn load(&self, source_identifier: &str) -> Result<ContentArtifact, IngestError> {
        let path = self.path_for(source_identifier);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IngestError::ArtifactNotFound {
                    source_id: source_identifier.to_string(),
                    path,
                })
            }
            Err(e) => {
                return Err(IngestError::ArtifactCorrupt {
                    path,
                    detail: e.to_string(),
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| IngestError::ArtifactCorrupt {
            path,
            detail: e.to_string(),
        })
    }

    /// Load when present; `None` when no artifact exists.
    ///
    /// A corrupt artifact is reported as `None` too, with a warning, so the
    /// source is simply processed again.
    pub async fn find(&self, source_identifier: &str) -> Option<ContentArtifact> {
        match self.load(source_identifier).await {
            Ok(a) => Some(a),
            Err(IngestError::ArtifactNotFound { .. }) => None,
            Err(e) => {
                warn!("{e}");
                None
            }
        }
    }

    /// Source identifiers with a saved artifact, sorted.
    pub async fn list(&self) -> Result<Vec<String>, IngestError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(IngestError::Internal(format!("{}: {e}", self.dir.display()))),
        };

        let mut sources = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| IngestError::Internal(format!("{}: {e}", self.dir.display())))?
        {
            let name = entry.file_name();
            if let Some(source) = name.to_str().and_then(|n| n.strip_suffix(ARTIFACT_SUFFIX)) {
                sources.push(source.to_string());
            }
        }
        sources.sort();
        Ok(sources)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{DescriptionSource, ImageDescription, PageContent};

    fn document(source: &str) -> MergedDocument {
        MergedDocument {
            source_identifier: source.into(),
            pages: vec![PageContent {
                page_number: 1,
                text: "Gói SD70".into(),
                images: vec![
                    ImageDescription::described(DescriptionSource::Primary, "bảng giá"),
                    ImageDescription::placeholder(DescriptionSource::Local),
                ],
            }],
            content_hash: "abc".into(),
        }
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().join("processed"));
        let artifact = ContentArtifact::new("d1", document("brochure"));
        let path = store.save(&artifact).await.unwrap();
        assert!(path.ends_with("brochure.content.json"));

        let loaded = store.load("brochure").await.unwrap();
        assert_eq!(loaded, artifact);
        assert_eq!(loaded.statistics.images_described, 1);
        assert_eq!(loaded.statistics.images_failed, 1);
    }

    #[tokio::test]
    async fn artifacts_without_index_marker_load_unindexed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let mut artifact = ContentArtifact::new("d1", document("brochure"));
        artifact.indexed = true;
        let mut json = serde_json::to_value(&artifact).unwrap();
        json.as_object_mut().unwrap().remove("indexed");
        std::fs::write(store.path_for("brochure"), json.to_string()).unwrap();

        let loaded = store.load("brochure").await.unwrap();
        assert!(!loaded.indexed);
        assert_eq!(loaded.document, artifact.document);
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        assert!(matches!(
            store.load("nope").await,
            Err(IngestError::ArtifactNotFound { .. })
        ));
        assert!(store.find("nope").await.is_none());
    }

    #[tokio::test]
    async fn corrupt_artifact_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        std::fs::write(store.path_for("bad"), b"{ not json").unwrap();
        assert!(matches!(
            store.load("bad").await,
            Err(IngestError::ArtifactCorrupt { .. })
        ));
    }

    #[tokio::test]
    async fn list_only_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        assert!(store.list().await.unwrap().is_empty());
        store.save(&ContentArtifact::new("d", document("b"))).await.unwrap();
        store.save(&ContentArtifact::new("d", document("a"))).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().join("never-created"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
