//! Input resolution: normalise a user-supplied path or URL to validated
//! PDF bytes plus a stable source identifier.
//!
//! ## Why validate here?
//!
//! Invalid input must fail before any external service is called. Checking
//! the `%PDF` magic bytes and emptiness up front gives the caller a
//! meaningful error instead of a pdfium failure after a paid vision call.
//!
//! ## Why bytes instead of a path?
//!
//! The whole document is hashed for change detection anyway, and pdfium can
//! load from a byte slice, so nothing ever needs a temp file.

use crate::error::IngestError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A validated PDF ready for extraction.
pub struct ResolvedInput {
    /// Filesystem-safe name derived from the file name (without extension).
    pub source_identifier: String,
    /// Where the bytes came from: a path or a URL.
    pub origin: String,
    pub bytes: Vec<u8>,
}

impl ResolvedInput {
    /// Build from in-memory bytes, applying the same validation as files.
    pub fn from_bytes(
        source_identifier: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, IngestError> {
        let source_identifier = sanitize_identifier(&source_identifier.into());
        validate_pdf(&source_identifier, &bytes)?;
        Ok(Self {
            origin: source_identifier.clone(),
            source_identifier,
            bytes,
        })
    }

    /// Lowercase hex SHA-256 of the raw PDF bytes.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

impl std::fmt::Debug for ResolvedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedInput")
            .field("source_identifier", &self.source_identifier)
            .field("origin", &self.origin)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to validated PDF bytes.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, IngestError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(IngestError::InvalidInput {
            input: input.to_string(),
            reason: "empty path".into(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input).await
    }
}

/// PDF files directly inside `dir` (extension matched case-insensitively),
/// sorted by path. Subdirectories are not descended into.
pub async fn pdf_files_in(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(IngestError::PermissionDenied {
                path: dir.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(IngestError::FileNotFound {
                path: dir.to_path_buf(),
            })
        }
    };

    let mut pdfs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| IngestError::Internal(format!("reading {}: {e}", dir.display())))?
    {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            pdfs.push(path);
        }
    }
    pdfs.sort();
    debug!("{} PDF files in {}", pdfs.len(), dir.display());
    Ok(pdfs)
}

async fn resolve_local(path_str: &str) -> Result<ResolvedInput, IngestError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(IngestError::FileNotFound { path });
    }
    if path.is_dir() {
        return Err(IngestError::InvalidInput {
            input: path_str.to_string(),
            reason: "is a directory".into(),
        });
    }

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(IngestError::PermissionDenied { path });
        }
        Err(_) => return Err(IngestError::FileNotFound { path }),
    };

    let source_identifier = identifier_from_path(&path);
    validate_pdf(&source_identifier, &bytes)?;

    debug!("Resolved local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(ResolvedInput {
        source_identifier,
        origin: path.display().to_string(),
        bytes,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, IngestError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| IngestError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            IngestError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            IngestError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(IngestError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| IngestError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?
        .to_vec();

    let source_identifier = identifier_from_url(url);
    validate_pdf(&source_identifier, &bytes)?;

    info!("Downloaded {} bytes as '{}'", bytes.len(), source_identifier);
    Ok(ResolvedInput {
        source_identifier,
        origin: url.to_string(),
        bytes,
    })
}

fn validate_pdf(source_id: &str, bytes: &[u8]) -> Result<(), IngestError> {
    if bytes.is_empty() {
        return Err(IngestError::EmptyDocument {
            source_id: source_id.to_string(),
        });
    }
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(IngestError::NotAPdf {
            source_id: source_id.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

fn identifier_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_identifier(&stem)
}

fn identifier_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return identifier_from_path(Path::new(last));
                }
            }
        }
    }
    "downloaded".to_string()
}

/// Reduce a name to `[A-Za-z0-9._-]`, replacing anything else with `_`.
///
/// Identifiers name artifact files and prefix chunk ids, so they must never
/// contain path separators.
pub fn sanitize_identifier(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}
