//! Document loader: files and directories into normalized [`Document`]s.
//!
//! Supported formats, by extension:
//!
//! | Extension | Handling |
//! |-----------|----------|
//! | `.txt` | UTF-8 text |
//! | `.md`, `.markdown` | UTF-8 text; first `# ` heading becomes the title |
//! | `.pdf` | text via [`crate::extract`] |
//! | `.docx` | paragraph text via [`crate::extract`] |
//! | `.json` | one object or an array of objects with `text`/`content` plus metadata |
//!
//! Every document gets `title`, `destination` (default `general`),
//! `category` (default `guide`) and `source` metadata unless the file or
//! caller supplies them. Each file yields per-document results so one
//! unreadable file never aborts a batch.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use travel_rag_core::models::{document_id_for, keys, Document, Metadata, MetadataValue};
use travel_rag_core::{IngestionFailure, RagError};

use crate::config::IngestConfig;
use crate::extract::{self, MIME_DOCX, MIME_PDF};

/// Outcome of loading one document.
pub type Loaded = std::result::Result<Document, RagError>;

/// Load a file, or every matching file under a directory.
///
/// `extra` metadata overrides what the loader derives. `id` replaces the
/// derived document id and is only honoured for a single-document file.
pub fn load_path(
    path: &Path,
    config: &IngestConfig,
    extra: &Metadata,
    id: Option<&str>,
) -> Result<Vec<Loaded>> {
    if !path.exists() {
        bail!("Path does not exist: {}", path.display());
    }

    if path.is_file() {
        let source = path.to_string_lossy().to_string();
        let mut docs = load_file(path, &source, config, extra);
        if let (Some(id), [Ok(doc)]) = (id, docs.as_mut_slice()) {
            doc.id = id.to_string();
        }
        return Ok(docs);
    }

    let mut loaded = Vec::new();
    for file in scan_directory(path, config)? {
        let relative = file.strip_prefix(path).unwrap_or(&file);
        let source = relative.to_string_lossy().replace('\\', "/");
        loaded.extend(load_file(&file, &source, config, extra));
    }
    Ok(loaded)
}

/// Files under `root` matching the include globs and not the exclude
/// globs, sorted by path.
pub fn scan_directory(root: &Path, config: &IngestConfig) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&config.include_globs)?;

    let mut excludes = vec!["**/.git/**".to_string(), "**/target/**".to_string()];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();
    debug!(root = %root.display(), files = files.len(), "scanned directory");
    Ok(files)
}

/// Identity a file's document id is derived from: its canonical path, so
/// the same file maps to one id however it was reached.
pub fn file_identity(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .replace('\\', "/")
}

/// Load one file, reported as `source_path`.
pub fn load_file(path: &Path, source_path: &str, config: &IngestConfig, extra: &Metadata) -> Vec<Loaded> {
    let identity = file_identity(path);
    let fail = |reason: IngestionFailure| vec![Err(RagError::ingestion(source_path, reason))];

    let size = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) => return fail(IngestionFailure::Io(e.to_string())),
    };
    if size > config.max_file_bytes {
        return fail(IngestionFailure::UnreadableFormat(format!(
            "file is {} bytes, limit is {}",
            size, config.max_file_bytes
        )));
    }

    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => return fail(IngestionFailure::Io(e.to_string())),
    };

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| source_path.to_string());
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| source_path.to_string());

    let mut base = Metadata::new()
        .with(keys::TITLE, stem)
        .with(keys::SOURCE, file_name);

    let text = match ext.as_str() {
        "txt" | "md" | "markdown" => match String::from_utf8(bytes) {
            Ok(t) => {
                if ext != "txt" {
                    if let Some(title) = markdown_title(&t) {
                        base.insert(keys::TITLE, title);
                    }
                }
                t
            }
            Err(_) => {
                return fail(IngestionFailure::UnreadableFormat(
                    "file is not valid UTF-8".to_string(),
                ))
            }
        },
        "pdf" => match extract::extract_text(&bytes, MIME_PDF) {
            Ok(t) => t,
            Err(e) => return fail(IngestionFailure::UnreadableFormat(e.to_string())),
        },
        "docx" => match extract::extract_text(&bytes, MIME_DOCX) {
            Ok(t) => t,
            Err(e) => return fail(IngestionFailure::UnreadableFormat(e.to_string())),
        },
        "json" => return load_json(&bytes, source_path, &identity, base, extra),
        other => {
            return fail(IngestionFailure::UnreadableFormat(format!(
                "unsupported file type '.{}'",
                other
            )))
        }
    };

    vec![finish(source_path, &identity, text, base, extra)]
}

/// Build a document from an in-memory blob, as the HTTP ingestion
/// boundary does.
pub fn document_from_text(
    id: Option<&str>,
    source_path: &str,
    text: String,
    metadata: Metadata,
) -> Loaded {
    let base = Metadata::new().with(keys::SOURCE, source_path);
    let mut doc = finish(source_path, source_path, text, base, &metadata)?;
    if let Some(id) = id {
        doc.id = id.to_string();
    }
    Ok(doc)
}

fn finish(
    source_path: &str,
    identity: &str,
    text: String,
    mut metadata: Metadata,
    extra: &Metadata,
) -> Loaded {
    if text.trim().is_empty() {
        return Err(RagError::ingestion(source_path, IngestionFailure::EmptyText));
    }
    metadata.merge(extra);
    apply_defaults(&mut metadata);
    let mut doc = Document::from_source(source_path, text, metadata);
    doc.id = document_id_for(identity);
    Ok(doc)
}

fn apply_defaults(metadata: &mut Metadata) {
    if metadata.get(keys::DESTINATION).is_none() {
        metadata.insert(keys::DESTINATION, "general");
    }
    if metadata.get(keys::CATEGORY).is_none() {
        metadata.insert(keys::CATEGORY, "guide");
    }
}

/// Structured travel documents: an object, or an array of objects, each
/// with `text` (or `content`) and optional `id`, `metadata`, and top-level
/// metadata keys.
fn load_json(
    bytes: &[u8],
    source_path: &str,
    identity: &str,
    base: Metadata,
    extra: &Metadata,
) -> Vec<Loaded> {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => {
            return vec![Err(RagError::ingestion(
                source_path,
                IngestionFailure::UnreadableFormat(format!("invalid JSON: {}", e)),
            ))]
        }
    };

    let items: Vec<(String, String, &serde_json::Value)> = match &value {
        serde_json::Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                (
                    format!("{}#{}", source_path, i),
                    format!("{}#{}", identity, i),
                    item,
                )
            })
            .collect(),
        serde_json::Value::Object(_) => {
            vec![(source_path.to_string(), identity.to_string(), &value)]
        }
        _ => {
            return vec![Err(RagError::ingestion(
                source_path,
                IngestionFailure::UnreadableFormat(
                    "expected a JSON object or array of objects".to_string(),
                ),
            ))]
        }
    };

    items
        .into_iter()
        .map(|(item_source, item_identity, item)| {
            let Some(obj) = item.as_object() else {
                return Err(RagError::ingestion(
                    &item_source,
                    IngestionFailure::UnreadableFormat("array element is not an object".to_string()),
                ));
            };
            let text = obj
                .get("text")
                .or_else(|| obj.get("content"))
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string();

            let mut metadata = base.clone();
            for (k, v) in obj {
                if matches!(k.as_str(), "text" | "content" | "id" | "metadata") {
                    continue;
                }
                let single = serde_json::json!({ k.clone(): v.clone() });
                metadata.merge(&Metadata::from_json(&single));
            }
            if let Some(nested) = obj.get("metadata") {
                metadata.merge(&Metadata::from_json(nested));
            }

            let mut doc = finish(&item_source, &item_identity, text, metadata, extra)?;
            if let Some(id) = obj.get("id").and_then(|v| v.as_str()) {
                doc.id = id.to_string();
            }
            Ok(doc)
        })
        .collect()
}

fn markdown_title(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Parse `key=value` pairs (CLI `--meta`) into metadata. Comma-separated
/// values for `tags` become a list.
pub fn metadata_from_pairs(pairs: &[(String, String)]) -> Metadata {
    let mut metadata = Metadata::new();
    for (k, v) in pairs {
        if k == keys::TAGS {
            let tags = v.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
            metadata.insert(k.clone(), MetadataValue::List(tags.collect()));
        } else {
            metadata.insert(k.clone(), v.clone());
        }
    }
    metadata
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
