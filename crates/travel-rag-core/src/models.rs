//! Core data models for the retrieval pipeline.
//!
//! [`Document`]s, [`Chunk`]s, and [`Embedding`]s are created at ingest
//! time and persist until their source is re-ingested or deleted.
//! Query-time types live beside the code that builds them
//! ([`crate::index::IndexEntry`], [`crate::retrieve::RetrievalResult`],
//! [`crate::assemble::GenerationRequest`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known metadata keys. Other keys are preserved but not interpreted.
pub mod keys {
    pub const TITLE: &str = "title";
    pub const DESTINATION: &str = "destination";
    pub const CATEGORY: &str = "category";
    pub const SOURCE: &str = "source";
    pub const TAGS: &str = "tags";
}

/// A single metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl MetadataValue {
    /// Equality predicate used by metadata filters.
    ///
    /// Text compares case-insensitively; a list matches if any element
    /// does; numbers and booleans match their parsed form.
    pub fn matches(&self, expected: &str) -> bool {
        let expected = expected.trim();
        match self {
            MetadataValue::Text(s) => s.trim().eq_ignore_ascii_case(expected),
            MetadataValue::List(items) => items
                .iter()
                .any(|s| s.trim().eq_ignore_ascii_case(expected)),
            MetadataValue::Number(n) => expected
                .parse::<f64>()
                .map(|e| (e - n).abs() < f64::EPSILON)
                .unwrap_or(false),
            MetadataValue::Bool(b) => expected.parse::<bool>().map(|e| e == *b).unwrap_or(false),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Number(n) => write!(f, "{}", n),
            MetadataValue::Text(s) => write!(f, "{}", s),
            MetadataValue::List(items) => write!(f, "{}", items.join(", ")),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

/// Typed key-value metadata attached to a document.
///
/// Keys are kept sorted so serialized metadata is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    /// Text value for `key`, if present and textual.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetadataValue::as_text)
    }

    pub fn title(&self) -> Option<&str> {
        self.text(keys::TITLE)
    }

    pub fn destination(&self) -> Option<&str> {
        self.text(keys::DESTINATION)
    }

    pub fn category(&self) -> Option<&str> {
        self.text(keys::CATEGORY)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge `other` into `self`; keys in `other` win.
    pub fn merge(&mut self, other: &Metadata) {
        for (k, v) in other.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Build metadata from a loosely-typed JSON object.
    ///
    /// Scalars and string arrays map to their typed variants; anything
    /// else (nested objects, mixed arrays) is kept as its JSON text so no
    /// key is ever dropped.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut meta = Metadata::new();
        if let Some(obj) = value.as_object() {
            for (k, v) in obj {
                let typed = match v {
                    serde_json::Value::Null => continue,
                    serde_json::Value::Bool(b) => MetadataValue::Bool(*b),
                    serde_json::Value::Number(n) => match n.as_f64() {
                        Some(f) => MetadataValue::Number(f),
                        None => MetadataValue::Text(n.to_string()),
                    },
                    serde_json::Value::String(s) => MetadataValue::Text(s.clone()),
                    serde_json::Value::Array(items) => {
                        let strings: Option<Vec<String>> = items
                            .iter()
                            .map(|i| i.as_str().map(str::to_string))
                            .collect();
                        match strings {
                            Some(list) => MetadataValue::List(list),
                            None => MetadataValue::Text(v.to_string()),
                        }
                    }
                    serde_json::Value::Object(_) => MetadataValue::Text(v.to_string()),
                };
                meta.0.insert(k.clone(), typed);
            }
        }
        meta
    }
}

impl FromIterator<(String, MetadataValue)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, MetadataValue)>>(iter: I) -> Self {
        Metadata(iter.into_iter().collect())
    }
}

/// Equality predicates over document metadata, all of which must hold.
///
/// An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(BTreeMap<String, String>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if every predicate matches; a missing key never matches.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.0
            .iter()
            .all(|(k, expected)| metadata.get(k).is_some_and(|v| v.matches(expected)))
    }
}

impl FromIterator<(String, String)> for MetadataFilter {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        MetadataFilter(iter.into_iter().collect())
    }
}

/// A normalized source document.
///
/// Documents are immutable once ingested: re-ingesting the same source
/// produces a new `Document` with the same `id` that supersedes the old
/// one along with all of its chunks and embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_path: String,
    pub raw_text: String,
    pub metadata: Metadata,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    /// Create a document whose id is derived from `source_path`.
    pub fn from_source(source_path: &str, raw_text: String, metadata: Metadata) -> Self {
        Self {
            id: document_id_for(source_path),
            source_path: source_path.to_string(),
            raw_text,
            metadata,
            ingested_at: Utc::now(),
        }
    }
}

/// Deterministic document id for a source path.
///
/// The same source always maps to the same id, which is what makes
/// re-ingestion supersede rather than duplicate.
pub fn document_id_for(source_path: &str) -> String {
    let digest = Sha256::digest(source_path.as_bytes());
    format!("doc-{}", &hex_string(&digest)[..16])
}

/// A bounded, contiguous span of a document's text.
///
/// Offsets are byte offsets into [`Document::raw_text`] on UTF-8 char
/// boundaries, with `text == raw_text[start_offset..end_offset]` and
/// `end_offset > start_offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub sequence_index: u32,
    /// Copied from the owning document; used as chunk recency in ranking.
    pub ingested_at: DateTime<Utc>,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// A fixed-length vector for one chunk under one embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model_id: String,
}

impl Embedding {
    pub fn dim(&self) -> usize {
        self.vector.len()
    }
}

pub(crate) fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
