//! In-memory vector index, partitioned into collections by embedding model.
//!
//! Each collection holds `(embedding, chunk)` pairs for one `model_id` and
//! has a fixed dimension, set by its first vector. Document metadata is held
//! once per document and joined onto entries at query time.
//!
//! All state sits behind one `parking_lot::RwLock`. Writes (upsert, delete,
//! replace) take the write lock for the whole mutation, so a reader sees a
//! document either fully before or fully after a write. Queries copy `Arc`
//! handles to the eligible entries under the read lock and score them after
//! releasing it.
//!
//! # Ranking
//!
//! Results are sorted by:
//! 1. score, descending
//! 2. chunk recency (`ingested_at`), newest first
//! 3. chunk id, ascending

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::embedding::SimilarityMetric;
use crate::error::{RagError, Result};
use crate::models::{Chunk, Document, Embedding, Metadata, MetadataFilter};

/// The per-document fields the index keeps for filtering and provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentInfo {
    pub id: String,
    pub source_path: String,
    pub metadata: Metadata,
    pub ingested_at: DateTime<Utc>,
}

impl From<&Document> for DocumentInfo {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            source_path: doc.source_path.clone(),
            metadata: doc.metadata.clone(),
            ingested_at: doc.ingested_at,
        }
    }
}

/// A scored index hit. `score` is only meaningful for the query that
/// produced it.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub embedding: Arc<Embedding>,
    pub chunk: Arc<Chunk>,
    pub document: Arc<DocumentInfo>,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub model_id: String,
    pub dims: usize,
    pub chunks: usize,
    pub documents: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub metric: SimilarityMetric,
    pub documents: usize,
    pub collections: Vec<CollectionStats>,
}

#[derive(Clone)]
struct Stored {
    embedding: Arc<Embedding>,
    chunk: Arc<Chunk>,
}

struct Collection {
    dims: usize,
    entries: HashMap<String, Stored>,
    by_document: HashMap<String, BTreeSet<String>>,
}

impl Collection {
    fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: HashMap::new(),
            by_document: HashMap::new(),
        }
    }

    fn insert(&mut self, stored: Stored) {
        let chunk_id = stored.chunk.id.clone();
        let document_id = stored.chunk.document_id.clone();
        if let Some(previous) = self.entries.insert(chunk_id.clone(), stored) {
            if previous.chunk.document_id != document_id {
                self.unlink(&previous.chunk.document_id, &chunk_id);
            }
        }
        self.by_document
            .entry(document_id)
            .or_default()
            .insert(chunk_id);
    }

    fn unlink(&mut self, document_id: &str, chunk_id: &str) {
        if let Some(ids) = self.by_document.get_mut(document_id) {
            ids.remove(chunk_id);
            if ids.is_empty() {
                self.by_document.remove(document_id);
            }
        }
    }

    fn remove_document(&mut self, document_id: &str) -> usize {
        match self.by_document.remove(document_id) {
            Some(ids) => {
                for id in &ids {
                    self.entries.remove(id);
                }
                ids.len()
            }
            None => 0,
        }
    }
}

#[derive(Default)]
struct IndexState {
    collections: HashMap<String, Collection>,
    documents: HashMap<String, Arc<DocumentInfo>>,
}

impl IndexState {
    /// Drop a document from the documents map once no collection
    /// references it.
    fn forget_if_orphaned(&mut self, document_id: &str) {
        let referenced = self
            .collections
            .values()
            .any(|c| c.by_document.contains_key(document_id));
        if !referenced {
            self.documents.remove(document_id);
        }
    }
}

/// Vector index over chunk embeddings.
pub struct VectorIndex {
    metric: SimilarityMetric,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    pub fn new(metric: SimilarityMetric) -> Self {
        Self {
            metric,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    /// Insert or replace the entry for `chunk.id`.
    ///
    /// Creates the `embedding.model_id` collection on first use, with the
    /// vector's dimension. Idempotent per chunk id.
    pub fn upsert(&self, embedding: Embedding, chunk: Chunk, document: DocumentInfo) -> Result<()> {
        validate_pair(&embedding, &chunk, &document.id)?;

        let mut state = self.state.write();
        if let Some(collection) = state.collections.get(&embedding.model_id) {
            check_dims(&embedding.model_id, collection.dims, embedding.dim())?;
        }

        let document_id = document.id.clone();
        let previous_owner = state
            .collections
            .get(&embedding.model_id)
            .and_then(|c| c.entries.get(&chunk.id))
            .map(|s| s.chunk.document_id.clone());

        state.documents.insert(document_id, Arc::new(document));
        let collection = state
            .collections
            .entry(embedding.model_id.clone())
            .or_insert_with(|| Collection::new(embedding.dim()));
        collection.insert(Stored {
            embedding: Arc::new(embedding),
            chunk: Arc::new(chunk),
        });

        if let Some(owner) = previous_owner {
            state.forget_if_orphaned(&owner);
        }
        Ok(())
    }

    /// Atomically supersede every chunk of `document`, in every collection,
    /// with `entries`.
    ///
    /// All entries are validated before anything changes; on error the
    /// index is untouched.
    pub fn replace_document(
        &self,
        document: DocumentInfo,
        entries: Vec<(Embedding, Chunk)>,
    ) -> Result<usize> {
        let mut batch_dims: HashMap<&str, usize> = HashMap::new();
        for (embedding, chunk) in &entries {
            validate_pair(embedding, chunk, &document.id)?;
            let expected = *batch_dims
                .entry(embedding.model_id.as_str())
                .or_insert(embedding.dim());
            check_dims(&embedding.model_id, expected, embedding.dim())?;
        }

        let mut state = self.state.write();
        for (model_id, dims) in &batch_dims {
            if let Some(collection) = state.collections.get(*model_id) {
                check_dims(model_id, collection.dims, *dims)?;
            }
        }

        for collection in state.collections.values_mut() {
            collection.remove_document(&document.id);
        }

        let count = entries.len();
        let document_id = document.id.clone();
        state.documents.insert(document_id.clone(), Arc::new(document));
        for (embedding, chunk) in entries {
            let collection = state
                .collections
                .entry(embedding.model_id.clone())
                .or_insert_with(|| Collection::new(embedding.dim()));
            collection.insert(Stored {
                embedding: Arc::new(embedding),
                chunk: Arc::new(chunk),
            });
        }
        if count == 0 {
            state.documents.remove(&document_id);
        }
        Ok(count)
    }

    /// Fails with [`RagError::DimensionMismatch`] if `model_id` already has
    /// a collection of a different dimension.
    pub fn ensure_compatible(&self, model_id: &str, dims: usize) -> Result<()> {
        match self.state.read().collections.get(model_id) {
            Some(collection) => check_dims(model_id, collection.dims, dims),
            None => Ok(()),
        }
    }

    /// Remove every chunk and embedding of a document.
    ///
    /// Returns the number of entries removed across all collections.
    pub fn delete(&self, document_id: &str) -> usize {
        let mut state = self.state.write();
        let removed = state
            .collections
            .values_mut()
            .map(|c| c.remove_document(document_id))
            .sum();
        state.documents.remove(document_id);
        removed
    }

    /// Top `k` entries of `model_id` by similarity to `vector`.
    pub fn query(&self, model_id: &str, vector: &[f32], k: usize) -> Result<Vec<IndexEntry>> {
        self.query_filtered(model_id, vector, k, &MetadataFilter::new())
    }

    /// Top `k` entries whose document matches `filter`.
    ///
    /// The filter is applied before ranking, so up to `k` eligible
    /// entries are returned regardless of how many ineligible entries
    /// score higher.
    pub fn query_filtered(
        &self,
        model_id: &str,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<IndexEntry>> {
        let mut ranked = self.ranked(model_id, vector, filter)?;
        ranked.truncate(k);
        Ok(ranked)
    }

    /// Every eligible entry, fully ranked.
    ///
    /// An unknown `model_id` yields an empty list; a vector of the wrong
    /// dimension fails with [`RagError::DimensionMismatch`].
    pub fn ranked(
        &self,
        model_id: &str,
        vector: &[f32],
        filter: &MetadataFilter,
    ) -> Result<Vec<IndexEntry>> {
        let candidates = {
            let state = self.state.read();
            let Some(collection) = state.collections.get(model_id) else {
                return Ok(Vec::new());
            };
            check_dims(model_id, collection.dims, vector.len())?;
            eligible(&state, collection, filter)
        };

        let mut scored: Vec<IndexEntry> = candidates
            .into_iter()
            .map(|(stored, document)| {
                let score = self.metric.score(vector, &stored.embedding.vector);
                IndexEntry {
                    embedding: stored.embedding,
                    chunk: stored.chunk,
                    document,
                    score,
                }
            })
            .collect();
        scored.sort_by(rank_order);
        Ok(scored)
    }

    /// Term-overlap ranking over the chunks of `model_id`.
    ///
    /// Score is the fraction of distinct query terms found in the chunk.
    /// Chunks matching no term are excluded.
    pub fn keyword_ranked(
        &self,
        model_id: &str,
        query: &str,
        filter: &MetadataFilter,
    ) -> Vec<IndexEntry> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let candidates = {
            let state = self.state.read();
            let Some(collection) = state.collections.get(model_id) else {
                return Vec::new();
            };
            eligible(&state, collection, filter)
        };

        let mut scored: Vec<IndexEntry> = candidates
            .into_iter()
            .filter_map(|(stored, document)| {
                let words: HashSet<String> = query_terms(&stored.chunk.text).into_iter().collect();
                let hits = terms.iter().filter(|t| words.contains(*t)).count();
                if hits == 0 {
                    return None;
                }
                Some(IndexEntry {
                    embedding: stored.embedding,
                    chunk: stored.chunk,
                    document,
                    score: hits as f32 / terms.len() as f32,
                })
            })
            .collect();
        scored.sort_by(rank_order);
        scored
    }

    pub fn keyword_query(
        &self,
        model_id: &str,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> Vec<IndexEntry> {
        let mut ranked = self.keyword_ranked(model_id, query, filter);
        ranked.truncate(k);
        ranked
    }

    /// Model ids with a collection, sorted.
    pub fn collections(&self) -> Vec<String> {
        let state = self.state.read();
        let mut ids: Vec<String> = state.collections.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn document(&self, document_id: &str) -> Option<Arc<DocumentInfo>> {
        self.state.read().documents.get(document_id).cloned()
    }

    /// All indexed documents, sorted by id.
    pub fn documents(&self) -> Vec<Arc<DocumentInfo>> {
        let state = self.state.read();
        let mut docs: Vec<Arc<DocumentInfo>> = state.documents.values().cloned().collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }

    pub fn document_count(&self) -> usize {
        self.state.read().documents.len()
    }

    /// Chunks of one document under `model_id`, in sequence order.
    pub fn chunks_of(&self, model_id: &str, document_id: &str) -> Vec<Arc<Chunk>> {
        let state = self.state.read();
        let Some(collection) = state.collections.get(model_id) else {
            return Vec::new();
        };
        let mut chunks: Vec<Arc<Chunk>> = collection
            .by_document
            .get(document_id)
            .into_iter()
            .flatten()
            .filter_map(|id| collection.entries.get(id))
            .map(|s| s.chunk.clone())
            .collect();
        chunks.sort_by_key(|c| c.sequence_index);
        chunks
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        let mut collections: Vec<CollectionStats> = state
            .collections
            .iter()
            .map(|(model_id, c)| CollectionStats {
                model_id: model_id.clone(),
                dims: c.dims,
                chunks: c.entries.len(),
                documents: c.by_document.len(),
            })
            .collect();
        collections.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        IndexStats {
            metric: self.metric,
            documents: state.documents.len(),
            collections,
        }
    }
}

/// Canonical result ordering: score desc, recency desc, chunk id asc.
pub fn rank_order(a: &IndexEntry, b: &IndexEntry) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.chunk.ingested_at.cmp(&a.chunk.ingested_at))
        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

/// Lowercased alphanumeric terms, deduplicated, in first-seen order.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn eligible(
    state: &IndexState,
    collection: &Collection,
    filter: &MetadataFilter,
) -> Vec<(Stored, Arc<DocumentInfo>)> {
    collection
        .entries
        .values()
        .filter_map(|stored| {
            let document = state.documents.get(&stored.chunk.document_id)?;
            if filter.matches(&document.metadata) {
                Some((stored.clone(), document.clone()))
            } else {
                None
            }
        })
        .collect()
}

fn validate_pair(embedding: &Embedding, chunk: &Chunk, document_id: &str) -> Result<()> {
    if embedding.chunk_id != chunk.id {
        return Err(RagError::InvalidInput(format!(
            "embedding is for chunk '{}' but was paired with chunk '{}'",
            embedding.chunk_id, chunk.id
        )));
    }
    if chunk.document_id != document_id {
        return Err(RagError::InvalidInput(format!(
            "chunk '{}' belongs to document '{}', not '{}'",
            chunk.id, chunk.document_id, document_id
        )));
    }
    if embedding.vector.is_empty() {
        return Err(RagError::InvalidInput(format!(
            "empty vector for chunk '{}'",
            chunk.id
        )));
    }
    Ok(())
}

fn check_dims(model_id: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(RagError::DimensionMismatch {
            model_id: model_id.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::keys;
    use chrono::TimeZone;

    const MODEL: &str = "test-model";

    fn info(id: &str, destination: &str) -> DocumentInfo {
        DocumentInfo {
            id: id.to_string(),
            source_path: format!("{}.txt", id),
            metadata: Metadata::new().with(keys::DESTINATION, destination),
            ingested_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn chunk(id: &str, doc: &str, seq: u32, ts: i64) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc.to_string(),
            text: format!("text of {}", id),
            start_offset: seq as usize * 10,
            end_offset: seq as usize * 10 + 10,
            sequence_index: seq,
            ingested_at: Utc.timestamp_opt(ts, 0).unwrap(),
            hash: String::new(),
        }
    }

    fn emb(chunk_id: &str, v: &[f32]) -> Embedding {
        Embedding {
            chunk_id: chunk_id.to_string(),
            vector: v.to_vec(),
            model_id: MODEL.to_string(),
        }
    }

    fn ids(entries: &[IndexEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.chunk.id.as_str()).collect()
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let index = VectorIndex::new(SimilarityMetric::Cosine);
        for _ in 0..3 {
            index
                .upsert(emb("c1", &[1.0, 0.0]), chunk("c1", "d1", 0, 1), info("d1", "Bali"))
                .unwrap();
        }
        let results = index.query(MODEL, &[1.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 1);
        let stats = index.stats();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.collections[0].chunks, 1);
    }

    #[test]
    fn test_upsert_replaces_vector() {
        let index = VectorIndex::new(SimilarityMetric::Cosine);
        index
            .upsert(emb("c1", &[1.0, 0.0]), chunk("c1", "d1", 0, 1), info("d1", "Bali"))
            .unwrap();
        index
            .upsert(emb("c1", &[0.0, 1.0]), chunk("c1", "d1", 0, 1), info("d1", "Bali"))
            .unwrap();
        let results = index.query(MODEL, &[0.0, 1.0], 1).unwrap();
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_guard() {
        let index = VectorIndex::new(SimilarityMetric::Cosine);
        index
            .upsert(emb("c1", &[1.0, 0.0, 0.0]), chunk("c1", "d1", 0, 1), info("d1", "Bali"))
            .unwrap();

        let err = index
            .upsert(emb("c2", &[1.0, 0.0]), chunk("c2", "d1", 1, 1), info("d1", "Bali"))
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch { expected: 3, actual: 2, .. }
        ));

        let err = index.query(MODEL, &[1.0, 0.0], 5).unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
        assert_eq!(index.stats().collections[0].chunks, 1);
    }

    #[test]
    fn test_unknown_collection_is_empty() {
        let index = VectorIndex::new(SimilarityMetric::Cosine);
        assert!(index.query("nope", &[1.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_mismatched_pair_rejected() {
        let index = VectorIndex::new(SimilarityMetric::Cosine);
        let err = index
            .upsert(emb("c9", &[1.0]), chunk("c1", "d1", 0, 1), info("d1", "Bali"))
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }

    #[test]
    fn test_ranking_tie_breaks() {
        let index = VectorIndex::new(SimilarityMetric::Cosine);
        // Same vector for every chunk, so every score ties.
        index
            .upsert(emb("b", &[1.0, 1.0]), chunk("b", "d1", 0, 100), info("d1", "Bali"))
            .unwrap();
        index
            .upsert(emb("a", &[1.0, 1.0]), chunk("a", "d1", 1, 100), info("d1", "Bali"))
            .unwrap();
        index
            .upsert(emb("z", &[1.0, 1.0]), chunk("z", "d2", 0, 200), info("d2", "Paris"))
            .unwrap();
        index
            .upsert(emb("top", &[1.0, 0.9]), chunk("top", "d3", 0, 1), info("d3", "Tokyo"))
            .unwrap();

        let results = index.query(MODEL, &[1.0, 0.9], 10).unwrap();
        assert_eq!(ids(&results), vec!["top", "z", "a", "b"]);
        let again = index.query(MODEL, &[1.0, 0.9], 10).unwrap();
        assert_eq!(ids(&results), ids(&again));
    }

    #[test]
    fn test_filter_applies_before_top_k() {
        let index = VectorIndex::new(SimilarityMetric::Cosine);
        for i in 0..5 {
            let id = format!("p{}", i);
            index
                .upsert(emb(&id, &[1.0, 0.0]), chunk(&id, "paris", i, 1), info("paris", "Paris"))
                .unwrap();
        }
        index
            .upsert(emb("b0", &[0.0, 1.0]), chunk("b0", "bali", 0, 1), info("bali", "Bali"))
            .unwrap();
        index
            .upsert(emb("b1", &[0.1, 1.0]), chunk("b1", "bali", 1, 1), info("bali", "Bali"))
            .unwrap();

        let filter = MetadataFilter::new().with(keys::DESTINATION, "bali");
        let results = index.query_filtered(MODEL, &[1.0, 0.0], 2, &filter).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|e| e.document.id == "bali"));
        assert_eq!(results[0].chunk.id, "b1");
    }

    #[test]
    fn test_delete_removes_everything() {
        let index = VectorIndex::new(SimilarityMetric::Cosine);
        index
            .upsert(emb("c1", &[1.0, 0.0]), chunk("c1", "d1", 0, 1), info("d1", "Bali"))
            .unwrap();
        index
            .upsert(emb("c2", &[0.5, 0.5]), chunk("c2", "d1", 1, 1), info("d1", "Bali"))
            .unwrap();
        index
            .upsert(emb("c3", &[0.0, 1.0]), chunk("c3", "d2", 0, 1), info("d2", "Paris"))
            .unwrap();

        assert_eq!(index.delete("d1"), 2);
        let results = index.query(MODEL, &[1.0, 0.0], 10).unwrap();
        assert_eq!(ids(&results), vec!["c3"]);
        assert!(index.document("d1").is_none());
        assert_eq!(index.delete("d1"), 0);
    }

    #[test]
    fn test_replace_document_supersedes() {
        let index = VectorIndex::new(SimilarityMetric::Cosine);
        index
            .upsert(emb("old", &[1.0, 0.0]), chunk("old", "d1", 0, 1), info("d1", "Bali"))
            .unwrap();

        let n = index
            .replace_document(
                info("d1", "Bali"),
                vec![
                    (emb("new1", &[1.0, 0.0]), chunk("new1", "d1", 0, 2)),
                    (emb("new2", &[0.0, 1.0]), chunk("new2", "d1", 1, 2)),
                ],
            )
            .unwrap();
        assert_eq!(n, 2);
        let results = index.query(MODEL, &[1.0, 0.0], 10).unwrap();
        assert_eq!(ids(&results), vec!["new1", "new2"]);
    }

    #[test]
    fn test_failed_replace_leaves_index_untouched() {
        let index = VectorIndex::new(SimilarityMetric::Cosine);
        index
            .upsert(emb("old", &[1.0, 0.0]), chunk("old", "d1", 0, 1), info("d1", "Bali"))
            .unwrap();

        let err = index
            .replace_document(
                info("d1", "Bali"),
                vec![
                    (emb("new1", &[1.0, 0.0]), chunk("new1", "d1", 0, 2)),
                    (emb("new2", &[0.0, 1.0, 0.0]), chunk("new2", "d1", 1, 2)),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
        let results = index.query(MODEL, &[1.0, 0.0], 10).unwrap();
        assert_eq!(ids(&results), vec!["old"]);
    }

    #[test]
    fn test_inner_product_metric() {
        let index = VectorIndex::new(SimilarityMetric::InnerProduct);
        index
            .upsert(emb("small", &[1.0, 0.0]), chunk("small", "d1", 0, 1), info("d1", "Bali"))
            .unwrap();
        index
            .upsert(emb("big", &[3.0, 0.0]), chunk("big", "d2", 0, 1), info("d2", "Bali"))
            .unwrap();
        let results = index.query(MODEL, &[1.0, 0.0], 2).unwrap();
        assert_eq!(ids(&results), vec!["big", "small"]);
        assert_eq!(results[0].score, 3.0);
    }

    #[test]
    fn test_keyword_query_counts_terms() {
        let index = VectorIndex::new(SimilarityMetric::Cosine);
        let mut c1 = chunk("c1", "d1", 0, 1);
        c1.text = "Best time to visit Bali is the dry season".into();
        let mut c2 = chunk("c2", "d2", 0, 1);
        c2.text = "Paris in spring is a good time".into();
        index.upsert(emb("c1", &[1.0]), c1, info("d1", "Bali")).unwrap();
        index.upsert(emb("c2", &[1.0]), c2, info("d2", "Paris")).unwrap();

        let results = index.keyword_query(MODEL, "best time Bali", 5, &MetadataFilter::new());
        assert_eq!(ids(&results), vec!["c1", "c2"]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!(index
            .keyword_query(MODEL, "   ", 5, &MetadataFilter::new())
            .is_empty());
    }

    #[test]
    fn test_concurrent_readers_see_whole_documents() {
        let index = Arc::new(VectorIndex::new(SimilarityMetric::Cosine));
        let generation = |g: u32| -> Vec<(Embedding, Chunk)> {
            (0..4)
                .map(|i| {
                    let id = format!("g{}-c{}", g, i);
                    (emb(&id, &[1.0, i as f32]), chunk(&id, "d1", i, g as i64))
                })
                .collect()
        };
        index.replace_document(info("d1", "Bali"), generation(0)).unwrap();

        let writer = {
            let index = index.clone();
            std::thread::spawn(move || {
                for g in 1..200 {
                    index.replace_document(info("d1", "Bali"), generation(g)).unwrap();
                    if g % 50 == 0 {
                        index.delete("d1");
                    }
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let index = index.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let results = index.query(MODEL, &[1.0, 1.0], 10).unwrap();
                        assert!(results.len() == 0 || results.len() == 4);
                        let prefixes: BTreeSet<&str> = results
                            .iter()
                            .map(|e| e.chunk.id.split('-').next().unwrap())
                            .collect();
                        assert!(prefixes.len() <= 1);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
