//! Query-time retrieval: embed the query, rank the index, deduplicate.
//!
//! The retriever makes exactly one embedding call per query. If the call
//! fails, retrieval fails with [`RagError::EmbeddingUnavailable`] (or
//! [`RagError::GatewayTimeout`]) unless keyword fallback is explicitly
//! enabled, in which case the result is marked `degraded`.
//!
//! Neighbouring chunks of one document usually say the same thing, so a
//! chunk is skipped when an already-selected chunk of the same document
//! lies within `dedup_window` sequence positions of it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::embedding::EmbeddingGateway;
use crate::error::{RagError, Result};
use crate::index::{IndexEntry, VectorIndex};
use crate::models::MetadataFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalParams {
    /// Sequence-index distance within which same-document chunks are
    /// treated as duplicates. `0` disables deduplication.
    pub dedup_window: u32,
    /// Rank by keyword overlap when the embedding gateway is down.
    pub degraded_keyword_fallback: bool,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            dedup_window: 1,
            degraded_keyword_fallback: false,
        }
    }
}

/// Ranked entries for one query, at most `k` long.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub entries: Vec<IndexEntry>,
    pub model_id: String,
    /// True when the entries came from keyword fallback.
    pub degraded: bool,
}

impl RetrievalResult {
    pub fn empty(model_id: &str) -> Self {
        Self {
            entries: Vec::new(),
            model_id: model_id.to_string(),
            degraded: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexEntry> {
        self.entries.iter()
    }
}

pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingGateway>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingGateway>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            index,
            embedder,
            params,
        }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    pub fn params(&self) -> RetrievalParams {
        self.params
    }

    /// Top `k` entries for `query_text` among documents matching `filter`.
    ///
    /// Returns fewer than `k` entries when fewer are eligible. An empty
    /// query or `k == 0` returns an empty result without calling the
    /// gateway.
    #[tracing::instrument(skip(self, query_text, filter), fields(model = %self.embedder.model_id()))]
    pub async fn retrieve(
        &self,
        query_text: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<RetrievalResult> {
        let model_id = self.embedder.model_id().to_string();
        if query_text.trim().is_empty() || k == 0 {
            return Ok(RetrievalResult::empty(&model_id));
        }

        let (ranked, degraded) = match self.embedder.embed_one(query_text).await {
            Ok(vector) => (self.index.ranked(&model_id, &vector, filter)?, false),
            Err(e) if self.params.degraded_keyword_fallback && e.is_transient() => {
                warn!(error = %e, "embedding gateway failed, using keyword fallback");
                (self.index.keyword_ranked(&model_id, query_text, filter), true)
            }
            Err(e) => return Err(embedding_failure(e)),
        };

        let candidates = ranked.len();
        let entries = select_distinct(ranked, k, self.params.dedup_window);
        debug!(candidates, returned = entries.len(), degraded, "retrieved");

        Ok(RetrievalResult {
            entries,
            model_id,
            degraded,
        })
    }
}

/// Walk `ranked` in order, keeping up to `k` entries that are not within
/// `window` sequence positions of an already-kept entry of the same
/// document.
pub fn select_distinct(ranked: Vec<IndexEntry>, k: usize, window: u32) -> Vec<IndexEntry> {
    let mut selected: Vec<IndexEntry> = Vec::with_capacity(k.min(ranked.len()));
    for entry in ranked {
        if selected.len() >= k {
            break;
        }
        let near_duplicate = window > 0
            && selected.iter().any(|s| {
                s.chunk.document_id == entry.chunk.document_id
                    && s.chunk.sequence_index.abs_diff(entry.chunk.sequence_index) <= window
            });
        if !near_duplicate {
            selected.push(entry);
        }
    }
    selected
}

/// Retrieval surfaces gateway trouble as `EmbeddingUnavailable`, keeping
/// timeouts and cancellation distinguishable.
fn embedding_failure(err: RagError) -> RagError {
    match err {
        RagError::GatewayTimeout { .. } | RagError::Cancelled | RagError::EmbeddingUnavailable(_) => {
            err
        }
        other => RagError::EmbeddingUnavailable(other.to_string()),
    }
}
