//! Ingestion pipeline: document → chunks → embeddings → store → index.
//!
//! Re-ingesting a document id replaces its previous version. Concurrent
//! ingestions of the same id are serialized by a per-document lock; the
//! index swap itself is atomic, so readers see either the old or the new
//! chunk set. A batch isolates failures per document.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use travel_rag_core::chunk::{chunk_document, ChunkingParams};
use travel_rag_core::embedding::EmbeddingGateway;
use travel_rag_core::index::{DocumentInfo, VectorIndex};
use travel_rag_core::models::{Document, Embedding, Metadata};
use travel_rag_core::{IngestionFailure, RagError, Result};

use crate::config::IngestConfig;
use crate::loader::{self, Loaded};
use crate::store::SqliteStore;

/// Per-document outcome within a batch.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub source_path: String,
    pub document_id: Option<String>,
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    /// `unreadable_format`, `empty_text`, `embedding_failure`, `io`, or
    /// the error kind for anything else.
    pub reason: String,
    pub message: String,
}

impl FailureReport {
    fn from_error(err: &RagError) -> Self {
        let reason = match err {
            RagError::Ingestion { reason, .. } => reason.code().to_string(),
            other => other.kind().to_string(),
        };
        Self {
            reason,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub documents: Vec<DocumentReport>,
    pub succeeded: usize,
    pub failed: usize,
    pub chunks: usize,
}

impl BatchReport {
    fn record(&mut self, report: DocumentReport) {
        if report.failure.is_some() {
            self.failed += 1;
        } else {
            self.succeeded += 1;
            self.chunks += report.chunks;
        }
        self.documents.push(report);
    }
}

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Holds one document's ingestion lock. Its map entry is dropped with the
/// last holder, so the map only contains ids with work in flight.
struct DocumentLock<'a> {
    locks: &'a LockMap,
    document_id: String,
    handle: Option<Arc<tokio::sync::Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a> DocumentLock<'a> {
    async fn acquire(locks: &'a LockMap, document_id: &str) -> DocumentLock<'a> {
        let handle = locks.lock().entry(document_id.to_string()).or_default().clone();
        let mut held = DocumentLock {
            locks,
            document_id: document_id.to_string(),
            handle: Some(handle.clone()),
            guard: None,
        };
        held.guard = Some(handle.lock_owned().await);
        held
    }
}

impl Drop for DocumentLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        self.guard.take();
        self.handle.take();
        if locks
            .get(&self.document_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.document_id);
        }
    }
}

pub struct Ingestor {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingGateway>,
    store: SqliteStore,
    params: ChunkingParams,
    ingest_config: IngestConfig,
    locks: LockMap,
}

impl Ingestor {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingGateway>,
        store: SqliteStore,
        params: ChunkingParams,
        ingest_config: IngestConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            store,
            params,
            ingest_config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Chunk, embed, persist and index one document. Returns the number of
    /// chunks now indexed for it.
    ///
    /// On any failure the previously indexed version, if any, stays in
    /// place.
    #[tracing::instrument(skip(self, document), fields(document_id = %document.id, source = %document.source_path))]
    pub async fn ingest_document(&self, mut document: Document) -> Result<usize> {
        let source = document.source_path.clone();
        if document.raw_text.trim().is_empty() {
            return Err(RagError::ingestion(source, IngestionFailure::EmptyText));
        }

        let _lock = DocumentLock::acquire(&self.locks, &document.id).await;

        // Later versions of a document must outrank earlier ones on ties.
        document.ingested_at = document.ingested_at.max(Utc::now());

        let chunks = chunk_document(&document, self.params)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await.map_err(|e| match e {
            RagError::DimensionMismatch { .. } | RagError::Cancelled => e,
            other => RagError::ingestion(&source, IngestionFailure::Embedding(other.to_string())),
        })?;
        if vectors.len() != chunks.len() {
            return Err(RagError::ingestion(
                &source,
                IngestionFailure::Embedding(format!(
                    "expected {} vectors, got {}",
                    chunks.len(),
                    vectors.len()
                )),
            ));
        }

        let model_id = self.embedder.model_id().to_string();
        self.index.ensure_compatible(&model_id, self.embedder.dims())?;

        let embeddings: Vec<Embedding> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| Embedding {
                chunk_id: chunk.id.clone(),
                vector,
                model_id: model_id.clone(),
            })
            .collect();

        self.store
            .save_document(&document, &chunks, &embeddings)
            .await
            .map_err(|e| RagError::ingestion(&source, IngestionFailure::Io(format!("{:#}", e))))?;

        let info = DocumentInfo::from(&document);
        let indexed = self
            .index
            .replace_document(info, embeddings.into_iter().zip(chunks).collect())?;

        info!(chunks = indexed, model = %model_id, "document ingested");
        Ok(indexed)
    }

    /// Ingest each loaded document independently.
    pub async fn ingest_batch(&self, loaded: Vec<Loaded>) -> BatchReport {
        let mut report = BatchReport::default();
        for item in loaded {
            let entry = match item {
                Ok(document) => {
                    let source_path = document.source_path.clone();
                    let document_id = document.id.clone();
                    match self.ingest_document(document).await {
                        Ok(chunks) => DocumentReport {
                            source_path,
                            document_id: Some(document_id),
                            chunks,
                            failure: None,
                        },
                        Err(e) => {
                            warn!(source = %source_path, error = %e, "document failed to ingest");
                            DocumentReport {
                                source_path,
                                document_id: Some(document_id),
                                chunks: 0,
                                failure: Some(FailureReport::from_error(&e)),
                            }
                        }
                    }
                }
                Err(e) => {
                    let source_path = match &e {
                        RagError::Ingestion { source_path, .. } => source_path.clone(),
                        _ => String::new(),
                    };
                    warn!(source = %source_path, error = %e, "document failed to load");
                    DocumentReport {
                        source_path,
                        document_id: None,
                        chunks: 0,
                        failure: Some(FailureReport::from_error(&e)),
                    }
                }
            };
            report.record(entry);
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            chunks = report.chunks,
            "batch ingested"
        );
        report
    }

    /// Load a file or directory and ingest everything in it.
    pub async fn ingest_path(
        &self,
        path: &Path,
        extra: &Metadata,
        id: Option<&str>,
    ) -> anyhow::Result<BatchReport> {
        let loaded = loader::load_path(path, &self.ingest_config, extra, id)?;
        Ok(self.ingest_batch(loaded).await)
    }

    /// Remove a document from the store and the index. Returns whether it
    /// existed in either.
    pub async fn delete(&self, document_id: &str) -> Result<bool> {
        let _lock = DocumentLock::acquire(&self.locks, document_id).await;

        let stored = self
            .store
            .delete_document(document_id)
            .await
            .map_err(|e| RagError::Storage(format!("{:#}", e)))?;
        let indexed = self.index.document(document_id).is_some();
        self.index.delete(document_id);
        if stored || indexed {
            info!(document_id, "document deleted");
        }
        Ok(stored || indexed)
    }
}
