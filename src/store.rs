//! SQLite persistence for documents, chunks and embeddings.
//!
//! The in-memory [`VectorIndex`] is the query-time source of truth; this
//! store makes it durable. Writes for one document happen in one
//! transaction, and [`SqliteStore::load_into`] rebuilds the index on
//! startup.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

use travel_rag_core::embedding::{blob_to_vec, vec_to_blob};
use travel_rag_core::index::{DocumentInfo, VectorIndex};
use travel_rag_core::models::{Chunk, Document, Embedding, Metadata};

use crate::config::Config;
use crate::migrate;

/// Counts from rebuilding the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub documents: usize,
    pub chunks: usize,
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and run migrations.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = connect(&config.db.path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Replace a document with its new chunks and embeddings.
    ///
    /// Old chunks and embeddings of the document are removed in the same
    /// transaction, so a reader never sees a mix of versions.
    pub async fn save_document(
        &self,
        document: &Document,
        chunks: &[Chunk],
        embeddings: &[Embedding],
    ) -> Result<()> {
        let metadata_json = serde_json::to_string(&document.metadata)?;
        let ingested_at = document
            .ingested_at
            .timestamp_nanos_opt()
            .context("Ingestion time out of range")?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(&document.id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&document.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, source_path, raw_text, metadata_json, ingested_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_path = excluded.source_path,
                raw_text = excluded.raw_text,
                metadata_json = excluded.metadata_json,
                ingested_at = excluded.ingested_at
            "#,
        )
        .bind(&document.id)
        .bind(&document.source_path)
        .bind(&document.raw_text)
        .bind(&metadata_json)
        .bind(ingested_at)
        .execute(&mut *tx)
        .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, sequence_index, start_offset, end_offset, text, hash)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.sequence_index as i64)
            .bind(chunk.start_offset as i64)
            .bind(chunk.end_offset as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;
        }

        let now = Utc::now().timestamp();
        for embedding in embeddings {
            sqlx::query(
                "INSERT OR IGNORE INTO collections (model_id, dims, created_at) VALUES (?, ?, ?)",
            )
            .bind(&embedding.model_id)
            .bind(embedding.dim() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO embeddings (chunk_id, model_id, dims, vector)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(chunk_id, model_id) DO UPDATE SET
                    dims = excluded.dims,
                    vector = excluded.vector
                "#,
            )
            .bind(&embedding.chunk_id)
            .bind(&embedding.model_id)
            .bind(embedding.dim() as i64)
            .bind(vec_to_blob(&embedding.vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete a document with its chunks and embeddings. Returns whether
    /// the document existed.
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }

    pub async fn document_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Rebuild `index` from every persisted document.
    ///
    /// Documents whose vectors no longer fit their collection are skipped
    /// with a warning rather than failing startup.
    pub async fn load_into(&self, index: &VectorIndex) -> Result<LoadReport> {
        let doc_rows = sqlx::query(
            "SELECT id, source_path, metadata_json, ingested_at FROM documents ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut documents: HashMap<String, DocumentInfo> = HashMap::new();
        for row in &doc_rows {
            let id: String = row.get("id");
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json)
                .with_context(|| format!("Invalid metadata for document {}", id))?;
            let nanos: i64 = row.get("ingested_at");
            documents.insert(
                id.clone(),
                DocumentInfo {
                    id,
                    source_path: row.get("source_path"),
                    metadata,
                    ingested_at: DateTime::from_timestamp_nanos(nanos),
                },
            );
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.sequence_index, c.start_offset, c.end_offset,
                   c.text, c.hash, e.model_id, e.vector
            FROM chunks c
            JOIN embeddings e ON e.chunk_id = c.id
            ORDER BY c.document_id, c.sequence_index
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<String, Vec<(Embedding, Chunk)>> = HashMap::new();
        for row in &rows {
            let document_id: String = row.get("document_id");
            let Some(info) = documents.get(&document_id) else {
                continue;
            };
            let chunk = Chunk {
                id: row.get("id"),
                document_id: document_id.clone(),
                text: row.get("text"),
                start_offset: row.get::<i64, _>("start_offset") as usize,
                end_offset: row.get::<i64, _>("end_offset") as usize,
                sequence_index: row.get::<i64, _>("sequence_index") as u32,
                ingested_at: info.ingested_at,
                hash: row.get("hash"),
            };
            let blob: Vec<u8> = row.get("vector");
            let embedding = Embedding {
                chunk_id: chunk.id.clone(),
                vector: blob_to_vec(&blob),
                model_id: row.get("model_id"),
            };
            grouped
                .entry(document_id)
                .or_default()
                .push((embedding, chunk));
        }

        let mut report = LoadReport::default();
        let mut ids: Vec<String> = grouped.keys().cloned().collect();
        ids.sort();
        for id in ids {
            let entries = grouped.remove(&id).unwrap_or_default();
            let Some(info) = documents.remove(&id) else {
                continue;
            };
            match index.replace_document(info, entries) {
                Ok(n) => {
                    report.documents += 1;
                    report.chunks += n;
                }
                Err(e) => warn!(document_id = %id, error = %e, "skipping persisted document"),
            }
        }

        debug!(
            documents = report.documents,
            chunks = report.chunks,
            "index rebuilt from database"
        );
        Ok(report)
    }
}

async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use travel_rag_core::chunk::{chunk_document, ChunkingParams};
    use travel_rag_core::embedding::SimilarityMetric;
    use travel_rag_core::models::keys;

    async fn open_store(tmp: &TempDir) -> SqliteStore {
        let mut config = Config::default();
        config.db.path = tmp.path().join("nested").join("trag.sqlite");
        SqliteStore::open(&config).await.unwrap()
    }

    fn document(source: &str, text: &str) -> (Document, Vec<Chunk>, Vec<Embedding>) {
        let doc = Document::from_source(
            source,
            text.to_string(),
            Metadata::new().with(keys::DESTINATION, "Kyoto"),
        );
        let chunks = chunk_document(&doc, ChunkingParams::new(40, 5).unwrap()).unwrap();
        let embeddings = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| Embedding {
                chunk_id: c.id.clone(),
                vector: vec![i as f32, 1.0, 0.5],
                model_id: "test-3".to_string(),
            })
            .collect();
        (doc, chunks, embeddings)
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let (doc, chunks, embeddings) = document(
            "kyoto.txt",
            "Kyoto has two thousand temples.\n\nThe bamboo grove at Arashiyama is busiest at noon.",
        );
        store.save_document(&doc, &chunks, &embeddings).await.unwrap();
        assert_eq!(store.document_count().await.unwrap(), 1);

        let index = VectorIndex::new(SimilarityMetric::Cosine);
        let report = store.load_into(&index).await.unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(report.chunks, chunks.len());

        let info = index.document(&doc.id).unwrap();
        assert_eq!(info.metadata.destination(), Some("Kyoto"));
        assert_eq!(info.ingested_at, doc.ingested_at);
        let reloaded = index.chunks_of("test-3", &doc.id);
        assert_eq!(reloaded.len(), chunks.len());
        assert_eq!(reloaded[0].text, chunks[0].text);
        store.close().await;
    }

    #[tokio::test]
    async fn test_save_supersedes_previous_version() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let (doc, chunks, embeddings) = document(
            "kyoto.txt",
            "Kyoto has two thousand temples.\n\nThe bamboo grove at Arashiyama is busiest at noon.",
        );
        store.save_document(&doc, &chunks, &embeddings).await.unwrap();

        let (doc, chunks, embeddings) = document("kyoto.txt", "Short now.");
        store.save_document(&doc, &chunks, &embeddings).await.unwrap();

        let index = VectorIndex::new(SimilarityMetric::Cosine);
        let report = store.load_into(&index).await.unwrap();
        assert_eq!(report.chunks, 1);
        assert_eq!(store.document_count().await.unwrap(), 1);
        store.close().await;
    }

    #[tokio::test]
    async fn test_delete_document() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let (doc, chunks, embeddings) = document("kyoto.txt", "Kyoto has two thousand temples.");
        store.save_document(&doc, &chunks, &embeddings).await.unwrap();

        assert!(store.delete_document(&doc.id).await.unwrap());
        assert!(!store.delete_document(&doc.id).await.unwrap());
        assert_eq!(store.document_count().await.unwrap(), 0);

        let index = VectorIndex::new(SimilarityMetric::Cosine);
        assert_eq!(store.load_into(&index).await.unwrap(), LoadReport::default());
        store.close().await;
    }

    #[tokio::test]
    async fn test_sub_millisecond_ingestion_order_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let (mut older, chunks_a, emb_a) = document("nara.txt", "Deer roam Nara park.");
        let (mut newer, chunks_b, emb_b) = document("uji.txt", "Uji is famous for matcha.");
        older.ingested_at = DateTime::from_timestamp_nanos(1_700_000_000_000_000_100);
        newer.ingested_at = older.ingested_at + chrono::Duration::nanoseconds(300);
        store.save_document(&older, &chunks_a, &emb_a).await.unwrap();
        store.save_document(&newer, &chunks_b, &emb_b).await.unwrap();

        let index = VectorIndex::new(SimilarityMetric::Cosine);
        store.load_into(&index).await.unwrap();
        let older_info = index.document(&older.id).unwrap();
        let newer_info = index.document(&newer.id).unwrap();
        assert_eq!(older_info.ingested_at, older.ingested_at);
        assert!(older_info.ingested_at < newer_info.ingested_at);
        assert!(index.chunks_of("test-3", &newer.id)[0].ingested_at > older.ingested_at);
        store.close().await;
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        migrate::run_migrations(store.pool()).await.unwrap();
        migrate::run_migrations(store.pool()).await.unwrap();
        store.close().await;
    }
}
