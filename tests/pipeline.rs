//! End-to-end pipeline tests through [`App`]: ingestion into SQLite,
//! retrieval, generation, and reload from disk.

use std::sync::Arc;
use tempfile::TempDir;

use travel_rag::app::App;
use travel_rag::config::Config;
use travel_rag::embedding::HashingEmbedder;
use travel_rag::generation::ExtractiveGenerator;
use travel_rag::service::{QueryRequest, RetrieveRequest};
use travel_rag::travel;
use travel_rag_core::models::{keys, Document, Metadata, MetadataFilter};

const MODEL: &str = "hashing-384";

fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.db.path = tmp.path().join("data").join("trag.sqlite");
    config.chunking.max_chunk_size = 200;
    config.chunking.chunk_overlap = 20;
    config.gateway.base_backoff_ms = 1;
    config
}

/// Tokyo, Paris and Bali from the sample corpus.
fn three_cities() -> Vec<Document> {
    travel::sample_documents()
        .into_iter()
        .filter(|d| matches!(d.metadata.destination(), Some("Tokyo" | "Paris" | "Bali")))
        .collect()
}

fn bali_id() -> String {
    three_cities()
        .into_iter()
        .find(|d| d.metadata.destination() == Some("Bali"))
        .map(|d| d.id)
        .unwrap()
}

async fn seeded_app(tmp: &TempDir) -> App {
    let app = App::build(test_config(tmp)).await.unwrap();
    let report = app
        .ingestor
        .ingest_batch(three_cities().into_iter().map(Ok).collect())
        .await;
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 0);
    app
}

fn bali_query() -> RetrieveRequest {
    RetrieveRequest {
        query_text: "best time to visit Bali".to_string(),
        k: Some(2),
        filters: MetadataFilter::new(),
    }
}

#[tokio::test]
async fn test_best_time_to_visit_bali() {
    let tmp = TempDir::new().unwrap();
    let app = seeded_app(&tmp).await;

    let first = app.service.retrieve(bali_query()).await.unwrap();
    assert_eq!(first.chunks.len(), 2);
    let bali = bali_id();
    for chunk in &first.chunks {
        assert_eq!(chunk.document_id, bali);
    }
    assert!(!first.degraded);

    let second = app.service.retrieve(bali_query()).await.unwrap();
    let ids = |r: &travel_rag::service::RetrieveResponse| {
        r.chunks
            .iter()
            .map(|c| (c.chunk_id.clone(), c.score.to_bits()))
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));

    app.shutdown().await;
}

#[tokio::test]
async fn test_adjacent_chunks_deduplicated() {
    let tmp = TempDir::new().unwrap();
    let app = seeded_app(&tmp).await;

    let mut request = bali_query();
    request.k = Some(4);
    let response = app.service.retrieve(request).await.unwrap();
    for (i, a) in response.chunks.iter().enumerate() {
        for b in &response.chunks[i + 1..] {
            if a.document_id == b.document_id {
                assert!(a.sequence_index.abs_diff(b.sequence_index) > 1);
            }
        }
    }

    app.shutdown().await;
}

#[tokio::test]
async fn test_query_answers_with_citations() {
    let tmp = TempDir::new().unwrap();
    let app = seeded_app(&tmp).await;

    let mut request = QueryRequest::new("best time to visit Bali");
    request.k = Some(2);
    let response = app.service.query(request).await.unwrap();

    assert!(!response.cited_chunks.is_empty());
    assert!(response.cited_chunks.len() <= 2);
    assert!(response.answer_text.contains("[1]"));
    assert!(response.answer_text.to_lowercase().contains("dry season"));
    assert_eq!(response.embedding_model, MODEL);
    assert_eq!(response.generation_model, "extractive");

    app.shutdown().await;
}

#[tokio::test]
async fn test_index_reloads_from_database() {
    let tmp = TempDir::new().unwrap();
    let app = seeded_app(&tmp).await;
    let before = app.service.retrieve(bali_query()).await.unwrap();
    let stats_before = app.service.stats();
    app.shutdown().await;

    let reopened = App::build(test_config(&tmp)).await.unwrap();
    let stats_after = reopened.service.stats();
    assert_eq!(stats_after.index.documents, stats_before.index.documents);
    assert_eq!(
        stats_after.index.collections[0].chunks,
        stats_before.index.collections[0].chunks
    );

    let after = reopened.service.retrieve(bali_query()).await.unwrap();
    let ids = |chunks: &[travel_rag::service::RetrievedChunk]| {
        chunks.iter().map(|c| c.chunk_id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&before.chunks), ids(&after.chunks));

    reopened.shutdown().await;
}

#[tokio::test]
async fn test_reingest_replaces_chunks() {
    let tmp = TempDir::new().unwrap();
    let app = seeded_app(&tmp).await;
    let bali = bali_id();
    let old_chunks = app.index.chunks_of(MODEL, &bali).len();
    assert!(old_chunks > 1);

    let metadata = Metadata::new()
        .with(keys::DESTINATION, "Bali")
        .with(keys::CATEGORY, "city_guide");
    let revised = Document::from_source(
        "sample/bali_guide.txt",
        "Bali now has a single short paragraph about surfing at Canggu.".to_string(),
        metadata,
    );
    assert_eq!(revised.id, bali);
    let report = app.ingestor.ingest_batch(vec![Ok(revised)]).await;
    assert_eq!(report.succeeded, 1);

    let chunks = app.index.chunks_of(MODEL, &bali);
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].text.contains("Canggu"));
    assert_eq!(app.service.stats().index.documents, 3);
    app.shutdown().await;

    // The replacement is what persists.
    let reopened = App::build(test_config(&tmp)).await.unwrap();
    assert_eq!(reopened.index.chunks_of(MODEL, &bali).len(), 1);
    reopened.shutdown().await;
}

#[tokio::test]
async fn test_delete_removes_document_everywhere() {
    let tmp = TempDir::new().unwrap();
    let app = seeded_app(&tmp).await;
    let bali = bali_id();

    assert!(app.ingestor.delete(&bali).await.unwrap());
    assert!(!app.ingestor.delete(&bali).await.unwrap());

    let response = app.service.retrieve(bali_query()).await.unwrap();
    assert!(response.chunks.iter().all(|c| c.document_id != bali));
    app.shutdown().await;

    let reopened = App::build(test_config(&tmp)).await.unwrap();
    assert_eq!(reopened.service.stats().index.documents, 2);
    assert!(reopened.index.document(&bali).is_none());
    reopened.shutdown().await;
}

#[tokio::test]
async fn test_changed_embedding_model_rejected() {
    let tmp = TempDir::new().unwrap();
    let app = seeded_app(&tmp).await;
    app.shutdown().await;

    // Same model id, different vector width.
    let app = App::with_gateways(
        test_config(&tmp),
        Arc::new(HashingEmbedder::with_model_id(MODEL, 128)),
        Arc::new(ExtractiveGenerator),
    )
    .await
    .unwrap();
    let doc = Document::from_source(
        "notes/lisbon.txt",
        "Lisbon is built on seven hills above the Tagus.".to_string(),
        Metadata::new().with(keys::DESTINATION, "Lisbon"),
    );
    let err = app.ingestor.ingest_document(doc).await.unwrap_err();
    assert_eq!(err.kind(), "dimension_mismatch");
    assert_eq!(app.service.stats().index.documents, 3);
    app.shutdown().await;
}

#[tokio::test]
async fn test_ingest_directory_reports_failures() {
    let tmp = TempDir::new().unwrap();
    let app = App::build(test_config(&tmp)).await.unwrap();

    let guides = tmp.path().join("guides");
    std::fs::create_dir_all(&guides).unwrap();
    std::fs::write(
        guides.join("lisbon.md"),
        "# Lisbon\n\nTram 28 climbs through Alfama past the cathedral.",
    )
    .unwrap();
    std::fs::write(guides.join("empty.txt"), "   \n").unwrap();
    std::fs::write(guides.join("broken.pdf"), b"not a pdf").unwrap();

    let extra = Metadata::new().with(keys::DESTINATION, "Lisbon");
    let report = app.ingestor.ingest_path(&guides, &extra, None).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 2);

    let reasons: Vec<_> = report
        .documents
        .iter()
        .filter_map(|d| d.failure.as_ref().map(|f| f.reason.as_str()))
        .collect();
    assert!(reasons.contains(&"empty_text"));
    assert!(reasons.contains(&"unreadable_format"));

    let filter = MetadataFilter::new().with(keys::DESTINATION, "Lisbon");
    let response = app
        .service
        .retrieve(RetrieveRequest {
            query_text: "tram through Alfama".to_string(),
            k: Some(3),
            filters: filter,
        })
        .await
        .unwrap();
    assert_eq!(response.chunks.len(), 1);
    assert_eq!(response.chunks[0].metadata.title(), Some("Lisbon"));
    app.shutdown().await;
}

#[tokio::test]
async fn test_same_file_keeps_one_identity() {
    let tmp = TempDir::new().unwrap();
    let app = App::build(test_config(&tmp)).await.unwrap();

    let guides = tmp.path().join("guides");
    std::fs::create_dir_all(&guides).unwrap();
    std::fs::write(
        guides.join("bali.md"),
        "# Bali\n\nThe dry season from April to October is the best time to visit.",
    )
    .unwrap();

    let none = Metadata::new();
    let single = app
        .ingestor
        .ingest_path(&guides.join("bali.md"), &none, None)
        .await
        .unwrap();
    let scanned = app.ingestor.ingest_path(&guides, &none, None).await.unwrap();

    assert_eq!(single.documents[0].document_id, scanned.documents[0].document_id);
    assert_eq!(app.service.stats().index.documents, 1);
    app.shutdown().await;
}

#[tokio::test]
async fn test_same_name_in_different_roots_kept_apart() {
    let tmp = TempDir::new().unwrap();
    let app = App::build(test_config(&tmp)).await.unwrap();

    for (dir, text) in [
        ("alps", "Zermatt huts open in July for hikers."),
        ("coast", "Algarve beaches are warm from June."),
    ] {
        let root = tmp.path().join(dir);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("guide.md"), text).unwrap();
        let report = app
            .ingestor
            .ingest_path(&root, &Metadata::new(), None)
            .await
            .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.documents[0].source_path, "guide.md");
    }

    assert_eq!(app.service.stats().index.documents, 2);
    let hits = app.index.keyword_ranked(MODEL, "Zermatt", &MetadataFilter::new());
    assert_eq!(hits.len(), 1);
    app.shutdown().await;
}
