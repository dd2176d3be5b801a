//! Application wiring.
//!
//! [`App`] owns one of everything: the configuration, the SQLite store,
//! the in-memory index rebuilt from it, the gateway pool, and the
//! ingestion and query services built on top. The CLI and the HTTP
//! server both start from [`App::build`].

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use travel_rag_core::embedding::EmbeddingGateway;
use travel_rag_core::generation::GenerationGateway;
use travel_rag_core::index::VectorIndex;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::gateway::{GatewayPool, PooledEmbedder, PooledGenerator};
use crate::generation::create_generator;
use crate::ingest::Ingestor;
use crate::service::QueryService;
use crate::store::SqliteStore;

#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub store: SqliteStore,
    pub index: Arc<VectorIndex>,
    pub pool: Arc<GatewayPool>,
    pub ingestor: Arc<Ingestor>,
    pub service: Arc<QueryService>,
}

impl App {
    /// Build with the configured gateways.
    pub async fn build(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config)?;
        let generator = create_generator(&config)?;
        Self::with_gateways(config, embedder, generator).await
    }

    /// Build with caller-supplied raw gateways. They are wrapped in the
    /// shared [`GatewayPool`] like the configured ones.
    pub async fn with_gateways(
        config: Config,
        embedder: Arc<dyn EmbeddingGateway>,
        generator: Arc<dyn GenerationGateway>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let store = SqliteStore::open(&config).await?;
        let index = Arc::new(VectorIndex::new(config.retrieval.similarity_metric));
        let loaded = store.load_into(&index).await?;
        info!(
            documents = loaded.documents,
            chunks = loaded.chunks,
            db = %config.db.path.display(),
            "index loaded"
        );

        let pool = Arc::new(GatewayPool::from_config(&config.gateway));
        let embedder: Arc<dyn EmbeddingGateway> = Arc::new(PooledEmbedder::new(
            embedder,
            pool.clone(),
            config.embedding.batch_size,
        ));
        let generator: Arc<dyn GenerationGateway> =
            Arc::new(PooledGenerator::new(generator, pool.clone()));

        let ingestor = Arc::new(Ingestor::new(
            index.clone(),
            embedder.clone(),
            store.clone(),
            config.chunking.params()?,
            config.ingest.clone(),
        ));
        let service = Arc::new(QueryService::new(
            config.clone(),
            index.clone(),
            embedder,
            generator,
        ));

        Ok(Self {
            config,
            store,
            index,
            pool,
            ingestor,
            service,
        })
    }

    pub async fn shutdown(&self) {
        self.store.close().await;
    }
}
