//! Query-time service: retrieve → assemble → generate.
//!
//! Every entry point either returns a complete grounded answer or a
//! [`RagError`]; there is no partial answer. All operations are read-only
//! on the index, so cancelling one (dropping its future, or via
//! [`QueryService::answer_cancellable`]) never leaves shared state behind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use travel_rag_core::assemble::{assemble, assemble_zero_context, ContextChunk, PromptStyle};
use travel_rag_core::embedding::EmbeddingGateway;
use travel_rag_core::generation::GenerationGateway;
use travel_rag_core::index::{IndexEntry, IndexStats, VectorIndex};
use travel_rag_core::models::{keys, Metadata, MetadataFilter};
use travel_rag_core::retrieve::Retriever;
use travel_rag_core::{RagError, Result};

use crate::config::Config;
use crate::travel::TravelPreferences;

const PLAN_K: usize = 8;
const DESTINATION_K: usize = 5;
const SEARCH_K: usize = 10;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    pub query_text: String,
    pub k: Option<usize>,
    pub filters: MetadataFilter,
    pub budget_tokens: Option<usize>,
    /// Answer without context instead of failing when even the top chunk
    /// does not fit the budget.
    pub allow_zero_context: bool,
}

impl QueryRequest {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query_text: String,
    pub answer_text: String,
    pub cited_chunks: Vec<ContextChunk>,
    pub retrieval_latency_ms: u64,
    pub generation_latency_ms: u64,
    /// True when retrieval fell back to keyword ranking.
    pub degraded: bool,
    pub embedding_model: String,
    pub generation_model: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetrieveRequest {
    pub query_text: String,
    pub k: Option<usize>,
    pub filters: MetadataFilter,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source_path: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub sequence_index: u32,
    pub score: f32,
    pub text: String,
    pub metadata: Metadata,
}

impl From<&IndexEntry> for RetrievedChunk {
    fn from(entry: &IndexEntry) -> Self {
        Self {
            chunk_id: entry.chunk.id.clone(),
            document_id: entry.chunk.document_id.clone(),
            source_path: entry.document.source_path.clone(),
            start_offset: entry.chunk.start_offset,
            end_offset: entry.chunk.end_offset,
            sequence_index: entry.chunk.sequence_index,
            score: entry.score,
            text: entry.chunk.text.clone(),
            metadata: entry.document.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrieveResponse {
    pub chunks: Vec<RetrievedChunk>,
    pub degraded: bool,
    pub embedding_model: String,
    pub retrieval_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub index: IndexStats,
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub generation_model: String,
    pub temperature: f32,
}

/// One retrieve-and-generate run.
struct Run<'a> {
    retrieval_query: &'a str,
    prompt_query: &'a str,
    k: usize,
    filter: &'a MetadataFilter,
    budget_tokens: usize,
    style: PromptStyle,
    allow_zero_context: bool,
    /// Fail with `NotFound` instead of generating from nothing.
    require_context: bool,
}

pub struct QueryService {
    config: Arc<Config>,
    retriever: Retriever,
    generator: Arc<dyn GenerationGateway>,
}

impl QueryService {
    pub fn new(
        config: Arc<Config>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingGateway>,
        generator: Arc<dyn GenerationGateway>,
    ) -> Self {
        let retriever = Retriever::new(index, embedder, config.retrieval.params());
        Self {
            config,
            retriever,
            generator,
        }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        self.retriever.index()
    }

    /// Answer a question from the indexed travel documents.
    #[tracing::instrument(skip_all, fields(k = request.k))]
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        let query_text = request.query_text.trim();
        if query_text.is_empty() {
            return Err(RagError::InvalidInput("query_text must not be empty".to_string()));
        }
        self.run(Run {
            retrieval_query: query_text,
            prompt_query: query_text,
            k: request.k.unwrap_or(self.config.retrieval.default_k),
            filter: &request.filters,
            budget_tokens: request
                .budget_tokens
                .unwrap_or(self.config.generation.budget_tokens),
            style: PromptStyle::Answer,
            allow_zero_context: request.allow_zero_context,
            require_context: false,
        })
        .await
    }

    /// [`query`](Self::query), abandoned with [`RagError::Cancelled`] as
    /// soon as `cancel` completes.
    pub async fn answer_cancellable<C>(&self, request: QueryRequest, cancel: C) -> Result<QueryResponse>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                info!("query cancelled");
                Err(RagError::Cancelled)
            }
            result = self.query(request) => result,
        }
    }

    /// Ranked chunks for a query, without generation.
    pub async fn retrieve(&self, request: RetrieveRequest) -> Result<RetrieveResponse> {
        let query_text = request.query_text.trim();
        if query_text.is_empty() {
            return Err(RagError::InvalidInput("query_text must not be empty".to_string()));
        }
        let k = request.k.unwrap_or(self.config.retrieval.default_k);
        let started = Instant::now();
        let result = self.retriever.retrieve(query_text, k, &request.filters).await?;
        Ok(RetrieveResponse {
            chunks: result.iter().map(RetrievedChunk::from).collect(),
            degraded: result.degraded,
            embedding_model: result.model_id,
            retrieval_latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// A day-by-day plan grounded in documents for the requested
    /// destination.
    pub async fn plan(&self, preferences: &TravelPreferences) -> Result<QueryResponse> {
        let query = preferences.compose_query();
        self.run(Run {
            retrieval_query: &query,
            prompt_query: &query,
            k: PLAN_K,
            filter: &preferences.filter(),
            budget_tokens: self.config.generation.budget_tokens,
            style: PromptStyle::TravelPlan,
            allow_zero_context: true,
            require_context: false,
        })
        .await
    }

    /// Summary of one destination. Fails with [`RagError::NotFound`] when
    /// no document is tagged with it.
    pub async fn destination_info(&self, destination: &str) -> Result<QueryResponse> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(RagError::InvalidInput("destination must not be empty".to_string()));
        }
        let filter = MetadataFilter::new().with(keys::DESTINATION, destination);
        let retrieval_query = format!("travel guide and information about {}", destination);
        self.run(Run {
            retrieval_query: &retrieval_query,
            prompt_query: destination,
            k: DESTINATION_K,
            filter: &filter,
            budget_tokens: self.config.generation.budget_tokens,
            style: PromptStyle::DestinationSummary,
            allow_zero_context: false,
            require_context: true,
        })
        .await
    }

    /// Distinct destinations among documents relevant to `term`, sorted.
    pub async fn search_destinations(&self, term: &str) -> Result<Vec<String>> {
        let term = term.trim();
        if term.is_empty() {
            return Err(RagError::InvalidInput("search term must not be empty".to_string()));
        }
        let query = format!("destinations and places to visit in {}", term);
        let result = self
            .retriever
            .retrieve(&query, SEARCH_K, &MetadataFilter::new())
            .await?;
        let destinations: BTreeSet<String> = result
            .iter()
            .filter_map(|e| e.document.metadata.destination())
            .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("general"))
            .map(str::to_string)
            .collect();
        Ok(destinations.into_iter().collect())
    }

    pub fn stats(&self) -> SystemStats {
        SystemStats {
            index: self.retriever.index().stats(),
            embedding_model: self.retriever.model_id().to_string(),
            embedding_dims: self.config.embedding.resolved_dims(),
            generation_model: self.generator.model_id().to_string(),
            temperature: self.config.generation.temperature,
        }
    }

    async fn run(&self, run: Run<'_>) -> Result<QueryResponse> {
        let started = Instant::now();
        let result = self
            .retriever
            .retrieve(run.retrieval_query, run.k, run.filter)
            .await?;
        let retrieval_latency_ms = started.elapsed().as_millis() as u64;
        if run.require_context && result.is_empty() {
            return Err(RagError::NotFound(format!(
                "no documents match {}",
                describe_filter(run.filter)
            )));
        }

        let request = match assemble(run.prompt_query, &result, run.budget_tokens) {
            Ok(request) => request,
            Err(RagError::BudgetTooSmall { .. }) if run.allow_zero_context => {
                assemble_zero_context(run.prompt_query, run.budget_tokens)?
            }
            Err(e) => return Err(e),
        }
        .with_style(run.style);

        let started = Instant::now();
        let answer_text = self.generator.generate(&request).await?;
        let generation_latency_ms = started.elapsed().as_millis() as u64;

        info!(
            retrieved = result.len(),
            cited = request.context_chunks.len(),
            estimated_tokens = request.estimated_tokens,
            retrieval_latency_ms,
            generation_latency_ms,
            degraded = result.degraded,
            "answered"
        );

        Ok(QueryResponse {
            query_text: run.prompt_query.to_string(),
            answer_text,
            cited_chunks: request.context_chunks,
            retrieval_latency_ms,
            generation_latency_ms,
            degraded: result.degraded,
            embedding_model: result.model_id,
            generation_model: self.generator.model_id().to_string(),
        })
    }
}

fn describe_filter(filter: &MetadataFilter) -> String {
    serde_json::to_string(filter).unwrap_or_else(|_| "the filter".to_string())
}
