//! TOML configuration.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration: hashing embeddings, extractive generation, and a
//! SQLite database under `./data`. [`load_config`] parses and validates
//! once at startup; the resulting [`Config`] is shared as `Arc<Config>`
//! and never mutated.
//!
//! ```toml
//! [db]
//! path = "./data/trag.sqlite"
//!
//! [chunking]
//! max_chunk_size = 800
//! chunk_overlap = 100
//!
//! [retrieval]
//! default_k = 5
//! similarity_metric = "cosine"
//!
//! [embedding]
//! provider = "hashing"
//!
//! [generation]
//! provider = "extractive"
//! budget_tokens = 3000
//!
//! [gateway]
//! timeout_ms = 30000
//! max_retries = 3
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use travel_rag_core::chunk::ChunkingParams;
use travel_rag_core::embedding::SimilarityMetric;
use travel_rag_core::retrieve::RetrievalParams;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/trag.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_max_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    100
}

impl ChunkingConfig {
    pub fn params(&self) -> Result<ChunkingParams> {
        ChunkingParams::new(self.max_chunk_size, self.chunk_overlap)
            .map_err(|e| anyhow::anyhow!("chunking: {}", e))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default)]
    pub similarity_metric: SimilarityMetric,
    /// Sequence-index distance for same-document dedup; 0 disables.
    #[serde(default = "default_dedup_window")]
    pub dedup_window: u32,
    /// Rank by keyword overlap when the embedding gateway is unavailable.
    #[serde(default)]
    pub degraded_keyword_fallback: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            similarity_metric: SimilarityMetric::default(),
            dedup_window: default_dedup_window(),
            degraded_keyword_fallback: false,
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_dedup_window() -> u32 {
    1
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            dedup_window: self.dedup_window,
            degraded_keyword_fallback: self.degraded_keyword_fallback,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hashing`, `openai`, `ollama`, or `local`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Embedding model id. Defaults per provider.
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for `openai` or `ollama`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model_id: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_batch_size() -> usize {
    32
}

impl EmbeddingConfig {
    /// Model id with the provider default applied.
    pub fn resolved_model_id(&self) -> String {
        if let Some(model) = &self.model_id {
            return model.clone();
        }
        match self.provider.as_str() {
            "openai" => "text-embedding-3-small".to_string(),
            "ollama" => "nomic-embed-text".to_string(),
            "local" => "all-minilm-l6-v2".to_string(),
            _ => format!("hashing-{}", self.resolved_dims()),
        }
    }

    /// Dimensions with the provider/model default applied.
    pub fn resolved_dims(&self) -> usize {
        if let Some(dims) = self.dims {
            return dims;
        }
        match (self.provider.as_str(), self.model_id.as_deref()) {
            ("openai", Some("text-embedding-3-large")) => 3072,
            ("openai", _) => 1536,
            ("ollama", _) => 768,
            ("local", Some("bge-base-en-v1.5")) => 768,
            ("local", Some("bge-large-en-v1.5")) => 1024,
            _ => 384,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `extractive`, `openai`, or `ollama`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Token budget for query plus retrieved context.
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model_id: None,
            url: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            budget_tokens: default_budget_tokens(),
        }
    }
}

fn default_generation_provider() -> String {
    "extractive".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    1000
}
fn default_budget_tokens() -> usize {
    3000
}

impl GenerationConfig {
    pub fn resolved_model_id(&self) -> String {
        if let Some(model) = &self.model_id {
            return model.clone();
        }
        match self.provider.as_str() {
            "openai" => "gpt-3.5-turbo".to_string(),
            "ollama" => "llama3.1".to_string(),
            _ => "extractive".to_string(),
        }
    }
}

/// Timeout, retry and concurrency policy shared by all gateway calls.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    1_000
}
fn default_max_concurrency() -> usize {
    4
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }
}

/// Filesystem ingestion settings.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Files larger than this are reported as failures, not read.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.txt", "**/*.md", "**/*.pdf", "**/*.docx", "**/*.json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_file_bytes() -> u64 {
    20 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Parse and validate a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.params()?;

        if self.retrieval.default_k == 0 {
            bail!("retrieval.default_k must be >= 1");
        }

        match self.embedding.provider.as_str() {
            "hashing" | "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be hashing, openai, ollama, or local.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        match self.generation.provider.as_str() {
            "extractive" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown generation provider: '{}'. Must be extractive, openai, or ollama.",
                other
            ),
        }
        if self.generation.budget_tokens == 0 {
            bail!("generation.budget_tokens must be > 0");
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            bail!("generation.temperature must be in [0.0, 2.0]");
        }

        if self.gateway.timeout_ms == 0 {
            bail!("gateway.timeout_ms must be > 0");
        }
        if self.gateway.max_concurrency == 0 {
            bail!("gateway.max_concurrency must be >= 1");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml_str(&content)
}
