//! Embedding gateways.
//!
//! | `embedding.provider` | Gateway | Notes |
//! |----------------------|---------|-------|
//! | `hashing` (default) | [`HashingEmbedder`] | offline, deterministic feature hashing |
//! | `openai` | [`OpenAiEmbedder`] | `POST /v1/embeddings`, needs `OPENAI_API_KEY` |
//! | `ollama` | [`OllamaEmbedder`] | `POST /api/embed` on a local Ollama |
//! | `local` | `LocalEmbedder` | fastembed, behind the `local-embeddings` feature |
//!
//! Gateways here make exactly one attempt per call. Timeouts, retries and
//! the concurrency bound are applied by [`crate::gateway::PooledEmbedder`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use travel_rag_core::embedding::{l2_normalize, EmbeddingGateway};
use travel_rag_core::RagError;

use crate::config::Config;
use crate::gateway::send_json;

/// Words too common to carry meaning in a travel query.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "its", "of",
    "on", "or", "that", "the", "this", "to", "was", "what", "when", "where", "which", "with",
    "you", "your",
];

/// Offline embedder: each term is hashed into one of `dims` buckets with a
/// hash-derived sign, then the vector is L2-normalized.
///
/// Texts that share terms get similar vectors, which is enough for
/// keyword-flavoured semantic search without a model download.
pub struct HashingEmbedder {
    model_id: String,
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            model_id: format!("hashing-{}", dims),
            dims,
        }
    }

    pub fn with_model_id(model_id: impl Into<String>, dims: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dims,
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for term in terms(text) {
            let digest = Sha256::digest(term.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

/// Lowercased alphanumeric terms without stopwords; simple plurals folded.
fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .map(|t| match t.strip_suffix('s') {
            Some(stem) if stem.len() > 3 && !stem.ends_with('s') => stem.to_string(),
            _ => t,
        })
}

#[async_trait]
impl EmbeddingGateway for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> travel_rag_core::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// OpenAI-compatible embeddings API.
pub struct OpenAiEmbedder {
    model_id: String,
    dims: usize,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Ok(Self {
            model_id: config.embedding.resolved_model_id(),
            dims: config.embedding.resolved_dims(),
            url: config
                .embedding
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> travel_rag_core::Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model_id,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/v1/embeddings", self.url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = send_json(request, "OpenAI", RagError::EmbeddingUnavailable).await?;
        parse_openai_response(&json)
    }
}

/// `data[].embedding`, reordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> travel_rag_core::Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid_response("OpenAI", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| invalid_response("OpenAI", "missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, json_vector(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Embeddings from a local Ollama instance.
pub struct OllamaEmbedder {
    model_id: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            model_id: config.embedding.resolved_model_id(),
            dims: config.embedding.resolved_dims(),
            url: config
                .embedding
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for OllamaEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> travel_rag_core::Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model_id,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body);
        let json = send_json(request, "Ollama", RagError::EmbeddingUnavailable).await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| invalid_response("Ollama", "missing embeddings array"))?;
        embeddings
            .iter()
            .map(|e| json_vector(e, "Ollama"))
            .collect()
    }
}

fn json_vector(value: &serde_json::Value, service: &str) -> travel_rag_core::Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| invalid_response(service, "embedding is not an array"))?;
    Ok(items
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

fn invalid_response(service: &str, what: &str) -> RagError {
    RagError::EmbeddingUnavailable(format!("Invalid {} response: {}", service, what))
}

pub(crate) fn http_client(config: &Config) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.gateway.timeout())
        .build()?)
}

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::*;
    use parking_lot::Mutex;

    /// In-process embeddings via fastembed. The model is loaded on first
    /// use and kept for the life of the process.
    pub struct LocalEmbedder {
        model_id: String,
        dims: usize,
        batch_size: usize,
        model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalEmbedder {
        pub fn new(config: &Config) -> Result<Self> {
            let model_id = config.embedding.resolved_model_id();
            fastembed_model(&model_id)?;
            Ok(Self {
                model_id,
                dims: config.embedding.resolved_dims(),
                batch_size: config.embedding.batch_size,
                model: Arc::new(Mutex::new(None)),
            })
        }
    }

    fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5",
                other
            ),
        }
    }

    #[async_trait]
    impl EmbeddingGateway for LocalEmbedder {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> travel_rag_core::Result<Vec<Vec<f32>>> {
            let texts = texts.to_vec();
            let model_id = self.model_id.clone();
            let batch_size = self.batch_size;
            let slot = self.model.clone();

            tokio::task::spawn_blocking(move || {
                let mut guard = slot.lock();
                if guard.is_none() {
                    let kind = fastembed_model(&model_id)
                        .map_err(|e| RagError::Config(e.to_string()))?;
                    let model = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(kind).with_show_download_progress(false),
                    )
                    .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;
                    *guard = Some(model);
                }
                let Some(model) = guard.as_mut() else {
                    return Err(RagError::EmbeddingUnavailable("model not loaded".to_string()));
                };
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))
            })
            .await
            .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?
        }
    }
}

/// Build the configured raw (unpooled) embedding gateway.
pub fn create_embedder(config: &Config) -> Result<Arc<dyn EmbeddingGateway>> {
    match config.embedding.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::with_model_id(
            config.embedding.resolved_model_id(),
            config.embedding.resolved_dims(),
        ))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!(
            "embedding.provider = \"local\" requires building with the `local-embeddings` feature"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
