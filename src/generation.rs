//! Generation gateways.
//!
//! - [`ExtractiveGenerator`] (default) answers offline by quoting the
//!   context sentences that share the most terms with the request.
//! - [`OpenAiGenerator`] calls `POST /v1/chat/completions`.
//! - [`OllamaGenerator`] calls `POST /api/chat` with streaming disabled.
//!
//! Chat gateways send [`GenerationRequest::render`] as a system message and
//! a user message. Like the embedding gateways they make one attempt per
//! call; [`crate::gateway::PooledGenerator`] adds timeouts and retries.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use travel_rag_core::assemble::{GenerationRequest, PromptStyle};
use travel_rag_core::generation::GenerationGateway;
use travel_rag_core::index::query_terms;
use travel_rag_core::RagError;

use crate::config::Config;
use crate::embedding::http_client;
use crate::gateway::send_json;

const MAX_SENTENCES_PER_CHUNK: usize = 2;
const MAX_SENTENCES: usize = 6;

/// Offline generator that stitches an answer from cited context sentences.
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    fn answer(&self, request: &GenerationRequest) -> String {
        let intro = match request.style {
            PromptStyle::Answer => format!("Here is what the travel guides say about \"{}\":", request.query_text),
            PromptStyle::TravelPlan => format!("Suggested plan for {}:", request.query_text),
            PromptStyle::DestinationSummary => format!("{} at a glance:", request.query_text),
        };

        if request.is_zero_context() {
            return format!(
                "I couldn't find any travel documents relevant to \"{}\". \
                 Try adding guides for this destination or rephrasing the question.",
                request.query_text
            );
        }

        let terms: HashSet<String> = query_terms(&request.query_text)
            .into_iter()
            .filter(|t| t.len() > 2)
            .collect();

        let mut out = intro;
        let mut written = 0;
        for chunk in &request.context_chunks {
            if written >= MAX_SENTENCES {
                break;
            }
            let mut scored: Vec<(usize, usize, &str)> = sentences(&chunk.text)
                .enumerate()
                .map(|(i, s)| {
                    let overlap = query_terms(s).iter().filter(|t| terms.contains(*t)).count();
                    (overlap, i, s)
                })
                .collect();
            // Most overlapping first; ties keep document order.
            scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

            let mut picked: Vec<(usize, &str)> = scored
                .iter()
                .filter(|(overlap, _, _)| *overlap > 0)
                .take(MAX_SENTENCES_PER_CHUNK)
                .map(|(_, i, s)| (*i, *s))
                .collect();
            if picked.is_empty() {
                picked.extend(scored.iter().min_by_key(|(_, i, _)| *i).map(|(_, i, s)| (*i, *s)));
            }
            picked.sort_by_key(|(i, _)| *i);

            for (_, sentence) in picked {
                if written >= MAX_SENTENCES {
                    break;
                }
                let _ = write!(out, "\n- {} [{}]", sentence, chunk.citation);
                written += 1;
            }
        }
        out
    }
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| s.chars().filter(|c| c.is_alphanumeric()).count() >= 3)
}

#[async_trait]
impl GenerationGateway for ExtractiveGenerator {
    fn model_id(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, request: &GenerationRequest) -> travel_rag_core::Result<String> {
        Ok(self.answer(request))
    }
}

/// OpenAI-compatible chat completions.
pub struct OpenAiGenerator {
    model_id: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: &Config) -> Result<Self> {
        let Ok(api_key) = std::env::var("OPENAI_API_KEY") else {
            bail!("OPENAI_API_KEY environment variable not set");
        };
        Ok(Self {
            model_id: config.generation.resolved_model_id(),
            url: config
                .generation
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            temperature: config.generation.temperature,
            max_output_tokens: config.generation.max_output_tokens,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl GenerationGateway for OpenAiGenerator {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, request: &GenerationRequest) -> travel_rag_core::Result<String> {
        let prompt = request.render();
        let body = serde_json::json!({
            "model": self.model_id,
            "temperature": self.temperature,
            "max_tokens": self.max_output_tokens,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
        });
        let http = self
            .client
            .post(format!("{}/v1/chat/completions", self.url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = send_json(http, "OpenAI", RagError::GenerationUnavailable).await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                RagError::GenerationUnavailable(
                    "Invalid OpenAI response: missing choices[0].message.content".to_string(),
                )
            })
    }
}

/// Chat through a local Ollama instance.
pub struct OllamaGenerator {
    model_id: String,
    url: String,
    temperature: f32,
    max_output_tokens: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            model_id: config.generation.resolved_model_id(),
            url: config
                .generation
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            temperature: config.generation.temperature,
            max_output_tokens: config.generation.max_output_tokens,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl GenerationGateway for OllamaGenerator {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, request: &GenerationRequest) -> travel_rag_core::Result<String> {
        let prompt = request.render();
        let body = serde_json::json!({
            "model": self.model_id,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_output_tokens,
            },
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
        });
        let http = self
            .client
            .post(format!("{}/api/chat", self.url.trim_end_matches('/')))
            .json(&body);
        let json = send_json(http, "Ollama", RagError::GenerationUnavailable).await?;

        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                RagError::GenerationUnavailable(
                    "Invalid Ollama response: missing message.content".to_string(),
                )
            })
    }
}

/// Build the configured raw (unpooled) generation gateway.
pub fn create_generator(config: &Config) -> Result<Arc<dyn GenerationGateway>> {
    match config.generation.provider.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveGenerator)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
