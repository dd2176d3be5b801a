//! Prompt assembly under a token budget.
//!
//! [`assemble`] walks a [`RetrievalResult`] in rank order and includes whole
//! chunks while the running estimate (query + included chunks) stays within
//! `budget_tokens`. The first chunk that would overflow ends the pass; chunks
//! are never truncated and lower-ranked chunks are never back-filled.
//!
//! Token counts are estimated at [`CHARS_PER_TOKEN`] characters per token,
//! rounded up.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::error::{RagError, Result};
use crate::index::IndexEntry;
use crate::models::{keys, Metadata};
use crate::retrieve::RetrievalResult;

/// Rough characters-per-token ratio for budget estimation.
pub const CHARS_PER_TOKEN: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Which instruction the generator receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyle {
    #[default]
    Answer,
    TravelPlan,
    DestinationSummary,
}

/// One included chunk with its provenance.
#[derive(Debug, Clone, Serialize)]
pub struct ContextChunk {
    /// 1-based citation number used in the rendered prompt.
    pub citation: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub source_path: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub sequence_index: u32,
    pub score: f32,
    pub estimated_tokens: usize,
    pub text: String,
    pub metadata: Metadata,
}

impl ContextChunk {
    fn from_entry(citation: usize, entry: &IndexEntry, estimated_tokens: usize) -> Self {
        Self {
            citation,
            chunk_id: entry.chunk.id.clone(),
            document_id: entry.chunk.document_id.clone(),
            source_path: entry.document.source_path.clone(),
            start_offset: entry.chunk.start_offset,
            end_offset: entry.chunk.end_offset,
            sequence_index: entry.chunk.sequence_index,
            score: entry.score,
            estimated_tokens,
            text: entry.chunk.text.clone(),
            metadata: entry.document.metadata.clone(),
        }
    }

    /// `[n] Source: … | Destination: … | Category: … | Span: start..end`
    pub fn header(&self) -> String {
        let source = self
            .metadata
            .text(keys::SOURCE)
            .or_else(|| self.metadata.title())
            .unwrap_or(&self.source_path);
        format!(
            "[{}] Source: {} | Destination: {} | Category: {} | Span: {}..{}",
            self.citation,
            source,
            self.metadata.destination().unwrap_or("Unknown"),
            self.metadata.category().unwrap_or("general"),
            self.start_offset,
            self.end_offset,
        )
    }
}

/// A bounded generation request. Built per query and never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub query_text: String,
    pub context_chunks: Vec<ContextChunk>,
    pub budget_tokens: usize,
    /// Estimated tokens for the query plus all included chunks.
    pub estimated_tokens: usize,
    pub style: PromptStyle,
}

/// System and user messages ready for a chat-style generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl GenerationRequest {
    pub fn with_style(mut self, style: PromptStyle) -> Self {
        self.style = style;
        self
    }

    pub fn is_zero_context(&self) -> bool {
        self.context_chunks.is_empty()
    }

    pub fn render(&self) -> RenderedPrompt {
        let mut system = String::from(match self.style {
            PromptStyle::Answer => {
                "You are a knowledgeable travel assistant. Answer the question using the \
                 numbered context passages. Cite passages by number in square brackets, \
                 for example [1]. If the passages do not contain the answer, say so."
            }
            PromptStyle::TravelPlan => {
                "You are an expert travel planner. Build a practical day-by-day itinerary \
                 that fits the traveller's budget, duration and interests, using the \
                 numbered context passages. Include accommodation, food and transport \
                 suggestions, and cite passages by number in square brackets."
            }
            PromptStyle::DestinationSummary => {
                "You are a travel guide. Summarise the destination from the numbered \
                 context passages: main attractions, best time to visit, local tips, \
                 food and budget considerations. Cite passages by number in square \
                 brackets."
            }
        });
        if self.is_zero_context() {
            system.push_str(
                " No reference passages are available for this request. Say that no \
                 supporting documents were found before answering from general knowledge.",
            );
        }

        let mut user = String::new();
        if !self.is_zero_context() {
            user.push_str("Context:\n");
            for chunk in &self.context_chunks {
                let _ = writeln!(user, "{}", chunk.header());
                let _ = writeln!(user, "{}\n", chunk.text.trim_end());
            }
        }
        let label = match self.style {
            PromptStyle::Answer => "Question",
            PromptStyle::TravelPlan => "Trip request",
            PromptStyle::DestinationSummary => "Destination",
        };
        let _ = write!(user, "{}: {}", label, self.query_text);

        RenderedPrompt { system, user }
    }
}

/// Build a request from ranked results, greedily, within `budget_tokens`.
///
/// Fails with [`RagError::BudgetTooSmall`] when the query alone, or the
/// query plus the top-ranked chunk, exceeds the budget. An empty result
/// yields a zero-context request.
pub fn assemble(
    query_text: &str,
    result: &RetrievalResult,
    budget_tokens: usize,
) -> Result<GenerationRequest> {
    let query_tokens = estimate_tokens(query_text);
    if query_tokens > budget_tokens {
        return Err(RagError::BudgetTooSmall {
            budget: budget_tokens,
            required: query_tokens,
        });
    }

    if let Some(top) = result.entries.first() {
        let required = query_tokens + estimate_tokens(&top.chunk.text);
        if required > budget_tokens {
            return Err(RagError::BudgetTooSmall {
                budget: budget_tokens,
                required,
            });
        }
    }

    let mut used = query_tokens;
    let mut context_chunks = Vec::new();
    for entry in &result.entries {
        let tokens = estimate_tokens(&entry.chunk.text);
        if used + tokens > budget_tokens {
            break;
        }
        used += tokens;
        context_chunks.push(ContextChunk::from_entry(
            context_chunks.len() + 1,
            entry,
            tokens,
        ));
    }

    Ok(GenerationRequest {
        query_text: query_text.to_string(),
        context_chunks,
        budget_tokens,
        estimated_tokens: used,
        style: PromptStyle::default(),
    })
}

/// A request with no retrieved context, for callers that explicitly opt
/// into answering without grounding.
pub fn assemble_zero_context(query_text: &str, budget_tokens: usize) -> Result<GenerationRequest> {
    let query_tokens = estimate_tokens(query_text);
    if query_tokens > budget_tokens {
        return Err(RagError::BudgetTooSmall {
            budget: budget_tokens,
            required: query_tokens,
        });
    }
    Ok(GenerationRequest {
        query_text: query_text.to_string(),
        context_chunks: Vec::new(),
        budget_tokens,
        estimated_tokens: query_tokens,
        style: PromptStyle::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::DocumentInfo;
    use crate::models::{Chunk, Embedding};
    use chrono::Utc;
    use std::sync::Arc;

    fn entry(id: &str, chars: usize, score: f32) -> IndexEntry {
        let text = "x".repeat(chars);
        IndexEntry {
            embedding: Arc::new(Embedding {
                chunk_id: id.into(),
                vector: vec![1.0],
                model_id: "m".into(),
            }),
            chunk: Arc::new(Chunk {
                id: id.into(),
                document_id: format!("doc-{}", id),
                text,
                start_offset: 5,
                end_offset: 5 + chars,
                sequence_index: 0,
                ingested_at: Utc::now(),
                hash: String::new(),
            }),
            document: Arc::new(DocumentInfo {
                id: format!("doc-{}", id),
                source_path: format!("{}.md", id),
                metadata: Metadata::new()
                    .with(keys::DESTINATION, "Bali")
                    .with(keys::CATEGORY, "city_guide"),
                ingested_at: Utc::now(),
            }),
            score,
        }
    }

    fn result(entries: Vec<IndexEntry>) -> RetrievalResult {
        RetrievalResult {
            entries,
            model_id: "m".into(),
            degraded: false,
        }
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("日本語です"), 2);
    }

    #[test]
    fn test_budget_is_respected() {
        // query = 3 tokens, chunks = 10, 10, 10 tokens
        let r = result(vec![entry("a", 40, 0.9), entry("b", 40, 0.8), entry("c", 40, 0.7)]);
        let req = assemble("best bali", &r, 25).unwrap();
        assert_eq!(req.context_chunks.len(), 2);
        assert_eq!(req.estimated_tokens, 23);
        let total: usize = 3 + req.context_chunks.iter().map(|c| c.estimated_tokens).sum::<usize>();
        assert!(total <= req.budget_tokens);
    }

    #[test]
    fn test_greedy_stops_at_first_overflow() {
        // a fits, b overflows, c would fit but is not back-filled.
        let r = result(vec![entry("a", 40, 0.9), entry("b", 400, 0.8), entry("c", 4, 0.7)]);
        let req = assemble("q", &r, 20).unwrap();
        let ids: Vec<&str> = req.context_chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_budget_too_small_for_top_chunk() {
        let r = result(vec![entry("a", 400, 0.9)]);
        let err = assemble("query", &r, 50).unwrap_err();
        assert!(matches!(
            err,
            RagError::BudgetTooSmall { budget: 50, required: 102 }
        ));
    }

    #[test]
    fn test_budget_too_small_for_query() {
        let err = assemble(&"q".repeat(100), &result(vec![]), 10).unwrap_err();
        assert!(matches!(err, RagError::BudgetTooSmall { required: 25, .. }));
        assert!(assemble_zero_context(&"q".repeat(100), 10).is_err());
    }

    #[test]
    fn test_provenance_and_citations() {
        let r = result(vec![entry("a", 8, 0.9), entry("b", 8, 0.5)]);
        let req = assemble("When to go?", &r, 100).unwrap();
        let first = &req.context_chunks[0];
        assert_eq!(first.citation, 1);
        assert_eq!(first.document_id, "doc-a");
        assert_eq!((first.start_offset, first.end_offset), (5, 13));
        assert_eq!(req.context_chunks[1].citation, 2);

        let prompt = req.render();
        assert!(prompt
            .user
            .contains("[1] Source: a.md | Destination: Bali | Category: city_guide | Span: 5..13"));
        assert!(prompt.user.contains("[2] Source: b.md"));
        assert!(prompt.user.ends_with("Question: When to go?"));
        assert!(!prompt.system.contains("No reference passages"));
    }

    #[test]
    fn test_zero_context_is_explicit() {
        let req = assemble("Anything about Oslo?", &result(vec![]), 100).unwrap();
        assert!(req.is_zero_context());
        let prompt = req.render();
        assert!(prompt.system.contains("No reference passages"));
        assert!(!prompt.user.contains("Context:"));

        let explicit = assemble_zero_context("Anything about Oslo?", 100).unwrap();
        assert_eq!(explicit.render(), prompt);
    }

    #[test]
    fn test_style_changes_instruction() {
        let r = result(vec![entry("a", 8, 0.9)]);
        let req = assemble("Bali, 5 days", &r, 100)
            .unwrap()
            .with_style(PromptStyle::TravelPlan);
        let prompt = req.render();
        assert!(prompt.system.contains("itinerary"));
        assert!(prompt.user.ends_with("Trip request: Bali, 5 days"));
    }
}
