//! Generation gateway trait.
//!
//! Concrete gateways (extractive, OpenAI chat, Ollama chat) live in the
//! `travel-rag` app crate. Chat-style gateways send
//! [`GenerationRequest::render`]; the offline extractive gateway reads the
//! context chunks directly.

use async_trait::async_trait;

use crate::assemble::GenerationRequest;
use crate::error::Result;

/// `prompt -> text` collaborator.
///
/// Same failure contract as [`crate::embedding::EmbeddingGateway`], with
/// [`crate::RagError::GenerationUnavailable`] as the transient
/// availability error.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}
