//! # Travel RAG Core
//!
//! The retrieval pipeline behind the travel assistant: data models,
//! chunking, the in-memory vector index, the retriever, and prompt
//! assembly, plus the gateway traits the application implements for
//! embedding and generation services.
//!
//! This crate has no tokio, sqlx, network, or filesystem dependencies.
//! Everything that suspends on external I/O sits behind
//! [`embedding::EmbeddingGateway`] or [`generation::GenerationGateway`].
//!
//! ```text
//! Document ──▶ chunk ──▶ EmbeddingGateway ──▶ VectorIndex      (ingest)
//! query ──▶ Retriever ──▶ assemble ──▶ GenerationGateway       (query)
//! ```

pub mod assemble;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod retrieve;

pub use error::{IngestionFailure, RagError, Result};
