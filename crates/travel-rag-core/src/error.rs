//! Error taxonomy for the retrieval pipeline.
//!
//! Every failure the pipeline can surface is a [`RagError`] variant. The
//! variant decides two things callers care about: the stable
//! [`kind`](RagError::kind) string reported at the query boundary, and
//! whether the failure is [transient](RagError::is_transient) and so
//! eligible for retry.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Why a single document could not be ingested.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestionFailure {
    /// The file format is unsupported or the bytes could not be decoded.
    #[error("unreadable format: {0}")]
    UnreadableFormat(String),

    /// The document contained no text after extraction.
    #[error("document has no text")]
    EmptyText,

    /// The embedding gateway failed for this document's chunks.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The source could not be read or persisted.
    #[error("I/O error: {0}")]
    Io(String),
}

impl IngestionFailure {
    /// Stable reason code for per-document reports.
    pub fn code(&self) -> &'static str {
        match self {
            IngestionFailure::UnreadableFormat(_) => "unreadable_format",
            IngestionFailure::EmptyText => "empty_text",
            IngestionFailure::Embedding(_) => "embedding_failure",
            IngestionFailure::Io(_) => "io",
        }
    }
}

/// Errors produced by the retrieval pipeline.
#[derive(Error, Debug, Clone)]
pub enum RagError {
    /// Invalid parameters. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A single document failed to ingest. Non-fatal for a batch.
    #[error("ingestion failed for {source_path}: {reason}")]
    Ingestion {
        source_path: String,
        reason: IngestionFailure,
    },

    /// A vector's dimension differs from the collection's dimension.
    #[error("dimension mismatch for model '{model_id}': expected {expected}, got {actual}")]
    DimensionMismatch {
        model_id: String,
        expected: usize,
        actual: usize,
    },

    /// The embedding service could not be reached or returned a server error.
    #[error("embedding gateway unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The generation service could not be reached or returned a server error.
    #[error("generation gateway unavailable: {0}")]
    GenerationUnavailable(String),

    /// A gateway call exceeded its timeout on every attempt.
    #[error("gateway call timed out after {timeout_ms} ms")]
    GatewayTimeout { timeout_ms: u64 },

    /// Not even the top-ranked chunk plus the query fits the token budget.
    #[error("token budget {budget} is too small: at least {required} tokens required")]
    BudgetTooSmall { budget: usize, required: usize },

    /// A gateway or index rejected its input. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// The caller cancelled the request at a suspension point.
    #[error("request cancelled")]
    Cancelled,
}

impl RagError {
    /// Stable, machine-readable kind reported in structured errors.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::Config(_) => "config",
            RagError::Ingestion { .. } => "ingestion",
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::EmbeddingUnavailable(_) => "embedding_unavailable",
            RagError::GenerationUnavailable(_) => "generation_unavailable",
            RagError::GatewayTimeout { .. } => "gateway_timeout",
            RagError::BudgetTooSmall { .. } => "budget_too_small",
            RagError::InvalidInput(_) => "invalid_input",
            RagError::NotFound(_) => "not_found",
            RagError::Storage(_) => "storage",
            RagError::Cancelled => "cancelled",
        }
    }

    /// True for network/availability failures that may succeed on retry.
    ///
    /// Malformed-input failures (dimension mismatch, rejected input) are
    /// never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingUnavailable(_)
                | RagError::GenerationUnavailable(_)
                | RagError::GatewayTimeout { .. }
        )
    }

    pub fn ingestion(source_path: impl Into<String>, reason: IngestionFailure) -> Self {
        RagError::Ingestion {
            source_path: source_path.into(),
            reason,
        }
    }
}
