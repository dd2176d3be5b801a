//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | status and version |
//! | `POST` | `/query` | answer a question with cited chunks |
//! | `POST` | `/retrieve` | ranked chunks, no generation |
//! | `POST` | `/documents` | ingest inline documents, per-document report |
//! | `DELETE` | `/documents/{id}` | delete a document |
//! | `POST` | `/plan` | travel plan from preferences |
//! | `GET` | `/destinations/{name}` | destination summary |
//! | `GET` | `/destinations?term=` | destinations matching a term |
//! | `GET` | `/stats` | index and model statistics |
//!
//! # Error Contract
//!
//! Every failure is a JSON body with a stable kind:
//!
//! ```json
//! { "error": { "kind": "budget_too_small", "message": "token budget 10 is too small: ..." } }
//! ```
//!
//! `config`, `dimension_mismatch`, `budget_too_small` and `invalid_input`
//! map to 400, `not_found` to 404, `gateway_timeout` to 504, the
//! `*_unavailable` kinds to 503, everything else to 500.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use travel_rag_core::models::Metadata;
use travel_rag_core::RagError;

use crate::app::App;
use crate::ingest::BatchReport;
use crate::loader;
use crate::service::{QueryRequest, QueryResponse, RetrieveRequest, RetrieveResponse, SystemStats};
use crate::travel::TravelPreferences;

/// Build the router over a shared [`App`].
pub fn router(app: App) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/retrieve", post(handle_retrieve))
        .route("/documents", post(handle_ingest))
        .route("/documents/{id}", delete(handle_delete))
        .route("/plan", post(handle_plan))
        .route("/destinations", get(handle_search_destinations))
        .route("/destinations/{name}", get(handle_destination))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(app)
}

/// Serve `app` on an already-bound listener until Ctrl-C.
pub async fn serve(listener: TcpListener, app: App) -> anyhow::Result<()> {
    axum::serve(listener, router(app))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

/// Bind `[server].bind` and serve.
pub async fn run_server(app: App) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    println!("travel-rag listening on http://{}", bind_addr);
    serve(listener, app.clone()).await?;
    app.shutdown().await;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    kind: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    kind: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            error!(kind = err.kind(), error = %err, "request failed");
        }
        AppError {
            status,
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_input".to_string(),
            message: rejection.body_text(),
        }
    }
}

pub fn status_for(err: &RagError) -> StatusCode {
    match err {
        RagError::Config(_)
        | RagError::DimensionMismatch { .. }
        | RagError::BudgetTooSmall { .. }
        | RagError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        RagError::NotFound(_) => StatusCode::NOT_FOUND,
        RagError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RagError::EmbeddingUnavailable(_) | RagError::GenerationUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        RagError::Ingestion { .. } | RagError::Storage(_) | RagError::Cancelled => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_query(
    State(app): State<App>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<QueryResponse> {
    let Json(request) = body?;
    Ok(Json(app.service.query(request).await?))
}

async fn handle_retrieve(
    State(app): State<App>,
    body: Result<Json<RetrieveRequest>, JsonRejection>,
) -> ApiResult<RetrieveResponse> {
    let Json(request) = body?;
    Ok(Json(app.service.retrieve(request).await?))
}

#[derive(Deserialize)]
struct IngestRequest {
    documents: Vec<InlineDocument>,
}

#[derive(Deserialize)]
struct InlineDocument {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    source_path: Option<String>,
    text: String,
    #[serde(default)]
    metadata: Metadata,
}

async fn handle_ingest(
    State(app): State<App>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> ApiResult<BatchReport> {
    let Json(request) = body?;
    if request.documents.is_empty() {
        return Err(RagError::InvalidInput("documents must not be empty".to_string()).into());
    }
    let loaded = request
        .documents
        .into_iter()
        .map(|doc| {
            let source_path = doc
                .source_path
                .unwrap_or_else(|| format!("upload/{}", uuid::Uuid::new_v4()));
            loader::document_from_text(doc.id.as_deref(), &source_path, doc.text, doc.metadata)
        })
        .collect();
    Ok(Json(app.ingestor.ingest_batch(loaded).await))
}

#[derive(Serialize)]
struct DeleteResponse {
    id: String,
    deleted: bool,
}

async fn handle_delete(State(app): State<App>, Path(id): Path<String>) -> ApiResult<DeleteResponse> {
    let deleted = app.ingestor.delete(&id).await?;
    if !deleted {
        return Err(RagError::NotFound(format!("document '{}'", id)).into());
    }
    Ok(Json(DeleteResponse { id, deleted }))
}

async fn handle_plan(
    State(app): State<App>,
    body: Result<Json<TravelPreferences>, JsonRejection>,
) -> ApiResult<QueryResponse> {
    let Json(preferences) = body?;
    Ok(Json(app.service.plan(&preferences).await?))
}

async fn handle_destination(
    State(app): State<App>,
    Path(name): Path<String>,
) -> ApiResult<QueryResponse> {
    Ok(Json(app.service.destination_info(&name).await?))
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    term: String,
}

#[derive(Serialize)]
struct SearchResponse {
    term: String,
    destinations: Vec<String>,
    count: usize,
}

async fn handle_search_destinations(
    State(app): State<App>,
    Query(params): Query<SearchParams>,
) -> ApiResult<SearchResponse> {
    let destinations = app.service.search_destinations(&params.term).await?;
    Ok(Json(SearchResponse {
        term: params.term,
        count: destinations.len(),
        destinations,
    }))
}

async fn handle_stats(State(app): State<App>) -> Json<SystemStats> {
    Json(app.service.stats())
}
