//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a question through the full pipeline |
//! | `POST` | `/ingest` | Replace one version's partition from a bundle |
//! | `POST` | `/search` | Retrieval only, for debugging ranking |
//! | `GET`  | `/versions` | Supported, default, latest and loaded versions |
//! | `GET`  | `/health` | Health check (crate version, loaded chunks) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `index_corrupt` (409),
//! `encoder_error` (500), `internal` (500). `/chat` only ever fails with
//! `bad_request`; pipeline failures are answered, not raised.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser-based chat
//! widgets.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use rani_core::product::ProductProfile;
use rani_core::search::{SearchFilters, SearchOptions, SearchStats};
use rani_core::RagError;

use crate::app::App;
use crate::composer::{validate_query, ChatRequest, ChatResponse, ChatService, ComposerSettings};
use crate::index_store::{IndexStore, IngestSummary};
use crate::llm::LlmClient;
use crate::search::Retriever;

/// Largest accepted bundle upload.
pub const MAX_BUNDLE_BYTES: usize = 512 * 1024 * 1024;

/// Shared state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    chat: Arc<ChatService>,
    store: Arc<IndexStore>,
    profile: Arc<ProductProfile>,
    retriever: Retriever,
    settings: Arc<ComposerSettings>,
}

impl AppState {
    pub fn new(app: &App, llm: Arc<dyn LlmClient>) -> Self {
        let settings = ComposerSettings::from_config(&app.config);
        let chat = ChatService::new(app.profile.clone(), app.retriever(), llm, settings.clone());
        Self {
            chat: Arc::new(chat),
            store: app.store.clone(),
            profile: app.profile.clone(),
            retriever: app.retriever(),
            settings: Arc::new(settings),
        }
    }
}

/// Routes with CORS applied. Exposed separately from [`run_server`] so
/// tests can drive it without a socket.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route(
            "/ingest",
            post(handle_ingest).layer(DefaultBodyLimit::max(MAX_BUNDLE_BYTES)),
        )
        .route("/search", post(handle_search))
        .route("/versions", get(handle_versions))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(app: &App, llm: Arc<dyn LlmClient>) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let router = build_router(AppState::new(app, llm));

    tracing::info!(
        product = app.profile.product.slug(),
        bind = %bind_addr,
        "RANI server listening"
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::BadInput(_) | RagError::VersionUnsupported { .. } => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            RagError::IndexCorrupt { .. } => (StatusCode::CONFLICT, "index_corrupt"),
            RagError::Encoder(_) => (StatusCode::INTERNAL_SERVER_ERROR, "encoder_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    product: String,
    loaded_versions: Vec<String>,
    total_chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.store.index().snapshot();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        product: state.profile.product.slug().to_string(),
        loaded_versions: snapshot.versions(),
        total_chunks: snapshot.total_chunks(),
    })
}

// ============ GET /versions ============

#[derive(Serialize)]
struct VersionsResponse {
    product: String,
    supported: Vec<String>,
    default: String,
    latest: String,
    /// Chunk count per loaded version.
    loaded: BTreeMap<String, usize>,
}

async fn handle_versions(State(state): State<AppState>) -> Json<VersionsResponse> {
    let catalog = &state.profile.catalog;
    Json(VersionsResponse {
        product: state.profile.display_name.clone(),
        supported: catalog.supported().to_vec(),
        default: catalog.default_version().to_string(),
        latest: catalog.latest_version().to_string(),
        loaded: state.store.index().snapshot().counts().into_iter().collect(),
    })
}

// ============ POST /chat ============

async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = body?;
    request.validate()?;
    Ok(Json(state.chat.chat(&request).await))
}

// ============ POST /ingest ============

async fn handle_ingest(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestSummary>, AppError> {
    if body.is_empty() {
        return Err(bad_request("request body must be a bundle JSON document"));
    }
    let summary = state.store.ingest_bundle(&body).await?;
    Ok(Json(summary))
}

// ============ POST /search ============

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    min_similarity: Option<f32>,
    #[serde(default, flatten)]
    filters: SearchFilters,
    #[serde(default)]
    strict_version: bool,
}

#[derive(Serialize)]
struct SearchHit {
    id: String,
    content: String,
    page_title: Option<String>,
    header: Option<String>,
    source_url: String,
    version: String,
    score: f32,
    version_match: bool,
}

#[derive(Serialize)]
struct SearchResponse {
    effective_version: String,
    results: Vec<SearchHit>,
    stats: SearchStats,
}

async fn handle_search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(req) = body?;
    validate_query(&req.query, req.max_results, req.min_similarity)?;

    let resolution = state.profile.catalog.resolve(req.version.as_deref());
    let opts = SearchOptions {
        k: req.max_results.unwrap_or(state.settings.default_max_results),
        min_similarity: req
            .min_similarity
            .unwrap_or(state.settings.similarity_threshold),
        version_preference: Some(resolution.effective.clone()),
        filters: req.filters,
        strict_version: req.strict_version,
    };
    let outcome = state.retriever.try_search(req.query.trim(), &opts).await?;

    let results = outcome
        .results
        .into_iter()
        .map(|hit| SearchHit {
            source_url: state.profile.complete_url(&hit.chunk.source_url),
            id: hit.chunk.id,
            content: hit.chunk.content,
            page_title: hit.chunk.page_title,
            header: hit.chunk.header,
            version: hit.chunk.version,
            score: hit.score,
            version_match: hit.version_match,
        })
        .collect();

    Ok(Json(SearchResponse {
        effective_version: resolution.effective,
        results,
        stats: outcome.stats,
    }))
}
