//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/chatbots/{id}/query` | Override-or-retrieve for `{question}` or `{embedding}` |
//! | `GET`  | `/chatbots/{id}/scope` | Effective retrieval scope |
//! | `PUT`  | `/chatbots/{id}/knowledge-bases` | Replace the full link set |
//! | `GET`  | `/chatbots/{id}/revisions` | List revisions (`?include_inactive=true`) |
//! | `POST` | `/revisions` | Create a revision |
//! | `PUT`  | `/revisions/{id}` | Partially update a revision |
//! | `DELETE` | `/revisions/{id}` | Deactivate a revision |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "chatbot not found: ..." } }
//! ```
//!
//! Error codes: `bad_request`, `invalid_scope`, `dimension_mismatch`,
//! `embeddings_disabled` (400), `not_found` (404), `timeout`,
//! `cancelled` (408), `embedding_error` (502), `internal` (500).
//!
//! A client that disconnects drops the handler future, which abandons the
//! in-flight query.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use retrieval_core::revision::{NewRevision, RevisionUpdate};
use retrieval_core::store::ScopeStore;
use retrieval_core::{AnswerRevision, ChatbotId, KnowledgeBaseId, RetrievalError, RetrievalOutcome, Scope};

use crate::config::Config;
use crate::engine::RetrievalEngine;

#[derive(Clone)]
struct AppState {
    engine: Arc<RetrievalEngine>,
    request_timeout: Option<Duration>,
}

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(engine: Arc<RetrievalEngine>, request_timeout: Option<Duration>) -> Router {
    let state = AppState {
        engine,
        request_timeout,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/chatbots/{id}/query", post(handle_query))
        .route("/chatbots/{id}/scope", get(handle_scope))
        .route("/chatbots/{id}/knowledge-bases", put(handle_replace_links))
        .route("/chatbots/{id}/revisions", get(handle_list_revisions))
        .route("/revisions", post(handle_create_revision))
        .route(
            "/revisions/{id}",
            put(handle_update_revision).delete(handle_deactivate_revision),
        )
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config, engine: Arc<RetrievalEngine>) -> anyhow::Result<()> {
    let timeout = config.server.request_timeout_secs.map(Duration::from_secs);
    let app = router(engine, timeout);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "kbo server listening");
    axum::serve(listener, app).await?;
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

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn embeddings_disabled() -> AppError {
    app_error(
        StatusCode::BAD_REQUEST,
        "embeddings_disabled",
        "embedding provider is disabled; send a precomputed embedding instead",
    )
}

fn timeout_error() -> AppError {
    app_error(StatusCode::REQUEST_TIMEOUT, "timeout", "request deadline exceeded")
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        let message = err.to_string();
        match err {
            RetrievalError::NotFound { .. } => app_error(StatusCode::NOT_FOUND, "not_found", message),
            RetrievalError::InvalidScope(_) => {
                app_error(StatusCode::BAD_REQUEST, "invalid_scope", message)
            }
            RetrievalError::EmbeddingDimensionMismatch { .. } => {
                app_error(StatusCode::BAD_REQUEST, "dimension_mismatch", message)
            }
            RetrievalError::Validation(_) => bad_request(message),
            RetrievalError::Embedding(_) => {
                app_error(StatusCode::BAD_GATEWAY, "embedding_error", message)
            }
            RetrievalError::Cancelled => {
                app_error(StatusCode::REQUEST_TIMEOUT, "cancelled", message)
            }
            RetrievalError::Storage(e) => {
                error!(error = %format!("{:#}", e), "storage failure");
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal storage error")
            }
        }
    }
}

fn parse_chatbot_id(raw: &str) -> Result<ChatbotId, AppError> {
    raw.parse()
        .map_err(|e| bad_request(format!("invalid chatbot id {}: {}", raw, e)))
}

fn parse_revision_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|e| bad_request(format!("invalid revision id {}: {}", raw, e)))
}

// ============ GET /health ============

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

// ============ POST /chatbots/{id}/query ============

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

async fn handle_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<RetrievalOutcome>, AppError> {
    let chatbot_id = parse_chatbot_id(&id)?;
    let engine = &state.engine;
    if req.embedding.is_none() && req.question.is_some() && !engine.embeddings_enabled() {
        return Err(embeddings_disabled());
    }

    let cancel = CancellationToken::new();
    let run = async {
        match (req.question.as_deref(), req.embedding.as_deref()) {
            (_, Some(embedding)) => engine.orchestrate(&cancel, chatbot_id, embedding).await,
            (Some(question), None) => engine.answer(&cancel, chatbot_id, question).await,
            (None, None) => Err(RetrievalError::Validation(
                "request must carry either question or embedding".to_string(),
            )),
        }
    };

    let outcome = match state.request_timeout {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(res) => res?,
            Err(_) => return Err(timeout_error()),
        },
        None => run.await?,
    };
    Ok(Json(outcome))
}

// ============ GET /chatbots/{id}/scope ============

#[derive(Serialize)]
struct ScopeResponse {
    chatbot_id: ChatbotId,
    scopes: Vec<Scope>,
}

async fn handle_scope(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScopeResponse>, AppError> {
    let chatbot_id = parse_chatbot_id(&id)?;
    let scopes = state
        .engine
        .scope(&CancellationToken::new(), chatbot_id)
        .await?;
    Ok(Json(ScopeResponse { chatbot_id, scopes }))
}

// ============ PUT /chatbots/{id}/knowledge-bases ============

#[derive(Deserialize)]
struct ReplaceLinksRequest {
    knowledge_base_ids: Vec<KnowledgeBaseId>,
}

async fn handle_replace_links(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReplaceLinksRequest>,
) -> Result<Json<ScopeResponse>, AppError> {
    let chatbot_id = parse_chatbot_id(&id)?;
    state
        .engine
        .store()
        .replace_links(chatbot_id, &req.knowledge_base_ids)
        .await?;
    let scopes = state
        .engine
        .scope(&CancellationToken::new(), chatbot_id)
        .await?;
    Ok(Json(ScopeResponse { chatbot_id, scopes }))
}

// ============ GET /chatbots/{id}/revisions ============

#[derive(Deserialize)]
struct ListRevisionsParams {
    #[serde(default)]
    include_inactive: bool,
}

#[derive(Serialize)]
struct RevisionList {
    revisions: Vec<AnswerRevision>,
}

async fn handle_list_revisions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListRevisionsParams>,
) -> Result<Json<RevisionList>, AppError> {
    let chatbot_id = parse_chatbot_id(&id)?;
    let revisions = state
        .engine
        .list_revisions(&CancellationToken::new(), chatbot_id, params.include_inactive)
        .await?;
    Ok(Json(RevisionList { revisions }))
}

// ============ /revisions ============

async fn handle_create_revision(
    State(state): State<AppState>,
    Json(req): Json<NewRevision>,
) -> Result<(StatusCode, Json<AnswerRevision>), AppError> {
    if !state.engine.embeddings_enabled() {
        return Err(embeddings_disabled());
    }
    let revision = state
        .engine
        .create_revision(&CancellationToken::new(), req)
        .await?;
    Ok((StatusCode::CREATED, Json(revision)))
}

async fn handle_update_revision(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<RevisionUpdate>,
) -> Result<Json<AnswerRevision>, AppError> {
    let id = parse_revision_id(&id)?;
    if update.question.is_some() && !state.engine.embeddings_enabled() {
        return Err(embeddings_disabled());
    }
    let revision = state
        .engine
        .update_revision(&CancellationToken::new(), id, update)
        .await?;
    Ok(Json(revision))
}

async fn handle_deactivate_revision(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnswerRevision>, AppError> {
    let id = parse_revision_id(&id)?;
    let revision = state
        .engine
        .deactivate_revision(&CancellationToken::new(), id)
        .await?;
    Ok(Json(revision))
}
