//! HTTP API.
//!
//! Every `/api` route requires `Authorization: Bearer <session token>` (see
//! [`crate::auth`]). Bodies are camelCase JSON.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check (returns version) |
//! | `POST` | `/api/workspaces` | Create a workspace |
//! | `GET` | `/api/workspaces` | Workspaces of the caller |
//! | `DELETE` | `/api/workspaces/{id}` | Owner-only cascade delete |
//! | `POST` | `/api/workspaces/{id}/members` | Owner-only member add |
//! | `GET` | `/api/workspaces/{id}/documents` | Documents, newest first |
//! | `GET` | `/api/workspaces/{id}/messages` | Chat history, oldest first |
//! | `POST` | `/api/documents` | Upload a document |
//! | `GET` | `/api/documents/{id}` | Document with pages |
//! | `DELETE` | `/api/documents/{id}` | Delete a document |
//! | `POST` | `/api/embeddings` | Chunk and embed a document |
//! | `POST` | `/api/chat` | Retrieval-augmented chat |
//! | `POST` | `/api/chat-simple` | Preview-based chat |
//! | `POST` | `/api/duplicates` | Fingerprint duplicate check |
//! | `POST` | `/api/similar` | Near-duplicate documents |
//! | `GET` | `/api/usage` | Today's usage |
//! | `GET` | `/objects/{*key}` | Stored page images and PDFs |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "forbidden", "message": "Access denied" } }
//! ```
//!
//! Codes: `bad_request` (400), `unauthorized` (401), `forbidden` (403),
//! `not_found` (404), `rate_limited` (429), `internal` (500).
//!
//! Malformed or incomplete JSON bodies are `bad_request`. Internal errors
//! are logged in full; the response only carries a generic message.

use axum::{
    extract::{
        rejection::JsonRejection, DefaultBodyLimit, FromRequest, FromRequestParts, Path, Query,
        Request, State,
    },
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::chat::{self, ChatDeps};
use crate::config::Config;
use crate::db;
use crate::documents;
use crate::duplicates::{self, DuplicateReport};
use crate::embed_cmd;
use crate::embedding::{self, Embedder};
use crate::error::Error;
use crate::ingest::{self, PageInput, UploadRequest};
use crate::llm::{self, ChatModel};
use crate::migrate;
use crate::models::MemberRole;
use crate::storage::{self, ObjectStore};
use crate::usage;
use crate::workspace;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub embedder: Arc<dyn Embedder>,
    pub chat_model: Arc<dyn ChatModel>,
    pub store: Arc<dyn ObjectStore>,
    session_secret: Arc<str>,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        config: Config,
        embedder: Arc<dyn Embedder>,
        chat_model: Arc<dyn ChatModel>,
        store: Arc<dyn ObjectStore>,
    ) -> anyhow::Result<Self> {
        let session_secret = config.server.resolve_session_secret()?;
        Ok(Self {
            pool,
            config: Arc::new(config),
            embedder,
            chat_model,
            store,
            session_secret: session_secret.into(),
        })
    }

    /// Connect the database, run migrations, and build the configured
    /// providers and object store.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;

        Self::new(
            pool,
            config.clone(),
            embedding::create_embedder(&config.embedding)?,
            llm::create_chat_model(&config.chat)?,
            storage::create_object_store(&config.storage)?,
        )
    }

    fn chat_deps(&self) -> ChatDeps<'_> {
        ChatDeps {
            pool: &self.pool,
            embedder: self.embedder.as_ref(),
            model: self.chat_model.as_ref(),
            config: &self.config,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Base64 inflates uploads by a third; page rasters ride along.
    let body_limit = (state.config.limits.max_document_bytes as usize).saturating_mul(4);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/api/workspaces",
            post(handle_create_workspace).get(handle_list_workspaces),
        )
        .route(
            "/api/workspaces/{id}",
            axum::routing::delete(handle_delete_workspace),
        )
        .route("/api/workspaces/{id}/members", post(handle_add_member))
        .route(
            "/api/workspaces/{id}/documents",
            get(handle_list_documents),
        )
        .route("/api/workspaces/{id}/messages", get(handle_list_messages))
        .route("/api/documents", post(handle_upload))
        .route(
            "/api/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/api/embeddings", post(handle_embeddings))
        .route("/api/chat", post(handle_chat))
        .route("/api/chat-simple", post(handle_chat_simple))
        .route("/api/duplicates", post(handle_duplicates))
        .route("/api/similar", post(handle_similar))
        .route("/api/usage", get(handle_usage))
        .route("/objects/{*key}", get(handle_object))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve on `[server].bind` until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    tracing::info!(
        embedding = state.embedder.model_name(),
        chat = state.chat_model.model_name(),
        storage = state.store.backend(),
        "providers ready"
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

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

/// Converts into the JSON error body.
pub struct AppError {
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

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            Error::Internal(e) => {
                tracing::error!(error = %format!("{:#}", e), "request failed");
                return AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: "Internal server error".to_string(),
                };
            }
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

/// `Json` whose rejections use the JSON error body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> ApiResult<Self> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(bad_request(rejection.body_text())),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    Error::BadRequest(message.into()).into()
}

type ApiResult<T> = Result<T, AppError>;

// ============ Caller identity ============

/// The verified caller of an `/api` request.
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(auth::bearer_token)
            .ok_or_else(|| Error::Unauthorized("Unauthorized".into()))?;

        Ok(AuthUser(auth::verify_token(&state.session_secret, token)?))
    }
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

// ============ Workspaces ============

#[derive(Deserialize)]
struct CreateWorkspaceBody {
    #[serde(default)]
    name: String,
}

async fn handle_create_workspace(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<CreateWorkspaceBody>,
) -> ApiResult<impl IntoResponse> {
    let ws = workspace::create_workspace(&state.pool, &user, &body.name).await?;
    Ok((StatusCode::CREATED, Json(ws)))
}

async fn handle_list_workspaces(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let workspaces = workspace::list_for_user(&state.pool, &user).await?;
    Ok(Json(serde_json::json!({ "workspaces": workspaces })))
}

async fn handle_delete_workspace(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let report = workspace::delete_workspace(&state.pool, state.store.as_ref(), &id, &user).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "documents": report.documents,
        "objects": report.objects,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberBody {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    role: Option<String>,
}

async fn handle_add_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<AddMemberBody>,
) -> ApiResult<impl IntoResponse> {
    let role = match body.role.as_deref() {
        None => MemberRole::Member,
        Some(r) => r
            .parse::<MemberRole>()
            .map_err(|e| bad_request(e.to_string()))?,
    };
    workspace::add_member(&state.pool, &id, &user, &body.user_id, role).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "workspaceId": id, "userId": body.user_id, "role": role })),
    ))
}

async fn handle_list_documents(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    workspace::require_member(&state.pool, &id, &user).await?;
    let docs = documents::list_documents(&state.pool, &id).await?;
    Ok(Json(serde_json::json!({ "documents": docs })))
}

#[derive(Deserialize)]
struct MessagesQuery {
    limit: Option<i64>,
}

async fn handle_list_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let messages = chat::list_messages(&state.pool, &user, &id, limit).await?;
    Ok(Json(serde_json::json!({ "messages": messages })))
}

// ============ Documents ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadPage {
    page_number: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    image_base64: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadBody {
    #[serde(default)]
    workspace_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    byte_size: Option<i64>,
    #[serde(default)]
    pdf_base64: Option<String>,
    #[serde(default)]
    pages: Vec<UploadPage>,
}

fn decode_base64(field: &str, data: &str) -> ApiResult<Vec<u8>> {
    // Accept data URLs as produced by canvas.toDataURL().
    let payload = data.split_once(";base64,").map(|(_, b)| b).unwrap_or(data);
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| bad_request(format!("{} is not valid base64: {}", field, e)))
}

async fn handle_upload(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<UploadBody>,
) -> ApiResult<impl IntoResponse> {
    if body.workspace_id.trim().is_empty() {
        return Err(bad_request("Missing required fields"));
    }

    let pdf = body
        .pdf_base64
        .as_deref()
        .map(|b| decode_base64("pdfBase64", b))
        .transpose()?;

    let mut pages = Vec::with_capacity(body.pages.len());
    for page in body.pages {
        let image = page
            .image_base64
            .as_deref()
            .map(|b| decode_base64("imageBase64", b))
            .transpose()?;
        pages.push(PageInput {
            page_number: page.page_number,
            text: page.text,
            image,
        });
    }

    let request = UploadRequest {
        workspace_id: body.workspace_id,
        title: body.title,
        byte_size: body.byte_size,
        pdf,
        pages,
    };
    let outcome = ingest::ingest_document(
        &state.pool,
        state.store.as_ref(),
        &state.config,
        &user,
        request,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn handle_get_document(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<documents::DocumentWithPages>> {
    let doc = documents::get_document(&state.pool, &id).await?;
    workspace::require_member(&state.pool, &doc.workspace_id, &user).await?;
    Ok(Json(documents::get_document_with_pages(&state.pool, &id).await?))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let doc = documents::get_document(&state.pool, &id).await?;
    workspace::require_member(&state.pool, &doc.workspace_id, &user).await?;
    documents::delete_document(&state.pool, state.store.as_ref(), &id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddingsBody {
    #[serde(default)]
    document_id: String,
}

async fn handle_embeddings(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<EmbeddingsBody>,
) -> ApiResult<Json<embed_cmd::IndexOutcome>> {
    if body.document_id.trim().is_empty() {
        return Err(bad_request("Document ID required"));
    }
    let outcome = embed_cmd::index_document(
        &state.pool,
        state.embedder.as_ref(),
        &state.config.chunking,
        &user,
        &body.document_id,
    )
    .await?;
    Ok(Json(outcome))
}

// ============ Chat ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    #[serde(default)]
    workspace_id: String,
    #[serde(default)]
    message: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<ChatBody>,
) -> ApiResult<Json<chat::ChatReply>> {
    let reply = chat::chat(&state.chat_deps(), &user, &body.workspace_id, &body.message).await?;
    Ok(Json(reply))
}

async fn handle_chat_simple(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<ChatBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let response =
        chat::chat_simple(&state.chat_deps(), &user, &body.workspace_id, &body.message).await?;
    Ok(Json(serde_json::json!({ "response": response })))
}

// ============ Duplicates ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DuplicatesBody {
    #[serde(default)]
    workspace_id: String,
    #[serde(default)]
    fingerprints: Vec<String>,
    /// When present, near-duplicate documents are reported too.
    #[serde(default)]
    text: Option<String>,
}

async fn handle_duplicates(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<DuplicatesBody>,
) -> ApiResult<Json<DuplicateReport>> {
    workspace::require_member(&state.pool, &body.workspace_id, &user).await?;

    let exact =
        duplicates::check_for_duplicates(&state.pool, &body.workspace_id, &body.fingerprints, None)
            .await?;
    let similar = match body.text.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(text) => {
            duplicates::find_similar_documents(
                &state.pool,
                &body.workspace_id,
                text,
                duplicates::DEFAULT_MIN_SIMILARITY,
                None,
            )
            .await?
        }
        None => Vec::new(),
    };

    Ok(Json(DuplicateReport {
        duplicates: exact,
        similar,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimilarBody {
    #[serde(default)]
    workspace_id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    min_similarity: Option<f64>,
}

async fn handle_similar(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<SimilarBody>,
) -> ApiResult<Json<serde_json::Value>> {
    workspace::require_member(&state.pool, &body.workspace_id, &user).await?;
    let min = body
        .min_similarity
        .unwrap_or(duplicates::DEFAULT_MIN_SIMILARITY);
    if !(0.0..=1.0).contains(&min) {
        return Err(bad_request("minSimilarity must be in [0, 1]"));
    }

    let similar =
        duplicates::find_similar_documents(&state.pool, &body.workspace_id, &body.text, min, None)
            .await?;
    Ok(Json(serde_json::json!({ "similar": similar })))
}

// ============ Usage ============

async fn handle_usage(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<usage::UsageSummary>> {
    let summary = usage::summary(&state.pool, &user, state.config.limits.daily_api_calls).await?;
    Ok(Json(summary))
}

// ============ Objects ============

async fn handle_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    storage::validate_key(&key).map_err(|e| bad_request(e.to_string()))?;

    let bytes = state
        .store
        .get(&key)
        .await
        .map_err(|e| AppError::from(Error::Internal(e)))?
        .ok_or_else(|| Error::NotFound("Object not found".into()))?;

    Ok((
        [(header::CONTENT_TYPE, storage::content_type_for_key(&key))],
        bytes,
    )
        .into_response())
}
