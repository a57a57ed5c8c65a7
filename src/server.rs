//! JSON HTTP API over a shared [`Pipeline`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Welcome message with the usual call order |
//! | `GET`  | `/health` | Pipeline health report |
//! | `POST` | `/initialize` | Build or load the index (`{"force_recreate": bool}`) |
//! | `POST` | `/ingest` | Add uploaded files (`{"files": [{"name", "content_base64"}]}`) |
//! | `POST` | `/chat` | Ask a question (`{"question", "chat_history"?, "timeout_secs"?}`) |
//! | `GET`  | `/documents` | List indexed documents |
//! | `DELETE` | `/documents/{source}` | Remove one document from the index |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "pipeline is not ready: ..." } }
//! ```
//!
//! `code` is [`RagError::code`]. Status codes: 400 for requests the
//! pipeline cannot serve yet or cannot parse, 404 when no documents exist,
//! 409 when the index belongs to another embedding model, 408 on timeout,
//! 502 when a provider fails, 500 otherwise.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use docqa_core::models::{ChatTurn, Citation, DocumentSummary};
use docqa_core::RagError;

use crate::pipeline::{
    AskRequest, HealthReport, IngestReport, InitReport, Pipeline, RemoveReport, UploadedFile,
};

/// Uploads arrive base64-encoded inside JSON.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/initialize", post(handle_initialize))
        .route("/ingest", post(handle_ingest))
        .route("/chat", post(handle_chat))
        .route("/documents", get(handle_documents))
        .route("/documents/{source}", delete(handle_remove_document))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(pipeline)
}

/// Start the HTTP server on `[server].bind`.
///
/// Tries `initialize(false)` first so a persisted index is served right
/// away; a failure there is logged and the server starts anyway, waiting
/// for an explicit `POST /initialize`.
pub async fn run_server(pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let bind_addr = pipeline.config().server.bind.clone();

    match pipeline.initialize(false).await {
        Ok(report) => tracing::info!(
            status = ?report.status,
            documents = report.document_count,
            chunks = report.chunk_count,
            "startup initialization succeeded"
        ),
        Err(e) => tracing::warn!(
            error = %e,
            "startup initialization failed, call POST /initialize"
        ),
    }

    let app = router(pipeline);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening on http://{}", bind_addr);
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

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::error!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

pub fn status_for(err: &RagError) -> StatusCode {
    match err {
        RagError::NotReady
        | RagError::NotInitialized
        | RagError::InvalidRequest(_)
        | RagError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
        RagError::NoDocuments(_) => StatusCode::NOT_FOUND,
        RagError::DimensionMismatch { .. } | RagError::ModelMismatch { .. } => StatusCode::CONFLICT,
        RagError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        RagError::EmbeddingError(_) | RagError::GenerationError { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============ GET / ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "docqa: ask questions about your documents",
        "version": env!("CARGO_PKG_VERSION"),
        "steps": [
            "POST /initialize to index the document directory",
            "POST /ingest to add more files",
            "POST /chat with {\"question\": \"...\"}",
        ],
    }))
}

// ============ GET /health ============

async fn handle_health(State(pipeline): State<Arc<Pipeline>>) -> Json<HealthReport> {
    Json(pipeline.health())
}

// ============ POST /initialize ============

#[derive(Deserialize, Default)]
struct InitBody {
    #[serde(default)]
    force_recreate: bool,
}

/// The body is optional: an empty POST means `force_recreate = false`.
async fn handle_initialize(
    State(pipeline): State<Arc<Pipeline>>,
    body: Bytes,
) -> Result<Json<InitReport>, AppError> {
    let body: InitBody = if body.iter().all(u8::is_ascii_whitespace) {
        InitBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| RagError::InvalidRequest(format!("invalid initialize body: {}", e)))?
    };
    Ok(Json(pipeline.initialize(body.force_recreate).await?))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestBody {
    files: Vec<IngestFile>,
}

#[derive(Deserialize)]
struct IngestFile {
    name: String,
    content_base64: String,
}

async fn handle_ingest(
    State(pipeline): State<Arc<Pipeline>>,
    Json(body): Json<IngestBody>,
) -> Result<Json<IngestReport>, AppError> {
    let files = body
        .files
        .into_iter()
        .map(|f| {
            let bytes = BASE64.decode(f.content_base64.trim()).map_err(|e| {
                RagError::InvalidRequest(format!("{}: content_base64 is not valid base64: {}", f.name, e))
            })?;
            Ok(UploadedFile { name: f.name, bytes })
        })
        .collect::<Result<Vec<_>, RagError>>()?;

    Ok(Json(pipeline.ingest(files).await?))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatBody {
    question: String,
    #[serde(default)]
    chat_history: Vec<ChatTurn>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    sources: Vec<Citation>,
    passages: Vec<Passage>,
}

#[derive(Serialize)]
struct Passage {
    source: String,
    page: Option<u32>,
    position: u32,
    score: f32,
    page_content: String,
}

async fn handle_chat(
    State(pipeline): State<Arc<Pipeline>>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponse>, AppError> {
    let request = AskRequest {
        question: body.question,
        chat_history: body.chat_history,
        timeout: body.timeout_secs.map(Duration::from_secs),
    };
    let answer = pipeline.ask(request).await?;

    Ok(Json(ChatResponse {
        answer: answer.text,
        sources: answer.sources,
        passages: answer
            .passages
            .into_iter()
            .map(|p| Passage {
                source: p.chunk.source,
                page: p.chunk.page,
                position: p.chunk.ordinal,
                score: p.score,
                page_content: p.chunk.text,
            })
            .collect(),
    }))
}

// ============ /documents ============

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<DocumentSummary>,
}

async fn handle_documents(State(pipeline): State<Arc<Pipeline>>) -> Json<DocumentsResponse> {
    Json(DocumentsResponse {
        documents: pipeline.documents(),
    })
}

async fn handle_remove_document(
    State(pipeline): State<Arc<Pipeline>>,
    Path(source): Path<String>,
) -> Result<Json<RemoveReport>, AppError> {
    Ok(Json(pipeline.remove_document(&source).await?))
}
