//! Job broker HTTP server.
//!
//! Clients submit questions and poll for results; workers pull pending
//! jobs, push results back and optionally upload the source PDFs that the
//! result links point at. All job state lives in a [`JobStore`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/submit` | Queue a `search` or `expand_bullet` job |
//! | `GET`  | `/api/job/{id}` | Poll a job (result only once `done`) |
//! | `GET`  | `/api/admin/next_job` | Claim the next pending job (admin) |
//! | `POST` | `/api/admin/job/{id}/complete` | Attach a result and finish a job (admin) |
//! | `POST` | `/api/admin/job/{id}/artifact` | Upload a source PDF for a job (admin) |
//! | `GET`  | `/api/job/{id}/artifact/{doc_id}` | Download an uploaded PDF |
//! | `GET`  | `/view/{id}/{doc_id}?page=N` | Redirect to the PDF at page `N` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Admin routes take the shared key either as the `api_key` query
//! parameter or the `x-api-key` header.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `payload_too_large` (413), `internal` (500).

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::jobs::{InMemoryJobStore, JobError, JobSpec, JobStatus, JobStore, JobType};

/// Largest accepted artifact upload.
pub const MAX_ARTIFACT_BYTES: usize = 50 * 1024 * 1024;

const DEFAULT_TOP_K: usize = 5;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn JobStore>,
    admin_key: Arc<str>,
}

/// Build the broker router over `store`, guarding admin routes with
/// `admin_key`.
pub fn router(store: Arc<dyn JobStore>, admin_key: impl Into<String>) -> Router {
    let state = AppState {
        store,
        admin_key: Arc::from(admin_key.into()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/submit", post(handle_submit))
        .route("/api/job/{id}", get(handle_poll))
        .route("/api/job/{id}/artifact/{doc_id}", get(handle_artifact))
        .route("/api/admin/next_job", get(handle_next_job))
        .route("/api/admin/job/{id}/complete", post(handle_complete))
        .route(
            "/api/admin/job/{id}/artifact",
            post(handle_upload).layer(DefaultBodyLimit::max(MAX_ARTIFACT_BYTES + 64 * 1024)),
        )
        .route("/view/{id}/{doc_id}", get(handle_view))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Start the broker on `[broker].bind` with an in-memory job table.
/// Finished jobs and their artifacts are dropped `[broker].job_ttl_secs`
/// after completion.
///
/// Fails when no admin key is configured (neither `[broker].admin_key`
/// nor `BRIEF_ADMIN_KEY`).
pub async fn run_broker(config: &Config) -> anyhow::Result<()> {
    let Some(admin_key) = config.broker.resolved_admin_key() else {
        anyhow::bail!("No admin key configured: set [broker].admin_key or BRIEF_ADMIN_KEY");
    };
    let bind_addr = config.broker.bind.clone();
    let store = InMemoryJobStore::with_ttl(Duration::from_secs(config.broker.job_ttl_secs));
    let app = router(Arc::new(store), admin_key);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "broker listening");
    println!("Broker listening on http://{}", bind_addr);
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: "invalid admin key".to_string(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn too_large() -> AppError {
    AppError {
        status: StatusCode::PAYLOAD_TOO_LARGE,
        code: "payload_too_large",
        message: format!("artifact exceeds {} bytes", MAX_ARTIFACT_BYTES),
    }
}

/// Malformed, mistyped or non-JSON bodies all surface as `bad_request`.
fn json_rejection(rejection: JsonRejection) -> AppError {
    bad_request(rejection.body_text())
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(_) => not_found(err.to_string()),
            JobError::MissingResult => bad_request(err.to_string()),
        }
    }
}

// ============ Admin credential ============

#[derive(Deserialize, Default)]
struct KeyParam {
    api_key: Option<String>,
}

fn check_admin(state: &AppState, headers: &HeaderMap, key: &KeyParam) -> Result<(), AppError> {
    let supplied = key.api_key.as_deref().or_else(|| {
        headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
    });
    match supplied {
        Some(k) if k == &*state.admin_key => Ok(()),
        _ => {
            warn!("rejected admin request with bad key");
            Err(unauthorized())
        }
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

// ============ POST /api/submit ============

#[derive(Deserialize)]
struct SubmitRequest {
    #[serde(default, alias = "q")]
    query: String,
    top_k: Option<usize>,
    #[serde(default)]
    job_type: JobType,
    doc_id: Option<i64>,
    #[serde(default)]
    reformulate: bool,
    parent_query: Option<String>,
}

async fn handle_submit(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = body.map_err(json_rejection)?;
    let query = req.query.trim();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if req.job_type == JobType::ExpandBullet && req.doc_id.is_none() {
        return Err(bad_request("expand_bullet requires doc_id"));
    }

    let job = state
        .store
        .create(JobSpec {
            query: query.to_string(),
            top_k: req.top_k.unwrap_or(DEFAULT_TOP_K),
            job_type: req.job_type,
            doc_id: req.doc_id,
            reformulate: req.reformulate,
            parent_query: req.parent_query,
        })
        .await;
    info!(job_id = %job.id, job_type = ?job.spec.job_type, "job submitted");
    Ok(Json(json!({ "job_id": job.id })))
}

// ============ GET /api/job/{id} ============

async fn handle_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let job = state
        .store
        .get(&id)
        .await
        .ok_or_else(|| not_found(format!("job not found: {}", id)))?;

    let mut body = json!({ "id": job.id, "status": job.status });
    if job.status == JobStatus::Done {
        if let Some(result) = job.result {
            body["result"] = result;
        }
    }
    Ok(Json(body))
}

// ============ GET /api/admin/next_job ============

async fn handle_next_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(key): Query<KeyParam>,
) -> Result<Json<Value>, AppError> {
    check_admin(&state, &headers, &key)?;
    match state.store.claim_next_pending().await {
        Some(descriptor) => {
            info!(job_id = %descriptor.id, "job claimed");
            serde_json::to_value(&descriptor)
                .map(Json)
                .map_err(|e| AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: e.to_string(),
                })
        }
        None => Ok(Json(json!({ "id": null, "status": "idle" }))),
    }
}

// ============ POST /api/admin/job/{id}/complete ============

#[derive(Deserialize)]
struct CompleteRequest {
    result: Option<Value>,
}

async fn handle_complete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(key): Query<KeyParam>,
    Path(id): Path<String>,
    body: Result<Json<CompleteRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    check_admin(&state, &headers, &key)?;
    let Json(req) = body.map_err(json_rejection)?;
    state.store.complete(&id, req.result).await?;
    info!(job_id = %id, "job completed");
    Ok(Json(json!({ "ok": true })))
}

// ============ POST /api/admin/job/{id}/artifact ============

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(key): Query<KeyParam>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    check_admin(&state, &headers, &key)?;

    let mut doc_id: Option<i64> = None;
    let mut file: Option<(Vec<u8>, Option<String>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("doc_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(e.to_string()))?;
                doc_id = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| bad_request(format!("invalid doc_id: {}", text)))?,
                );
            }
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| {
                    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                        too_large()
                    } else {
                        bad_request(e.to_string())
                    }
                })?;
                if bytes.len() > MAX_ARTIFACT_BYTES {
                    return Err(too_large());
                }
                file = Some((bytes.to_vec(), filename));
            }
            _ => {}
        }
    }

    let doc_id = doc_id.ok_or_else(|| bad_request("missing doc_id"))?;
    let (bytes, filename) = file.ok_or_else(|| bad_request("missing file"))?;
    let size = bytes.len();
    let etag = state.store.put_artifact(&id, doc_id, bytes, filename).await?;
    info!(job_id = %id, document_id = doc_id, size, "artifact stored");
    Ok(Json(json!({ "ok": true, "etag": etag })))
}

// ============ GET /api/job/{id}/artifact/{doc_id} ============

async fn handle_artifact(
    State(state): State<AppState>,
    Path((id, doc_id)): Path<(String, i64)>,
) -> Result<Response, AppError> {
    let artifact = state
        .store
        .artifact(&id, doc_id)
        .await
        .ok_or_else(|| not_found(format!("no artifact for job {} document {}", id, doc_id)))?;

    let disposition = format!(
        "inline; filename=\"{}\"",
        artifact
            .filename
            .as_deref()
            .unwrap_or("document.pdf")
            .replace('"', "")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::ETAG, format!("\"{}\"", artifact.etag)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    )
        .into_response())
}

// ============ GET /view/{id}/{doc_id} ============

#[derive(Deserialize)]
struct ViewParams {
    page: Option<i64>,
}

async fn handle_view(
    Path((id, doc_id)): Path<(String, i64)>,
    Query(params): Query<ViewParams>,
) -> Redirect {
    let page = params.page.unwrap_or(1).max(1);
    Redirect::to(&format!("/api/job/{}/artifact/{}#page={}", id, doc_id, page))
}
