/// REST API routes for image-anchor.
///
/// Field names are snake_case. `/verify` also accepts the `fileHash`
/// field name older front ends send.
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::{AnchorError, Stage};
use crate::pipeline::{AnchorOutcome, AnchorRequest, DEFAULT_FILE_NAME};
use crate::state::{AnchorRecord, VerificationIndex};

/// Multipart field carrying the image.
const UPLOAD_FIELD: &str = "image";

/// Error body returned by every route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub retryable: bool,
    /// Set when the ledger outcome is unknown, for later reconciliation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: AnchorError) -> ApiError {
    let status = match e.kind() {
        AnchorError::Validation(_) => StatusCode::BAD_REQUEST,
        AnchorError::StoreRejected(_) | AnchorError::LedgerRejected(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AnchorError::StoreUnavailable(_) | AnchorError::LedgerUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        // Submitted, outcome pending: accepted for later reconciliation.
        AnchorError::LedgerAmbiguous { .. } => StatusCode::ACCEPTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let (transaction_id, content_id) = match e.kind() {
        AnchorError::LedgerAmbiguous {
            transaction_id,
            content_id,
            ..
        } => (Some(transaction_id.clone()), Some(content_id.clone())),
        _ => (None, None),
    };

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            stage: e.stage(),
            retryable: e.is_retryable(),
            transaction_id,
            content_id,
        }),
    )
}

// ─── Health ──────────────────────────────────────────────

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    anchored_records: u64,
}

/// GET /
async fn root() -> &'static str {
    "image-anchor API is running"
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let anchored_records = state
        .services
        .coordinator
        .index()
        .count()
        .await
        .map_err(api_error)?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        anchored_records,
    }))
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
}

// ─── Anchor ──────────────────────────────────────────────

/// Result of an anchor request.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnchorResponse {
    pub content_id: String,
    pub fingerprint: String,
    pub transaction_id: String,
    pub submitter: String,
    pub submitted_at: String,
    pub already_anchored: bool,
}

impl From<AnchorOutcome> for AnchorResponse {
    fn from(outcome: AnchorOutcome) -> Self {
        let r = outcome.record;
        Self {
            content_id: r.content_id.into_inner(),
            fingerprint: r.fingerprint.to_hex(),
            transaction_id: r.transaction_id.as_str().to_string(),
            submitter: r.submitter,
            submitted_at: r.submitted_at.to_rfc3339(),
            already_anchored: outcome.already_anchored,
        }
    }
}

async fn run_anchor(state: &AppState, request: AnchorRequest) -> Result<Json<AnchorResponse>, ApiError> {
    let outcome = state
        .services
        .coordinator
        .anchor(request)
        .await
        .map_err(api_error)?;
    Ok(Json(outcome.into()))
}

/// POST /upload: Anchor an image sent as multipart form data.
async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<AnchorResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or(DEFAULT_FILE_NAME).to_string();
        let data = field.bytes().await.map_err(multipart_error)?;
        upload = Some(AnchorRequest::new(data.to_vec(), file_name));
        break;
    }

    let request = upload.ok_or_else(|| {
        api_error(AnchorError::Validation("No file uploaded".into()).at(Stage::Received))
    })?;
    run_anchor(&state, request).await
}

/// Oversized bodies are 413; anything else wrong with the form is a
/// validation error.
fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ErrorResponse {
                error: format!("Upload too large: {}", e.body_text()),
                stage: Some(Stage::Received),
                retryable: false,
                transaction_id: None,
                content_id: None,
            }),
        );
    }
    api_error(AnchorError::Validation(format!("malformed multipart body: {}", e.body_text())).at(Stage::Received))
}

#[derive(Debug, Deserialize)]
struct AnchorQuery {
    name: Option<String>,
}

/// POST /anchor: Anchor the raw request body.
async fn anchor_raw(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnchorQuery>,
    body: Bytes,
) -> Result<Json<AnchorResponse>, ApiError> {
    let name = query.name.unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
    run_anchor(&state, AnchorRequest::new(body.to_vec(), name)).await
}

pub fn anchor_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/upload", post(upload))
        .route("/anchor", post(anchor_raw))
}

// ─── Verify ──────────────────────────────────────────────

/// Request to verify a fingerprint.
#[derive(Debug, Deserialize)]
struct VerifyRequest {
    #[serde(default, alias = "fileHash")]
    fingerprint: Option<String>,
}

/// Verification response.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub matched: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// POST /verify: Check a fingerprint against the index.
async fn verify(
    State(state): State<Arc<AppState>>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let Json(req) = body.map_err(|e| {
        api_error(AnchorError::Validation(format!("invalid request body: {}", e.body_text())))
    })?;
    let fingerprint = req
        .fingerprint
        .ok_or_else(|| api_error(AnchorError::Validation("Missing file hash".into())))?;

    let verification = state
        .services
        .verifier
        .verify(&fingerprint)
        .await
        .map_err(api_error)?;

    let response = match verification.record {
        Some(record) => VerifyResponse {
            matched: true,
            message: "Image is authentic and matches an anchored record.".into(),
            content_id: Some(record.content_id.into_inner()),
            transaction_id: Some(record.transaction_id.as_str().to_string()),
        },
        None => VerifyResponse {
            matched: false,
            message: "No anchored image matches this fingerprint.".into(),
            content_id: None,
            transaction_id: None,
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

/// GET /records: Most recently anchored records.
async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AnchorRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(50).min(500);
    let records = state
        .services
        .coordinator
        .index()
        .recent(limit)
        .await
        .map_err(api_error)?;
    Ok(Json(records))
}

/// GET /records/{fingerprint}: One anchor record.
async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(fingerprint): Path<String>,
) -> Result<Json<AnchorRecord>, ApiError> {
    let verification = state
        .services
        .verifier
        .verify(&fingerprint)
        .await
        .map_err(api_error)?;

    verification.record.map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No anchor record for {fingerprint}"),
                stage: None,
                retryable: false,
                transaction_id: None,
                content_id: None,
            }),
        )
    })
}

pub fn verify_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/verify", post(verify))
        .route("/records", get(list_records))
        .route("/records/{fingerprint}", get(get_record))
}
