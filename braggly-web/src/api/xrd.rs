//! XRD file and analysis API handlers

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    routing::{get, post, put},
    Json, Router,
};
use braggly_common::api::{Peak, XrdAnalysis, XrdFile, XrdFileUpdate};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use super::session::SessionToken;
use crate::{
    error::{ApiError, ApiResult},
    AppState,
};

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Analysis with the 2θ axis normalised and a sorted peak table
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub two_theta: Vec<f64>,
    pub intensities: Vec<f64>,
    pub peaks: Vec<Peak>,
    pub peak_table: Vec<Peak>,
}

impl From<XrdAnalysis> for AnalysisResponse {
    fn from(analysis: XrdAnalysis) -> Self {
        let peak_table = analysis.peak_table();
        Self {
            two_theta: analysis.two_theta,
            intensities: analysis.intensities,
            peaks: analysis.peaks,
            peak_table,
        }
    }
}

/// GET /api/xrd/files
pub async fn list_files(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> ApiResult<Json<Vec<XrdFile>>> {
    Ok(Json(state.backend.with_token(token).list_files().await?))
}

/// GET /api/xrd/public-files
pub async fn list_public_files(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> ApiResult<Json<Vec<XrdFile>>> {
    Ok(Json(state.backend.with_token(token).list_public_files().await?))
}

/// PUT /api/xrd/files/:id
pub async fn update_file(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path(file_id): Path<i64>,
    Json(update): Json<XrdFileUpdate>,
) -> ApiResult<Json<Value>> {
    if update.user_filename.trim().is_empty() {
        return Err(ApiError::BadRequest("userFilename must not be empty".to_string()));
    }
    state
        .backend
        .with_token(token)
        .update_file(file_id, &update)
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// DELETE /api/xrd/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path(file_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    state.backend.with_token(token).delete_file(file_id).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// GET /api/xrd/analyze/:id
pub async fn get_analysis(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path(file_id): Path<i64>,
) -> ApiResult<Json<AnalysisResponse>> {
    let analysis = state.backend.with_token(token).analysis(file_id).await?;
    Ok(Json(analysis.into()))
}

fn multipart_content_type(headers: &HeaderMap) -> ApiResult<String> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("multipart/form-data") {
        return Err(ApiError::BadRequest(
            "expected a multipart/form-data body".to_string(),
        ));
    }
    Ok(content_type.to_string())
}

/// POST /api/xrd/analyze
///
/// Multipart body forwarded to the backend unchanged.
pub async fn analyze(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let content_type = multipart_content_type(&headers)?;
    debug!(bytes = body.len(), "Forwarding XRD analysis upload");
    let result = state
        .backend
        .with_token(token)
        .forward_upload("/api/xrd/analyze", &content_type, body)
        .await?;
    Ok(Json(result))
}

/// POST /api/xrd/upload
pub async fn upload(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let content_type = multipart_content_type(&headers)?;
    let result = state
        .backend
        .with_token(token)
        .forward_upload("/api/xrd/upload", &content_type, body)
        .await?;
    Ok(Json(result))
}

/// Build XRD routes
pub fn xrd_routes() -> Router<AppState> {
    Router::new()
        .route("/api/xrd/files", get(list_files))
        .route("/api/xrd/public-files", get(list_public_files))
        .route("/api/xrd/files/:id", put(update_file).delete(delete_file))
        .route("/api/xrd/analyze", post(analyze))
        .route("/api/xrd/analyze/:id", get(get_analysis))
        .route("/api/xrd/upload", post(upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
