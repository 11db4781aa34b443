//! COD import API handlers
//!
//! A caller gets one COD session, keyed by backend token, the first time a
//! query or identifier is submitted with a token the backend accepts. The
//! read-only routes never create one.

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use braggly_common::sse::cod_event_stream;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

use super::session::SessionToken;
use crate::{
    cod::{active_imports::ImportEntry, CodSession, CodSource, CodView},
    error::{ApiError, ApiResult},
    AppState,
};

/// Resolved formulas with fewer elements are not worth a COD import
const MIN_ELEMENT_COUNT: u32 = 3;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub input: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub generation: u64,
    pub query: String,
    pub formula: Option<String>,
    pub direct_id: bool,
}

#[derive(Debug, Deserialize)]
pub struct InjectRequest {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct InjectResponse {
    pub injected: bool,
    pub generation: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveImportsResponse {
    pub imports: Vec<ImportEntry>,
    pub being_imported: bool,
}

/// A COD identifier is a non-empty run of ASCII digits
pub fn is_cod_id(input: &str) -> bool {
    !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit())
}

/// Existing session for `token`, or a new one once the backend accepts it
async fn open_session(state: &AppState, token: &str) -> ApiResult<CodSession> {
    if let Some(session) = state.sessions.get(token).await {
        return Ok(session);
    }

    let backend = state.backend.with_token(token.to_string());
    backend.whoami().await?;
    Ok(state
        .sessions
        .get_or_create(
            token,
            || Arc::new(backend) as Arc<dyn CodSource>,
            &state.config.polling,
        )
        .await)
}

/// POST /api/cod/query
///
/// All-digit input is fetched as a single COD identifier; anything else is
/// resolved into a COD query and formula first.
pub async fn submit_query(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<QueryResponse>> {
    let input = request.input.trim();
    if input.is_empty() {
        return Err(ApiError::BadRequest("input must not be empty".to_string()));
    }

    if is_cod_id(input) {
        let session = open_session(&state, &token).await?;
        let generation = session.submit_direct(input);
        return Ok(Json(QueryResponse {
            generation,
            query: input.to_string(),
            formula: None,
            direct_id: true,
        }));
    }

    let resolution = state
        .backend
        .with_token(token.clone())
        .resolve_formula(input)
        .await?;
    if resolution.element_count < MIN_ELEMENT_COUNT {
        info!(input = %input, elements = resolution.element_count, "Compound too simple for COD import");
        return Err(ApiError::Unprocessable(format!(
            "compound too simple: {} element(s)",
            resolution.element_count
        )));
    }

    let session = open_session(&state, &token).await?;
    let generation = session.submit(&resolution.query_cod, Some(&resolution.formula_cod));
    Ok(Json(QueryResponse {
        generation,
        query: resolution.query_cod,
        formula: Some(resolution.formula_cod),
        direct_id: false,
    }))
}

/// DELETE /api/cod/query
pub async fn cancel_query(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> Json<serde_json::Value> {
    let closed = state.sessions.remove(&token).await;
    Json(serde_json::json!({ "closed": closed }))
}

/// POST /api/cod/ids
pub async fn inject_id(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Json(request): Json<InjectRequest>,
) -> ApiResult<Json<InjectResponse>> {
    let id = request.id.trim();
    if !is_cod_id(id) {
        return Err(ApiError::BadRequest(format!("not a COD identifier: {}", id)));
    }

    let session = open_session(&state, &token).await?;
    let injected = session.inject_id(id);
    Ok(Json(InjectResponse {
        injected,
        generation: session.generation(),
    }))
}

/// GET /api/cod/results
///
/// Without a session the idle view is returned.
pub async fn results(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> Json<CodView> {
    match state.sessions.get(&token).await {
        Some(session) => Json(session.view()),
        None => Json(CodView::idle()),
    }
}

/// GET /api/cod/events
pub async fn events(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session = state
        .sessions
        .get(&token)
        .await
        .ok_or_else(|| ApiError::NotFound("no COD query for this session".to_string()))?;
    Ok(cod_event_stream(session.subscribe(), "cod"))
}

/// GET /api/cod/active-imports
pub async fn active_imports(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> Json<ActiveImportsResponse> {
    match state.sessions.get(&token).await {
        Some(session) => Json(ActiveImportsResponse {
            imports: session.active_imports(),
            being_imported: session.is_being_imported(),
        }),
        None => Json(ActiveImportsResponse {
            imports: Vec::new(),
            being_imported: false,
        }),
    }
}

/// Build COD routes
pub fn cod_routes() -> Router<AppState> {
    Router::new()
        .route("/api/cod/query", post(submit_query).delete(cancel_query))
        .route("/api/cod/ids", post(inject_id))
        .route("/api/cod/results", get(results))
        .route("/api/cod/events", get(events))
        .route("/api/cod/active-imports", get(active_imports))
}
