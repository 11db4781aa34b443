//! Credit package and history handlers

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use braggly_common::api::{CreditPackage, PurchaseHistory, UsageHistory};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::session::SessionToken;
use crate::{
    error::{ApiError, ApiResult},
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPackageRequest {
    pub credits: i64,
    pub price_in_cents: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub user_id: i64,
    pub package_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: i64,
}

/// GET /api/credits/packages
pub async fn list_packages(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> ApiResult<Json<Vec<CreditPackage>>> {
    Ok(Json(state.backend.with_token(token).list_packages().await?))
}

/// POST /api/credits/packages
///
/// Answers `{"package": null}` when the backend created the package
/// without echoing it.
pub async fn add_package(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Json(request): Json<NewPackageRequest>,
) -> ApiResult<Json<Value>> {
    if request.credits <= 0 || request.price_in_cents < 0 {
        return Err(ApiError::BadRequest(
            "credits must be positive and priceInCents non-negative".to_string(),
        ));
    }

    let package = state
        .backend
        .with_token(token)
        .add_package(request.credits, request.price_in_cents)
        .await?;
    info!(credits = request.credits, price = request.price_in_cents, "Credit package added");
    Ok(Json(json!({ "package": package })))
}

/// DELETE /api/credits/packages/:id
pub async fn delete_package(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path(package_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    state
        .backend
        .with_token(token)
        .delete_package(package_id)
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// POST /api/credits/assign
pub async fn assign(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Json(request): Json<AssignRequest>,
) -> ApiResult<Json<Value>> {
    state
        .backend
        .with_token(token)
        .assign_credits(request.user_id, request.package_id)
        .await?;
    info!(user_id = request.user_id, package_id = request.package_id, "Credits assigned");
    Ok(Json(json!({ "status": "ok" })))
}

/// GET /api/credits/purchase-history?userId=
pub async fn purchase_history(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<Vec<PurchaseHistory>>> {
    Ok(Json(
        state
            .backend
            .with_token(token)
            .purchase_history(query.user_id)
            .await?,
    ))
}

/// GET /api/credits/usage-history?userId=
pub async fn usage_history(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<Vec<UsageHistory>>> {
    Ok(Json(
        state
            .backend
            .with_token(token)
            .usage_history(query.user_id)
            .await?,
    ))
}

/// Build credit routes
pub fn credit_routes() -> Router<AppState> {
    Router::new()
        .route("/api/credits/packages", get(list_packages).post(add_package))
        .route("/api/credits/packages/:id", delete(delete_package))
        .route("/api/credits/assign", post(assign))
        .route("/api/credits/purchase-history", get(purchase_history))
        .route("/api/credits/usage-history", get(usage_history))
}
