//! Administration API handlers: users, feature flags, restricted paths
//!
//! The backend enforces the ADMIN role; these handlers only forward the
//! caller's token.

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use braggly_common::api::{BoolParameter, RestrictedPath, Role, User};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::session::SessionToken;
use crate::{
    error::{ApiError, ApiResult},
    AppState,
};

fn ok() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ========================================
// Users
// ========================================

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UsernameQuery {
    pub username: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRoleRequest {
    pub user_id: i64,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPasswordRequest {
    pub user_id: i64,
    pub new_password: String,
}

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.backend.with_token(token).list_users().await?))
}

/// POST /api/admin/users
pub async fn create_user(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<Json<Value>> {
    if request.username.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::BadRequest("username and password are required".to_string()));
    }
    state
        .backend
        .with_token(token)
        .create_user(request.username.trim(), &request.password)
        .await?;
    info!(username = %request.username.trim(), "User created");
    Ok(ok())
}

/// DELETE /api/admin/users?username=
pub async fn delete_user(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Query(query): Query<UsernameQuery>,
) -> ApiResult<Json<Value>> {
    state
        .backend
        .with_token(token)
        .delete_user(&query.username)
        .await?;
    info!(username = %query.username, "User deleted");
    Ok(ok())
}

/// PUT /api/admin/users/role
pub async fn set_role(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Json(request): Json<SetRoleRequest>,
) -> ApiResult<Json<Value>> {
    state
        .backend
        .with_token(token)
        .set_user_role(request.user_id, request.role)
        .await?;
    Ok(ok())
}

/// PUT /api/admin/users/password
pub async fn set_password(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Json(request): Json<SetPasswordRequest>,
) -> ApiResult<Json<Value>> {
    if request.new_password.is_empty() {
        return Err(ApiError::BadRequest("newPassword must not be empty".to_string()));
    }
    state
        .backend
        .with_token(token)
        .set_user_password(request.user_id, &request.new_password)
        .await?;
    Ok(ok())
}

// ========================================
// Feature flags
// ========================================

#[derive(Debug, Deserialize)]
pub struct BoolValue {
    pub value: bool,
}

/// GET /api/parameters/bool
pub async fn list_parameters(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> ApiResult<Json<Vec<BoolParameter>>> {
    Ok(Json(state.backend.with_token(token).list_bool_parameters().await?))
}

/// GET /api/parameters/bool/:name
pub async fn get_parameter(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path(name): Path<String>,
) -> ApiResult<Json<BoolParameter>> {
    Ok(Json(state.backend.with_token(token).bool_parameter(&name).await?))
}

/// PUT /api/parameters/bool/:name
pub async fn update_parameter(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path(name): Path<String>,
    Json(body): Json<BoolValue>,
) -> ApiResult<Json<BoolParameter>> {
    state
        .backend
        .with_token(token)
        .update_bool_parameter(&name, body.value)
        .await?;
    info!(parameter = %name, value = body.value, "Feature flag updated");
    Ok(Json(BoolParameter {
        name,
        value: body.value,
    }))
}

/// DELETE /api/parameters/bool/:name
pub async fn delete_parameter(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .backend
        .with_token(token)
        .delete_bool_parameter(&name)
        .await?;
    Ok(ok())
}

// ========================================
// Restricted paths
// ========================================

#[derive(Debug, Deserialize)]
pub struct PathBody {
    pub path: String,
}

/// GET /api/restricted-paths
pub async fn list_restricted(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> ApiResult<Json<Vec<RestrictedPath>>> {
    Ok(Json(state.backend.with_token(token).list_restricted_paths().await?))
}

/// POST /api/restricted-paths
pub async fn add_restricted(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Json(body): Json<PathBody>,
) -> ApiResult<Json<Value>> {
    state
        .backend
        .with_token(token)
        .add_restricted_path(body.path.trim())
        .await?;
    Ok(ok())
}

/// DELETE /api/restricted-paths?path=
pub async fn delete_restricted(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Query(query): Query<PathBody>,
) -> ApiResult<Json<Value>> {
    state
        .backend
        .with_token(token)
        .delete_restricted_path(&query.path)
        .await?;
    Ok(ok())
}

/// Build administration routes
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/users", get(list_users).post(create_user).delete(delete_user))
        .route("/api/admin/users/role", put(set_role))
        .route("/api/admin/users/password", put(set_password))
        .route("/api/parameters/bool", get(list_parameters))
        .route(
            "/api/parameters/bool/:name",
            get(get_parameter).put(update_parameter).delete(delete_parameter),
        )
        .route(
            "/api/restricted-paths",
            get(list_restricted).post(add_restricted).delete(delete_restricted),
        )
}
